//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// The allocator mutex was poisoned by a panicking thread
    #[error("GPU allocator lock poisoned")]
    AllocatorPoisoned,

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// No memory type satisfies both the resource's type bits and the
    /// requested property flags
    #[error("No memory type matches bits {type_bits:#b} with properties {properties:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// An image layout transition without a known barrier
    #[error("Unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// A descriptor pool has handed out all of its sets
    #[error("Descriptor pool exhausted: {allocated}/{max_sets} sets in use, {requested} requested")]
    PoolExhausted {
        max_sets: u32,
        allocated: u32,
        requested: u32,
    },

    /// A render pass description references something that does not exist
    #[error("Invalid render graph: {0}")]
    InvalidRenderGraph(String),

    /// The device stopped responding (lost, or a fence never signaled)
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle or out-of-range index
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// A size that is zero, mismatched, out of bounds or not representable
    #[error("Invalid size: {0}")]
    InvalidSize(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RhiError {
    /// Whether the error leaves the device unusable.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost(_) | Self::VulkanError(vk::Result::ERROR_DEVICE_LOST)
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
