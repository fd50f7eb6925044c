//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Safe RAII wrappers over `ash` for everything the renderer touches:
//! - Instance, physical device selection and logical device creation
//! - Swapchain management
//! - Memory allocation, buffers, images, textures and staged uploads
//! - Render passes, framebuffers, shaders and graphics pipelines
//! - Descriptor layouts and capacity-tracked pools
//! - Command recording and frame synchronization primitives

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod upload;
pub mod vertex;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
