//! Renderer-level error type.

use thiserror::Error;

use renderer_resources::ResourceError;
use renderer_rhi::RhiError;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Core(#[from] renderer_core::Error),

    /// A fixed-capacity table (objects, textures) is full
    #[error("{what} capacity of {capacity} reached")]
    ResourceExhausted { what: &'static str, capacity: usize },

    /// The renderer was used after `cleanup`
    #[error("Renderer is not initialized")]
    NotInitialized,
}

impl RendererError {
    /// Whether the device is gone and the renderer must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rhi(e) if e.is_device_lost())
    }
}

pub type RendererResult<T> = Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;
    use renderer_rhi::vk;

    #[test]
    fn test_device_lost_is_fatal() {
        let err = RendererError::from(RhiError::DeviceLost("fence timeout".into()));
        assert!(err.is_fatal());

        let err = RendererError::from(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_exhaustion_is_not_fatal() {
        let err = RendererError::ResourceExhausted {
            what: "model",
            capacity: 4,
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "model capacity of 4 reached");

        let err = RendererError::from(RhiError::PoolExhausted {
            max_sets: 2,
            allocated: 2,
            requested: 1,
        });
        assert!(!err.is_fatal());
    }
}
