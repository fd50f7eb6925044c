//! Synchronization primitives.
//!
//! - [`Semaphore`] orders work between queue operations (acquire → render →
//!   present)
//! - [`Fence`] lets the host wait for a submission to finish
//! - [`FrameSync`] bundles the three objects one frame-in-flight slot owns
//!
//! Frame slots and swapchain images are separate index spaces: a slot's
//! `FrameSync` is indexed by `frame_counter % MAX_FRAMES_IN_FLIGHT`, never by
//! the acquired image index.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Vulkan semaphore wrapper. Created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled so the first wait on it
    /// returns immediately.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence signals.
    ///
    /// `timeout` is in nanoseconds. A fence still unsignaled after it, or a
    /// lost device, is reported as [`RhiError::DeviceLost`]: every submission
    /// the renderer makes finishes in far less time.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        let fences = [self.fence];
        match unsafe { self.device.handle().wait_for_fences(&fences, true, timeout) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::DeviceLost(format!(
                "fence not signaled within {} ms",
                timeout / 1_000_000
            ))),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost(
                "device lost while waiting on fence".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Resets the fence to unsignaled. It must not be pending on a queue.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects owned by one frame-in-flight slot.
///
/// ```text
/// wait(in_flight) → acquire(signals image_available) → reset(in_flight)
///   → submit(waits image_available, signals render_finished + in_flight)
///   → present(waits render_finished)
/// ```
pub struct FrameSync {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    /// The fence starts signaled so the first frame does not block.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let frame = Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        };
        debug!("Created frame synchronization primitives");
        Ok(frame)
    }

    /// Creates one `FrameSync` per frame-in-flight slot.
    pub fn for_slots(device: &Arc<Device>, slots: usize) -> RhiResult<Vec<Self>> {
        (0..slots).map(|_| Self::new(device.clone())).collect()
    }

    /// Signaled by acquisition once the image may be written.
    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    /// Signaled by the graphics submission, waited on by present.
    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    /// Signaled when the slot's last submission retired.
    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_buffered() {
        assert_eq!(MAX_FRAMES_IN_FLIGHT, 2);
    }

    #[test]
    fn test_sync_objects_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }
}
