//! Frame scheduling for multiple frames in flight.
//!
//! [`FrameManager`] owns the per-frame state machine; everything that talks
//! to Vulkan sits behind [`FrameBackend`]. Two index spaces meet here:
//!
//! - the frame slot (`usize`, `0..frames_in_flight`) selects the fence and
//!   semaphores
//! - the swapchain image index (`u32`) selects the framebuffer, command
//!   buffer, uniform buffers and descriptor sets
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. wait(fence[slot])
//! 2. acquire image (signals image_available[slot]); out of date → return,
//!    fence untouched
//! 3. wait(fence[owner]) if another slot still renders to the image
//! 4. update per-image uniforms
//! 5. record the image's command buffer (skipped with fixed recording
//!    unless the backend reports the recording stale)
//! 6. reset(fence[slot])
//! 7. submit (waits image_available[slot], signals render_finished[slot]
//!    and fence[slot]); the image now belongs to the slot
//! 8. present (waits render_finished[slot])
//! 9. slot = (slot + 1) % frames_in_flight
//! ```
//!
//! The fence is reset immediately before the submit that signals it again,
//! so a frame failing in steps 2 to 5 leaves the slot reusable.

use tracing::{debug, info, warn};

use renderer_rhi::{RhiError, RhiResult};

/// Result of asking the swapchain for an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was signaled.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What the caller should do after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, but the swapchain should be recreated soon.
    SwapchainSuboptimal,
    /// Nothing (or nothing useful) was presented; recreate before the next
    /// frame.
    SwapchainOutOfDate,
}

impl FrameStatus {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// GPU operations the scheduler drives, one call per step.
pub trait FrameBackend {
    /// Blocks until the last submission made from `slot` retired.
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()>;

    /// Acquires the next swapchain image, signaling the slot's
    /// image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    /// Resets the slot's fence to unsignaled.
    fn reset_slot(&mut self, slot: usize) -> RhiResult<()>;

    /// Writes view-projection and per-object uniforms for `image_index`.
    fn update_image(&mut self, image_index: u32) -> RhiResult<()>;

    /// Re-records the command buffer of `image_index`.
    fn record_image(&mut self, image_index: u32) -> RhiResult<()>;

    /// Whether a fixed recording of `image_index` no longer matches the
    /// scene and must be re-recorded before its next submit.
    fn image_needs_record(&self, _image_index: u32) -> bool {
        false
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome>;
}

/// Frame-in-flight bookkeeping.
///
/// Not thread-safe; lives on the render thread.
#[derive(Debug)]
pub struct FrameManager {
    frames_in_flight: usize,
    current_frame: usize,
    /// Slot whose submission last used each swapchain image.
    images_in_flight: Vec<Option<usize>>,
    fixed_recording: bool,
    frames_presented: u64,
    /// Set while per-image resources are missing, e.g. after a failed
    /// swapchain recreation.
    stale: bool,
}

impl FrameManager {
    pub fn new(frames_in_flight: usize, image_count: usize, fixed_recording: bool) -> Self {
        info!(
            "Frame manager created with {} frames in flight, {} swapchain images{}",
            frames_in_flight,
            image_count,
            if fixed_recording {
                ", fixed command recording"
            } else {
                ""
            }
        );
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current_frame: 0,
            images_in_flight: vec![None; image_count],
            fixed_recording,
            frames_presented: 0,
            stale: false,
        }
    }

    /// Runs one frame through `backend`.
    ///
    /// Out-of-date and suboptimal swapchains are reported as a
    /// [`FrameStatus`]; errors are reserved for failed GPU calls.
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> RhiResult<FrameStatus> {
        if self.stale {
            return Ok(FrameStatus::SwapchainOutOfDate);
        }
        let slot = self.current_frame;

        backend.wait_for_slot(slot)?;

        let (image_index, acquire_suboptimal) = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                warn!("Swapchain out of date during acquire");
                return Ok(FrameStatus::SwapchainOutOfDate);
            }
        };

        let Some(&owner) = self.images_in_flight.get(image_index as usize) else {
            return Err(RhiError::InvalidHandle(format!(
                "acquired image {} but the swapchain has {} image(s)",
                image_index,
                self.images_in_flight.len()
            )));
        };
        if let Some(previous) = owner
            && previous != slot
        {
            debug!("Image {} still owned by frame {}, waiting", image_index, previous);
            backend.wait_for_slot(previous)?;
        }

        backend.update_image(image_index)?;
        if !self.fixed_recording || backend.image_needs_record(image_index) {
            backend.record_image(image_index)?;
        }

        backend.reset_slot(slot)?;
        backend.submit(slot, image_index)?;
        self.images_in_flight[image_index as usize] = Some(slot);

        let presented = backend.present(slot, image_index)?;

        self.current_frame = (slot + 1) % self.frames_in_flight;
        self.frames_presented += 1;

        Ok(match presented {
            PresentOutcome::OutOfDate => {
                warn!("Swapchain out of date during present");
                FrameStatus::SwapchainOutOfDate
            }
            PresentOutcome::Suboptimal => FrameStatus::SwapchainSuboptimal,
            PresentOutcome::Presented if acquire_suboptimal => FrameStatus::SwapchainSuboptimal,
            PresentOutcome::Presented => FrameStatus::Presented,
        })
    }

    /// Forgets image ownership after the swapchain was recreated with
    /// `image_count` images. The device must be idle.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight = vec![None; image_count];
        self.stale = false;
    }

    /// Stops drawing until the next [`reset_images`](Self::reset_images);
    /// every frame until then reports [`FrameStatus::SwapchainOutOfDate`].
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    #[inline]
    pub fn fixed_recording(&self) -> bool {
        self.fixed_recording
    }

    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Slot that last submitted work for `image_index`.
    pub fn image_owner(&self, image_index: u32) -> Option<usize> {
        self.images_in_flight
            .get(image_index as usize)
            .copied()
            .flatten()
    }
}
