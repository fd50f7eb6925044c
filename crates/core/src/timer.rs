//! Frame timing for the render loop.

use std::time::{Duration, Instant};

/// Interval over which the frame rate is averaged.
const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Measures total run time, per-frame deltas and a rolling frame rate.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_frame: Instant,
    window_start: Instant,
    window_frames: u32,
    total_frames: u64,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            window_start: now,
            window_frames: 0,
            total_frames: 0,
        }
    }

    /// Seconds since the timer was created. Drives animation.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Number of frames recorded with [`Timer::frame`].
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Mark the end of a frame.
    ///
    /// Returns the time since the previous frame, and the average frame rate
    /// once per [`FPS_WINDOW`].
    pub fn frame(&mut self) -> (Duration, Option<f32>) {
        let now = Instant::now();
        let delta = now - self.last_frame;
        self.last_frame = now;
        self.total_frames += 1;
        self.window_frames += 1;

        let window = now - self.window_start;
        if window >= FPS_WINDOW {
            let fps = self.window_frames as f32 / window.as_secs_f32();
            self.window_start = now;
            self.window_frames = 0;
            (delta, Some(fps))
        } else {
            (delta, None)
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counts() {
        let mut timer = Timer::new();
        timer.frame();
        timer.frame();
        assert_eq!(timer.total_frames(), 2);
    }

    #[test]
    fn test_fps_reported_after_window() {
        let mut timer = Timer::new();
        let Some(earlier) = timer.window_start.checked_sub(FPS_WINDOW) else {
            return;
        };
        timer.window_start = earlier;
        let (_, fps) = timer.frame();
        assert!(fps.is_some_and(|fps| fps > 0.0));
        let (_, fps) = timer.frame();
        assert!(fps.is_none());
    }
}
