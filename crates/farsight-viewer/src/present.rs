//! Frame presentation seam.
//!
//! Decoding the image bytes and putting pixels on a screen is display-stack
//! work that lives outside this crate. A presenter failure leaves the
//! session connected; the viewer just keeps showing its last good frame.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use weft_core::FrameMessage;

/// Consumes incoming frames.
pub trait FramePresenter: Send {
    fn present(&mut self, frame: &FrameMessage) -> Result<()>;
}

/// Presenter that only tracks arrival statistics; stands in when no display
/// backend is wired up.
#[derive(Debug)]
pub struct NullPresenter {
    frames: u64,
    fps: f64,
    window_start: Instant,
    window_frames: u64,
}

impl NullPresenter {
    pub fn new() -> Self {
        Self {
            frames: 0,
            fps: 0.0,
            window_start: Instant::now(),
            window_frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

impl Default for NullPresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl FramePresenter for NullPresenter {
    fn present(&mut self, frame: &FrameMessage) -> Result<()> {
        self.frames += 1;
        self.window_frames += 1;

        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.window_frames as f64 / elapsed.as_secs_f64();
            tracing::debug!(
                "{}x{} frame {}, {:.1} fps",
                frame.width,
                frame.height,
                frame.frame_number,
                self.fps
            );
            self.window_start = Instant::now();
            self.window_frames = 0;
        }

        Ok(())
    }
}

/// Presenter that stores every frame, for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    frames: Arc<Mutex<Vec<FrameMessage>>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything presented so far.
    pub fn received(&self) -> Vec<FrameMessage> {
        self.frames.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl FramePresenter for RecordingPresenter {
    fn present(&mut self, frame: &FrameMessage) -> Result<()> {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(frame.clone());
        }
        Ok(())
    }
}
