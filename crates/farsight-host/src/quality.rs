//! Adaptive stream quality.
//!
//! A coarse proportional controller over measured send latency. The premise:
//! if socket writes consistently take long, the downstream link is the
//! bottleneck and visual quality should give way; when writes are cheap,
//! quality creeps back up. Quality never leaves the configured band.

use std::collections::VecDeque;
use std::time::Duration;

/// Quality floor when the link is struggling.
pub const DEFAULT_MIN_QUALITY: u8 = 30;

/// Quality ceiling when the link is idle-fast.
pub const DEFAULT_MAX_QUALITY: u8 = 85;

/// Send-time samples kept in the sliding window.
const WINDOW: usize = 30;

/// Samples required before the controller starts adjusting.
const MIN_SAMPLES: usize = 10;

#[derive(Debug)]
pub struct QualityController {
    quality: u8,
    min_quality: u8,
    max_quality: u8,
    target_interval: Duration,
    send_times: VecDeque<Duration>,
}

impl QualityController {
    pub fn new(initial: u8, min_quality: u8, max_quality: u8, target_interval: Duration) -> Self {
        Self {
            quality: initial.clamp(min_quality, max_quality),
            min_quality,
            max_quality,
            target_interval,
            send_times: VecDeque::with_capacity(WINDOW),
        }
    }

    /// Quality to pass to the encoder for the next frame.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Record one frame's send time and adjust the quality setting.
    pub fn record_send(&mut self, elapsed: Duration) -> u8 {
        if self.send_times.len() == WINDOW {
            self.send_times.pop_front();
        }
        self.send_times.push_back(elapsed);

        if self.send_times.len() >= MIN_SAMPLES {
            let total: Duration = self.send_times.iter().copied().sum();
            let mean = total / self.send_times.len() as u32;

            if mean > self.target_interval.mul_f64(0.5) {
                self.quality = self.quality.saturating_sub(2).max(self.min_quality);
            } else if mean < self.target_interval.mul_f64(0.2) {
                self.quality = self.quality.saturating_add(1).min(self.max_quality);
            }
        }

        self.quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> QualityController {
        // 30 fps target: ~33ms interval.
        QualityController::new(
            70,
            DEFAULT_MIN_QUALITY,
            DEFAULT_MAX_QUALITY,
            Duration::from_millis(33),
        )
    }

    #[test]
    fn no_adjustment_below_minimum_samples() {
        let mut q = controller();
        for _ in 0..MIN_SAMPLES - 1 {
            q.record_send(Duration::from_millis(100));
        }
        assert_eq!(q.quality(), 70);
    }

    #[test]
    fn slow_sends_degrade_quality_to_floor() {
        let mut q = controller();
        // Mean well above 50% of the target interval.
        for _ in 0..200 {
            q.record_send(Duration::from_millis(30));
        }
        assert_eq!(q.quality(), DEFAULT_MIN_QUALITY);
    }

    #[test]
    fn fast_sends_raise_quality_to_ceiling() {
        let mut q = controller();
        // Mean under 20% of the target interval.
        for _ in 0..200 {
            q.record_send(Duration::from_millis(1));
        }
        assert_eq!(q.quality(), DEFAULT_MAX_QUALITY);
    }

    #[test]
    fn moderate_sends_hold_quality_steady() {
        let mut q = controller();
        // Between the 20% and 50% thresholds: no movement either way.
        for _ in 0..200 {
            q.record_send(Duration::from_millis(10));
        }
        assert_eq!(q.quality(), 70);
    }

    #[test]
    fn initial_quality_is_clamped_into_band() {
        let q = QualityController::new(5, 30, 85, Duration::from_millis(33));
        assert_eq!(q.quality(), 30);
        let q = QualityController::new(100, 30, 85, Duration::from_millis(33));
        assert_eq!(q.quality(), 85);
    }
}
