//! Screen capture seam.
//!
//! Capture and image encoding live outside this crate; the agent only needs
//! "produce an encoded image at this quality". Real backends wrap the OS
//! screen grabber plus an encoder.

use anyhow::Result;
use bytes::Bytes;

/// One encoded frame from the capture pipeline.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub width: u16,
    pub height: u16,
    pub frame_number: u32,
    pub data: Bytes,
}

/// Produces encoded screen images on demand.
///
/// `quality` is the encoder setting (1-100) for this frame; the adaptive
/// controller moves it between frames. Errors are counted by the agent and
/// retried, never fatal.
pub trait FrameSource: Send {
    fn next_frame(&mut self, quality: u8) -> Result<EncodedFrame>;
}

/// Deterministic stand-in source for tests and capture-less hosts.
///
/// Emits a rolling byte pattern tagged with the frame number. The payload
/// size tracks the requested quality so the adaptive controller stays
/// observable end to end.
#[derive(Debug)]
pub struct TestCardSource {
    width: u16,
    height: u16,
    next_frame_number: u32,
}

impl TestCardSource {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            next_frame_number: 0,
        }
    }
}

impl FrameSource for TestCardSource {
    fn next_frame(&mut self, quality: u8) -> Result<EncodedFrame> {
        let frame_number = self.next_frame_number;
        self.next_frame_number = self.next_frame_number.wrapping_add(1);

        let len = 256 + quality as usize * 64;
        let data: Vec<u8> = (0..len)
            .map(|i| (i as u32).wrapping_add(frame_number) as u8)
            .collect();

        Ok(EncodedFrame {
            width: self.width,
            height: self.height,
            frame_number,
            data: data.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_numbers_frames_monotonically() {
        let mut source = TestCardSource::new(640, 480);
        for expected in 0..10 {
            let frame = source.next_frame(70).expect("frame");
            assert_eq!(frame.frame_number, expected);
            assert_eq!((frame.width, frame.height), (640, 480));
        }
    }

    #[test]
    fn test_card_payload_tracks_quality() {
        let mut source = TestCardSource::new(640, 480);
        let low = source.next_frame(30).expect("low");
        let high = source.next_frame(85).expect("high");
        assert!(high.data.len() > low.data.len());
    }
}
