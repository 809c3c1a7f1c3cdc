//! Application message codec.
//!
//! Application messages travel end to end through the relay as opaque bytes.
//! Each one is a fixed header followed by a typed payload:
//!
//! ```text
//!  0         1                                 9                13
//! +---------+---------------------------------+-----------------+
//! |  type   |         timestamp_ms            |   payload_len   |
//! |   u8    |           u64 (BE)              |     u32 (BE)    |
//! +---------+---------------------------------+-----------------+
//! |                    payload (payload_len bytes)              |
//! +-------------------------------------------------------------+
//! ```
//!
//! Timestamps are the producer's wall clock in milliseconds and are never
//! used for ordering.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::WeftError;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 13;

/// Default maximum payload length accepted by decoders.
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Frame payload prefix: width, height, frame number.
pub const FRAME_PREFIX_SIZE: usize = 8;

/// Fixed input record size.
pub const INPUT_RECORD_SIZE: usize = 11;

/// Application message types.
///
/// `Connect`, `ConnectAck`, `Disconnect`, and `Error` belong to the direct
/// host-to-viewer mode and never appear on a relay link; they are enumerated
/// so the type space stays explicit next to the envelope tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Direct-mode connection request.
    Connect = 0x10,
    /// Direct-mode connection accept.
    ConnectAck = 0x11,
    /// Direct-mode disconnect.
    Disconnect = 0x12,
    /// Encoded screen frame, host to viewer.
    Frame = 0x20,
    /// Input event, viewer to host.
    Input = 0x21,
    /// Application-level error report.
    Error = 0xF0,
}

impl TryFrom<u8> for MessageType {
    type Error = WeftError;

    fn try_from(value: u8) -> Result<Self, WeftError> {
        match value {
            0x10 => Ok(Self::Connect),
            0x11 => Ok(Self::ConnectAck),
            0x12 => Ok(Self::Disconnect),
            0x20 => Ok(Self::Frame),
            0x21 => Ok(Self::Input),
            0xF0 => Ok(Self::Error),
            other => Err(WeftError::UnknownMessageType(other)),
        }
    }
}

/// The 13-byte application message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub msg_type: MessageType,
    pub timestamp_ms: u64,
    pub payload_len: u32,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType, timestamp_ms: u64, payload_len: u32) -> Self {
        Self {
            msg_type,
            timestamp_ms,
            payload_len,
        }
    }

    /// Encode the header into its 13-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.msg_type as u8;
        buf[1..9].copy_from_slice(&self.timestamp_ms.to_be_bytes());
        buf[9..13].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Decode a header, enforcing the default payload-length ceiling.
    pub fn decode(buf: &[u8]) -> Result<Self, WeftError> {
        Self::decode_with_limit(buf, MAX_PAYLOAD_SIZE)
    }

    /// Decode a header with an explicit payload-length ceiling.
    pub fn decode_with_limit(buf: &[u8], max_payload: usize) -> Result<Self, WeftError> {
        if buf.len() < HEADER_SIZE {
            return Err(WeftError::TooShort(buf.len(), HEADER_SIZE));
        }

        let msg_type = MessageType::try_from(buf[0])?;
        let timestamp_ms = u64::from_be_bytes(
            buf[1..9]
                .try_into()
                .map_err(|_| WeftError::TooShort(buf.len(), HEADER_SIZE))?,
        );
        let payload_len = u32::from_be_bytes(
            buf[9..13]
                .try_into()
                .map_err(|_| WeftError::TooShort(buf.len(), HEADER_SIZE))?,
        );

        if payload_len as usize > max_payload {
            return Err(WeftError::PayloadTooLarge(payload_len as usize, max_payload));
        }

        Ok(Self {
            msg_type,
            timestamp_ms,
            payload_len,
        })
    }
}

/// Parse a full wire message into its header and payload slice.
///
/// Trailing bytes beyond `payload_len` are tolerated; a buffer shorter than
/// the declared payload is an error.
pub fn parse(raw: &[u8]) -> Result<(MessageHeader, &[u8]), WeftError> {
    let header = MessageHeader::decode(raw)?;
    let end = HEADER_SIZE + header.payload_len as usize;
    if raw.len() < end {
        return Err(WeftError::TooShort(raw.len(), end));
    }
    Ok((header, &raw[HEADER_SIZE..end]))
}

/// An encoded screen frame.
///
/// The image bytes are opaque to the transport; only the producer and the
/// presenting side agree on the encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMessage {
    pub width: u16,
    pub height: u16,
    pub frame_number: u32,
    pub data: Bytes,
}

impl FrameMessage {
    /// Encode into a full wire message (header included).
    pub fn encode(&self, timestamp_ms: u64) -> Vec<u8> {
        let payload_len = FRAME_PREFIX_SIZE + self.data.len();
        let header = MessageHeader::new(MessageType::Frame, timestamp_ms, payload_len as u32);

        let mut out = Vec::with_capacity(HEADER_SIZE + payload_len);
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&self.width.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.frame_number.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode from a message payload (header already stripped).
    pub fn decode(payload: &[u8]) -> Result<Self, WeftError> {
        if payload.len() < FRAME_PREFIX_SIZE {
            return Err(WeftError::TooShort(payload.len(), FRAME_PREFIX_SIZE));
        }

        let width = u16::from_be_bytes([payload[0], payload[1]]);
        let height = u16::from_be_bytes([payload[2], payload[3]]);
        let frame_number = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);

        Ok(Self {
            width,
            height,
            frame_number,
            data: Bytes::copy_from_slice(&payload[FRAME_PREFIX_SIZE..]),
        })
    }
}

/// Input event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum InputEventType {
    MouseMove = 1,
    MouseDown = 2,
    MouseUp = 3,
    MouseScroll = 4,
    KeyDown = 5,
    KeyUp = 6,
}

impl TryFrom<u8> for InputEventType {
    type Error = WeftError;

    fn try_from(value: u8) -> Result<Self, WeftError> {
        match value {
            1 => Ok(Self::MouseMove),
            2 => Ok(Self::MouseDown),
            3 => Ok(Self::MouseUp),
            4 => Ok(Self::MouseScroll),
            5 => Ok(Self::KeyDown),
            6 => Ok(Self::KeyUp),
            other => Err(WeftError::UnknownInputEvent(other)),
        }
    }
}

/// Mouse buttons. The wire value 0 means "no button" and maps to `None` via
/// [`InputMessage::mouse_button`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MouseButton {
    Left = 1,
    Middle = 2,
    Right = 3,
}

impl MouseButton {
    fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Left),
            2 => Some(Self::Middle),
            3 => Some(Self::Right),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Keyboard modifier mask carried with every input event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Modifiers: u8 {
        const SHIFT = 0x01;
        const CTRL = 0x02;
        const ALT = 0x04;
        const META = 0x08;
    }
}

/// A viewer input event in its fixed wire layout.
///
/// `scroll_delta` is carried unsigned; consumers fold it back to signed via
/// [`InputMessage::scroll_amount`], a two's-complement reinterpretation of
/// the 16-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputMessage {
    pub event_type: InputEventType,
    pub x: u16,
    pub y: u16,
    pub button: u8,
    pub key_code: u16,
    pub modifiers: Modifiers,
    pub scroll_delta: u16,
}

impl InputMessage {
    pub fn mouse_move(x: u16, y: u16) -> Self {
        Self {
            event_type: InputEventType::MouseMove,
            x,
            y,
            button: 0,
            key_code: 0,
            modifiers: Modifiers::empty(),
            scroll_delta: 0,
        }
    }

    pub fn mouse_down(x: u16, y: u16, button: MouseButton) -> Self {
        Self {
            event_type: InputEventType::MouseDown,
            button: button as u8,
            ..Self::mouse_move(x, y)
        }
    }

    pub fn mouse_up(x: u16, y: u16, button: MouseButton) -> Self {
        Self {
            event_type: InputEventType::MouseUp,
            button: button as u8,
            ..Self::mouse_move(x, y)
        }
    }

    pub fn scroll(x: u16, y: u16, delta: i16) -> Self {
        Self {
            event_type: InputEventType::MouseScroll,
            scroll_delta: delta as u16,
            ..Self::mouse_move(x, y)
        }
    }

    pub fn key_down(key_code: u16, modifiers: Modifiers) -> Self {
        Self {
            event_type: InputEventType::KeyDown,
            x: 0,
            y: 0,
            button: 0,
            key_code,
            modifiers,
            scroll_delta: 0,
        }
    }

    pub fn key_up(key_code: u16, modifiers: Modifiers) -> Self {
        Self {
            event_type: InputEventType::KeyUp,
            ..Self::key_down(key_code, modifiers)
        }
    }

    /// Button as an enum, `None` for non-button events.
    pub fn mouse_button(&self) -> Option<MouseButton> {
        MouseButton::from_wire(self.button)
    }

    /// Scroll amount with the unsigned wire value folded back to signed.
    pub fn scroll_amount(&self) -> i16 {
        self.scroll_delta as i16
    }

    /// Encode into a full wire message (header included).
    pub fn encode(&self, timestamp_ms: u64) -> Vec<u8> {
        let header =
            MessageHeader::new(MessageType::Input, timestamp_ms, INPUT_RECORD_SIZE as u32);

        let mut out = Vec::with_capacity(HEADER_SIZE + INPUT_RECORD_SIZE);
        out.extend_from_slice(&header.encode());
        out.push(self.event_type as u8);
        out.extend_from_slice(&self.x.to_be_bytes());
        out.extend_from_slice(&self.y.to_be_bytes());
        out.push(self.button);
        out.extend_from_slice(&self.key_code.to_be_bytes());
        out.push(self.modifiers.bits());
        out.extend_from_slice(&self.scroll_delta.to_be_bytes());
        out
    }

    /// Decode from a message payload (header already stripped).
    ///
    /// The record layout is fixed, so anything but exactly
    /// [`INPUT_RECORD_SIZE`] bytes is malformed.
    pub fn decode(payload: &[u8]) -> Result<Self, WeftError> {
        if payload.len() != INPUT_RECORD_SIZE {
            return Err(WeftError::Malformed(format!(
                "input record must be {INPUT_RECORD_SIZE} bytes, got {}",
                payload.len()
            )));
        }

        Ok(Self {
            event_type: InputEventType::try_from(payload[0])?,
            x: u16::from_be_bytes([payload[1], payload[2]]),
            y: u16::from_be_bytes([payload[3], payload[4]]),
            button: payload[5],
            key_code: u16::from_be_bytes([payload[6], payload[7]]),
            modifiers: Modifiers::from_bits_truncate(payload[8]),
            scroll_delta: u16::from_be_bytes([payload[9], payload[10]]),
        })
    }
}
