#![forbid(unsafe_code)]

//! Weft wire protocol.
//!
//! Two framing schemes share the WebSocket transport between the relay and
//! the endpoints:
//!
//! - the *envelope* layer ([`envelope`]): a single tag byte followed by a
//!   small JSON payload, interpreted by the relay (registration, join,
//!   teardown) and by the endpoints (control grants);
//! - the *application* layer ([`message`]): a fixed 13-byte binary header
//!   followed by a typed payload (screen frames, input events), forwarded
//!   verbatim by the relay.
//!
//! The tag spaces are arranged so first-byte dispatch is unambiguous: every
//! envelope tag an endpoint handles is below 0x20, while application type
//! values start at 0x20. Endpoints inspect the first byte of each inbound
//! message, try the envelope layer first, and fall through to the
//! application header parse.

pub mod code;
pub mod envelope;
pub mod message;

pub use code::{
    generate_session_code, is_valid_session_code, normalize_session_code, SESSION_CODE_ALPHABET,
    SESSION_CODE_LEN,
};
pub use envelope::EnvelopeTag;
pub use message::{
    FrameMessage, InputEventType, InputMessage, MessageHeader, MessageType, Modifiers, MouseButton,
    HEADER_SIZE, MAX_PAYLOAD_SIZE,
};

/// Largest WebSocket message accepted by any Weft transport, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Wall-clock milliseconds for message timestamps.
///
/// Timestamps are informational only; nothing orders on them.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum WeftError {
    #[error("buffer too short: {0} bytes, need {1}")]
    TooShort(usize, usize),

    #[error("payload length {0} exceeds maximum {1}")]
    PayloadTooLarge(usize, usize),

    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("unknown envelope tag: 0x{0:02x}")]
    UnknownEnvelopeTag(u8),

    #[error("unknown input event type: {0}")]
    UnknownInputEvent(u8),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}
