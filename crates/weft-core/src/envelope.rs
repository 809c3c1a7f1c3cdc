//! Relay envelope messages.
//!
//! Every envelope message is a single tag byte followed by a UTF-8 JSON
//! payload:
//!
//! ```text
//! +--------+----------------------------------+
//! |  tag   |  JSON payload (may be empty)     |
//! | 1 byte |                                  |
//! +--------+----------------------------------+
//! ```
//!
//! The relay interprets registration, join, and teardown tags. The control
//! tags ride through the relay as opaque payload and are interpreted by the
//! peer endpoint.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::WeftError;

/// Envelope tag byte values.
///
/// Values below 0x20 are disjoint from the application message type space;
/// `RelayData` marks the start of the forwarded-opaque range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EnvelopeTag {
    /// Host -> relay: register and request a session code.
    HostRegister = 0x01,
    /// Relay -> host: registration confirmed, code attached.
    HostRegistered = 0x02,
    /// Viewer -> relay: join a session by code.
    ClientJoin = 0x03,
    /// Relay -> viewer: join confirmed.
    ClientJoined = 0x04,
    /// Relay -> host: a viewer attached to the session.
    ClientConnected = 0x05,
    /// Session teardown notification.
    Disconnect = 0x10,
    /// Error report; the offending transport is closed afterwards.
    Error = 0x11,
    /// Keepalive request (unused in relay mode).
    Ping = 0x12,
    /// Keepalive response (unused in relay mode).
    Pong = 0x13,
    /// Viewer -> host: ask for input control.
    RequestControl = 0x15,
    /// Host -> viewer: input control granted.
    ControlGranted = 0x16,
    /// Host -> viewer: input control denied.
    ControlDenied = 0x17,
    /// Host -> viewer: input control withdrawn.
    ControlRevoked = 0x18,
    /// Opaque forwarded data.
    RelayData = 0x20,
}

impl TryFrom<u8> for EnvelopeTag {
    type Error = WeftError;

    fn try_from(value: u8) -> Result<Self, WeftError> {
        match value {
            0x01 => Ok(Self::HostRegister),
            0x02 => Ok(Self::HostRegistered),
            0x03 => Ok(Self::ClientJoin),
            0x04 => Ok(Self::ClientJoined),
            0x05 => Ok(Self::ClientConnected),
            0x10 => Ok(Self::Disconnect),
            0x11 => Ok(Self::Error),
            0x12 => Ok(Self::Ping),
            0x13 => Ok(Self::Pong),
            0x15 => Ok(Self::RequestControl),
            0x16 => Ok(Self::ControlGranted),
            0x17 => Ok(Self::ControlDenied),
            0x18 => Ok(Self::ControlRevoked),
            0x20 => Ok(Self::RelayData),
            other => Err(WeftError::UnknownEnvelopeTag(other)),
        }
    }
}

/// HOST_REGISTER payload. Advisory only; the relay ignores every field for
/// session logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostRegister {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_width: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_height: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u16>,
}

/// HOST_REGISTERED payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRegistered {
    pub session_code: String,
    #[serde(default)]
    pub message: String,
}

/// CLIENT_JOIN payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientJoin {
    #[serde(default)]
    pub session_code: String,
}

/// CLIENT_JOINED payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientJoined {
    pub session_code: String,
    #[serde(default)]
    pub message: String,
}

/// Free-text payload used by CLIENT_CONNECTED and the control tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notice {
    #[serde(default)]
    pub message: String,
}

impl Notice {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// DISCONNECT payload. The relay fills `reason` on session teardown and
/// `message` on viewer-slot clear; both senders exist in the wild, so both
/// fields are accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Disconnect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Disconnect {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            message: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            reason: None,
            message: Some(message.into()),
        }
    }

    /// Best human-readable explanation carried by the payload.
    pub fn why(&self) -> &str {
        self.message
            .as_deref()
            .or(self.reason.as_deref())
            .unwrap_or("Unknown")
    }
}

/// ERROR payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

impl ErrorPayload {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Encode an envelope message: tag byte followed by the JSON payload.
///
/// Envelope encoding never fails; the payload shapes in this module always
/// serialize.
pub fn encode<T: Serialize>(tag: EnvelopeTag, payload: &T) -> Vec<u8> {
    let body = serde_json::to_vec(payload).unwrap_or_default();
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(tag as u8);
    out.extend_from_slice(&body);
    out
}

/// Envelope tag of a raw message, if its first byte carries one.
pub fn tag_of(raw: &[u8]) -> Option<EnvelopeTag> {
    raw.first().and_then(|b| EnvelopeTag::try_from(*b).ok())
}

/// Decode the JSON payload that follows the tag byte.
pub fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T, WeftError> {
    if raw.is_empty() {
        return Err(WeftError::TooShort(0, 1));
    }
    Ok(serde_json::from_slice(&raw[1..])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip() {
        for value in [
            0x01u8, 0x02, 0x03, 0x04, 0x05, 0x10, 0x11, 0x12, 0x13, 0x15, 0x16, 0x17, 0x18, 0x20,
        ] {
            let tag = EnvelopeTag::try_from(value).expect("known tag");
            assert_eq!(tag as u8, value);
        }
        assert!(EnvelopeTag::try_from(0x42).is_err());
        assert!(EnvelopeTag::try_from(0xF0).is_err());
    }

    #[test]
    fn encode_decode_host_registered() {
        let raw = encode(
            EnvelopeTag::HostRegistered,
            &HostRegistered {
                session_code: "ABC234".into(),
                message: "Share this code with the remote user".into(),
            },
        );
        assert_eq!(raw[0], EnvelopeTag::HostRegistered as u8);

        let payload: HostRegistered = decode(&raw).expect("decode");
        assert_eq!(payload.session_code, "ABC234");
    }

    #[test]
    fn decode_tolerates_missing_optional_fields() {
        let raw = [&[EnvelopeTag::ClientJoin as u8][..], b"{}"].concat();
        let join: ClientJoin = decode(&raw).expect("decode");
        assert!(join.session_code.is_empty());
    }

    #[test]
    fn disconnect_prefers_message_over_reason() {
        let both = Disconnect {
            reason: Some("Host disconnected".into()),
            message: Some("Client disconnected".into()),
        };
        assert_eq!(both.why(), "Client disconnected");
        assert_eq!(Disconnect::reason("Host disconnected").why(), "Host disconnected");
        assert_eq!(Disconnect::default().why(), "Unknown");
    }

    #[test]
    fn decode_rejects_empty_and_garbage() {
        assert!(decode::<Notice>(&[]).is_err());
        let garbage = [&[EnvelopeTag::Error as u8][..], b"not json"].concat();
        assert!(decode::<ErrorPayload>(&garbage).is_err());
    }
}
