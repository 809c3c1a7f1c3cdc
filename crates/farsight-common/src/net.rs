//! Transport defaults shared by the relay, host, and viewer.
//!
//! All three components must agree on message-size limits, and neither
//! endpoint sends protocol-level pings: when a session is paired both sides
//! produce traffic continuously, so liveness falls out of the data flow.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};

/// Budget for a register/join response from the relay.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Budget for a graceful close handshake.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket configuration used on every Farsight transport.
pub fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(weft_core::MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(weft_core::MAX_MESSAGE_SIZE);
    config
}

/// Next Text/Binary payload from a WebSocket, with keepalive frames skipped.
///
/// Returns `None` once the peer has closed.
pub async fn next_data<S>(stream: &mut S) -> Result<Option<Vec<u8>>, tungstenite::Error>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => return Ok(Some(text.into_bytes())),
            Message::Binary(data) => return Ok(Some(data)),
            Message::Close(_) => return Ok(None),
            _ => continue,
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_config_caps_message_size() {
        let config = ws_config();
        assert_eq!(config.max_message_size, Some(10 * 1024 * 1024));
        assert_eq!(config.max_frame_size, Some(10 * 1024 * 1024));
    }
}
