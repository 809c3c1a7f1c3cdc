//! Viewer transport state machine.
//!
//! One WebSocket to the relay: frames and control answers in, input events
//! and control requests out. Input only flows while the host has granted
//! control; a revoke takes effect at the next event boundary, so in-flight
//! events are dropped rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use farsight_common::net::{next_data, ws_config, CLOSE_TIMEOUT, RESPONSE_TIMEOUT};
use farsight_common::Error;
use weft_core::envelope::{
    self, ClientJoin, ClientJoined, Disconnect, EnvelopeTag, ErrorPayload, Notice,
};
use weft_core::{
    message, normalize_session_code, now_ms, FrameMessage, InputMessage, MessageType, MouseButton,
};

use crate::display::DisplayState;
use crate::present::FramePresenter;

const OUTBOX_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Viewer configuration.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub relay_url: String,
    pub session_code: String,
    /// Initial display scale (0.5 = half size).
    pub scale: f64,
}

impl ViewerConfig {
    pub fn new(relay_url: impl Into<String>, session_code: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            session_code: session_code.into(),
            scale: 1.0,
        }
    }
}

#[derive(Debug)]
enum Command {
    RequestControl,
    Input(InputMessage),
    Shutdown,
}

#[derive(Debug)]
struct Shared {
    control_granted: AtomicBool,
    display: Mutex<DisplayState>,
}

/// Cloneable handle for driving a running viewer from a UI task.
#[derive(Clone)]
pub struct ViewerHandle {
    cmd_tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

impl ViewerHandle {
    /// Ask the host for input control. The answer arrives later as a
    /// control envelope.
    pub async fn request_control(&self) {
        let _ = self.cmd_tx.send(Command::RequestControl).await;
    }

    pub fn has_control(&self) -> bool {
        self.shared.control_granted.load(Ordering::Relaxed)
    }

    /// Record a window resize so pointer mapping follows the new extents.
    pub fn resize(&self, width: u32, height: u32) {
        if let Ok(mut display) = self.shared.display.lock() {
            display.resize(width, height);
        }
    }

    /// Map a local pointer position into host capture coordinates.
    pub fn map_pointer(&self, x: u32, y: u32) -> (u16, u16) {
        self.shared
            .display
            .lock()
            .map(|display| display.map_pointer(x, y))
            .unwrap_or((0, 0))
    }

    /// Queue an input event. Dropped by the network task unless control is
    /// granted.
    pub async fn send_input(&self, event: InputMessage) {
        let _ = self.cmd_tx.send(Command::Input(event)).await;
    }

    /// Pointer moved in local display coordinates.
    pub async fn pointer_moved(&self, x: u32, y: u32) {
        let (rx, ry) = self.map_pointer(x, y);
        self.send_input(InputMessage::mouse_move(rx, ry)).await;
    }

    /// Mouse button pressed in local display coordinates.
    pub async fn button_pressed(&self, x: u32, y: u32, button: MouseButton) {
        let (rx, ry) = self.map_pointer(x, y);
        self.send_input(InputMessage::mouse_down(rx, ry, button)).await;
    }

    /// Mouse button released in local display coordinates.
    pub async fn button_released(&self, x: u32, y: u32, button: MouseButton) {
        let (rx, ry) = self.map_pointer(x, y);
        self.send_input(InputMessage::mouse_up(rx, ry, button)).await;
    }

    /// Scroll at a local display position.
    pub async fn scrolled(&self, x: u32, y: u32, delta: i16) {
        let (rx, ry) = self.map_pointer(x, y);
        self.send_input(InputMessage::scroll(rx, ry, delta)).await;
    }

    /// Leave the session cleanly.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}

/// Viewer side of a relay session.
pub struct ViewerAgent {
    session_code: String,
    ws: WsStream,
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<Command>,
    cmd_rx: mpsc::Receiver<Command>,
}

impl ViewerAgent {
    /// Connect to the relay and join a session by code.
    pub async fn join(config: ViewerConfig) -> farsight_common::Result<Self> {
        let code = normalize_session_code(&config.session_code);
        if code.is_empty() {
            return Err(Error::config("session code required"));
        }

        info!("connecting to relay: {}", config.relay_url);
        info!("session code: {}", code);

        let (mut ws, _) =
            connect_async_with_config(config.relay_url.as_str(), Some(ws_config()), false).await?;

        let join = envelope::encode(
            EnvelopeTag::ClientJoin,
            &ClientJoin {
                session_code: code.clone(),
            },
        );
        ws.send(Message::Binary(join)).await?;

        let response = timeout(RESPONSE_TIMEOUT, next_data(&mut ws))
            .await
            .map_err(|_| Error::timeout("join response"))??
            .ok_or_else(|| Error::transport_closed("relay closed during join"))?;

        match envelope::tag_of(&response) {
            Some(EnvelopeTag::ClientJoined) => {
                let payload: ClientJoined = envelope::decode(&response)?;
                info!("connected to session: {}", payload.session_code);
            }
            Some(EnvelopeTag::Error) => {
                let err = envelope::decode::<ErrorPayload>(&response)
                    .unwrap_or_else(|_| ErrorPayload::new("unspecified relay error"));
                return Err(Error::remote(err.error));
            }
            Some(EnvelopeTag::Disconnect) => {
                // The session went away between code entry and join.
                let why = envelope::decode::<Disconnect>(&response)
                    .map(|d| d.why().to_string())
                    .unwrap_or_else(|_| "Unknown".into());
                return Err(Error::transport_closed(format!(
                    "session ended before join completed: {why}"
                )));
            }
            _ => return Err(Error::internal("unexpected join response")),
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        Ok(Self {
            session_code: code,
            ws,
            shared: Arc::new(Shared {
                control_granted: AtomicBool::new(false),
                display: Mutex::new(DisplayState::new(config.scale)),
            }),
            cmd_tx,
            cmd_rx,
        })
    }

    pub fn session_code(&self) -> &str {
        &self.session_code
    }

    /// Handle for input, control requests, and shutdown from other tasks.
    pub fn handle(&self) -> ViewerHandle {
        ViewerHandle {
            cmd_tx: self.cmd_tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Receive frames and control answers until the session ends or a
    /// handle asks for shutdown.
    pub async fn run(self, mut presenter: impl FramePresenter) -> Result<()> {
        let Self {
            session_code,
            ws,
            shared,
            cmd_tx,
            mut cmd_rx,
        } = self;

        let (ws_sink, mut ws_source) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOX_CAPACITY);

        let writer = tokio::spawn(async move {
            let mut ws_sink = ws_sink;
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = timeout(CLOSE_TIMEOUT, ws_sink.close()).await;
        });

        let result = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::RequestControl) => {
                        if !shared.control_granted.load(Ordering::Relaxed) {
                            let request = envelope::encode(
                                EnvelopeTag::RequestControl,
                                &Notice::new("Requesting remote control"),
                            );
                            let _ = out_tx.send(Message::Binary(request)).await;
                            info!("control request sent to host");
                        }
                    }
                    Some(Command::Input(event)) => {
                        // Gate at the send boundary: a revoke drops events
                        // already queued behind it.
                        if shared.control_granted.load(Ordering::Relaxed) {
                            let _ = out_tx.send(Message::Binary(event.encode(now_ms()))).await;
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = out_tx.send(Message::Close(None)).await;
                        break Ok(());
                    }
                },
                msg = ws_source.next() => {
                    let data = match msg {
                        Some(Ok(Message::Text(text))) => text.into_bytes(),
                        Some(Ok(Message::Binary(data))) => data,
                        Some(Ok(Message::Close(_))) | None => {
                            info!("relay connection closed");
                            break Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => break Err(err.into()),
                    };
                    if handle_message(&data, &shared, &mut presenter) {
                        break Ok(());
                    }
                }
            }
        };

        drop(cmd_tx);
        drop(out_tx);
        let _ = writer.await;

        info!("viewer left session {}", session_code);
        result
    }
}

/// Dispatch one inbound message by its first byte. Returns `true` when the
/// session is over.
fn handle_message(data: &[u8], shared: &Shared, presenter: &mut impl FramePresenter) -> bool {
    match envelope::tag_of(data) {
        Some(EnvelopeTag::Disconnect) => {
            let why = envelope::decode::<Disconnect>(data)
                .map(|d| d.why().to_string())
                .unwrap_or_else(|_| "Unknown".into());
            info!("disconnected: {}", why);
            return true;
        }
        Some(EnvelopeTag::Error) => {
            if let Ok(err) = envelope::decode::<ErrorPayload>(data) {
                warn!("relay error: {}", err.error);
            }
        }
        Some(EnvelopeTag::ControlGranted) => {
            shared.control_granted.store(true, Ordering::Relaxed);
            info!("remote control granted by host");
        }
        Some(EnvelopeTag::ControlDenied) => {
            shared.control_granted.store(false, Ordering::Relaxed);
            info!("remote control denied by host");
        }
        Some(EnvelopeTag::ControlRevoked) => {
            shared.control_granted.store(false, Ordering::Relaxed);
            info!("remote control revoked by host");
        }
        _ => {
            // Not an envelope the viewer handles: try the application layer.
            let Ok((header, payload)) = message::parse(data) else {
                return false;
            };
            if header.msg_type != MessageType::Frame {
                return false;
            }
            match FrameMessage::decode(payload) {
                Ok(frame) => {
                    if let Ok(mut display) = shared.display.lock() {
                        display.on_frame(frame.width, frame.height);
                    }
                    if let Err(err) = presenter.present(&frame) {
                        // Stay connected; the last good frame stands.
                        warn!("presenter error: {}", err);
                    }
                }
                Err(err) => debug!("could not parse frame: {}", err),
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::present::RecordingPresenter;
    use bytes::Bytes;

    fn shared() -> Shared {
        Shared {
            control_granted: AtomicBool::new(false),
            display: Mutex::new(DisplayState::new(1.0)),
        }
    }

    #[test]
    fn control_envelopes_flip_the_grant_flag() {
        let shared = shared();
        let mut presenter = RecordingPresenter::new();

        let granted = envelope::encode(EnvelopeTag::ControlGranted, &Notice::new("Control granted"));
        assert!(!handle_message(&granted, &shared, &mut presenter));
        assert!(shared.control_granted.load(Ordering::Relaxed));

        let revoked = envelope::encode(EnvelopeTag::ControlRevoked, &Notice::new("Control revoked"));
        assert!(!handle_message(&revoked, &shared, &mut presenter));
        assert!(!shared.control_granted.load(Ordering::Relaxed));

        let denied = envelope::encode(EnvelopeTag::ControlDenied, &Notice::new("Request denied"));
        assert!(!handle_message(&denied, &shared, &mut presenter));
        assert!(!shared.control_granted.load(Ordering::Relaxed));
    }

    #[test]
    fn disconnect_stops_the_session() {
        let shared = shared();
        let mut presenter = RecordingPresenter::new();

        let bye = envelope::encode(
            EnvelopeTag::Disconnect,
            &Disconnect::reason("Host disconnected"),
        );
        assert!(handle_message(&bye, &shared, &mut presenter));
    }

    #[test]
    fn frames_reach_the_presenter_and_update_geometry() {
        let shared = shared();
        let mut presenter = RecordingPresenter::new();

        let frame = FrameMessage {
            width: 1024,
            height: 768,
            frame_number: 3,
            data: Bytes::from_static(b"jpeg-ish"),
        };
        assert!(!handle_message(&frame.encode(now_ms()), &shared, &mut presenter));

        let received = presenter.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], frame);

        let display = shared.display.lock().expect("display lock");
        assert_eq!(display.remote_size(), (1024, 768));
    }

    #[test]
    fn garbage_messages_are_ignored() {
        let shared = shared();
        let mut presenter = RecordingPresenter::new();

        assert!(!handle_message(b"\xffgarbage", &shared, &mut presenter));
        assert!(!handle_message(&[], &shared, &mut presenter));
        assert!(presenter.received().is_empty());
    }
}
