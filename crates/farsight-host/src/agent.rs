//! Host transport state machine.
//!
//! One WebSocket to the relay carries everything: registration, frames out,
//! input and control envelopes in. The agent runs a paced streaming task and
//! a receive loop over the same socket, serialized through a small outbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use farsight_common::net::{next_data, ws_config, CLOSE_TIMEOUT, RESPONSE_TIMEOUT};
use farsight_common::Error;
use weft_core::envelope::{
    self, Disconnect, EnvelopeTag, ErrorPayload, HostRegister, HostRegistered, Notice,
};
use weft_core::{message, now_ms, FrameMessage, InputMessage, MessageType};

use crate::capture::FrameSource;
use crate::input::InputSink;
use crate::quality::{QualityController, DEFAULT_MAX_QUALITY, DEFAULT_MIN_QUALITY};

/// Outbox kept small on purpose: enqueue time then tracks socket
/// back-pressure, which is what the quality controller measures.
const OUTBOX_CAPACITY: usize = 4;

/// Capture failures tolerated before backing off a full second.
const MAX_CONSECUTIVE_CAPTURE_ERRORS: u32 = 30;

/// Cadence of the streaming stats line.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Host agent configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub relay_url: String,
    pub fps: u16,
    pub quality: u8,
    pub min_quality: u8,
    pub max_quality: u8,
    /// Advisory capture dimensions sent at registration.
    pub screen_width: u16,
    pub screen_height: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8765".into(),
            fps: 30,
            quality: 70,
            min_quality: DEFAULT_MIN_QUALITY,
            max_quality: DEFAULT_MAX_QUALITY,
            screen_width: 1280,
            screen_height: 720,
        }
    }
}

#[derive(Debug)]
enum Command {
    GrantControl,
    RevokeControl,
    Shutdown,
}

#[derive(Debug, Default)]
struct Flags {
    viewer_attached: AtomicBool,
    control_granted: AtomicBool,
}

/// Cloneable handle for driving a running agent from a UI task.
///
/// Commands are marshalled over a channel to the network task, so callers
/// never touch the socket directly.
#[derive(Clone)]
pub struct HostHandle {
    cmd_tx: mpsc::Sender<Command>,
    flags: Arc<Flags>,
}

impl HostHandle {
    /// Grant input control to the attached viewer.
    pub async fn grant_control(&self) {
        let _ = self.cmd_tx.send(Command::GrantControl).await;
    }

    /// Withdraw input control from the viewer.
    pub async fn revoke_control(&self) {
        let _ = self.cmd_tx.send(Command::RevokeControl).await;
    }

    /// Close the session cleanly.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }

    pub fn control_granted(&self) -> bool {
        self.flags.control_granted.load(Ordering::Relaxed)
    }

    pub fn viewer_attached(&self) -> bool {
        self.flags.viewer_attached.load(Ordering::Relaxed)
    }
}

/// Hook invoked from the receive loop when the viewer asks for control.
///
/// The hook decides asynchronously: it must eventually call
/// [`HostHandle::grant_control`] or [`HostHandle::revoke_control`] on the
/// handle it receives.
pub type ApprovalHook = Box<dyn Fn(HostHandle) + Send + Sync>;

/// Host side of a relay session.
pub struct HostAgent {
    config: HostConfig,
    session_code: String,
    ws: WsStream,
    flags: Arc<Flags>,
    approval: Option<ApprovalHook>,
    cmd_tx: mpsc::Sender<Command>,
    cmd_rx: mpsc::Receiver<Command>,
}

impl HostAgent {
    /// Connect to the relay and register. Returns once the session code is
    /// known; streaming starts with [`Self::run`].
    pub async fn connect(config: HostConfig) -> farsight_common::Result<Self> {
        info!("connecting to relay: {}", config.relay_url);

        let (mut ws, _) =
            connect_async_with_config(config.relay_url.as_str(), Some(ws_config()), false).await?;

        let register = envelope::encode(
            EnvelopeTag::HostRegister,
            &HostRegister {
                screen_width: Some(config.screen_width),
                screen_height: Some(config.screen_height),
                fps: Some(config.fps),
            },
        );
        ws.send(Message::Binary(register)).await?;

        let response = timeout(RESPONSE_TIMEOUT, next_data(&mut ws))
            .await
            .map_err(|_| Error::timeout("registration response"))??
            .ok_or_else(|| Error::transport_closed("relay closed during registration"))?;

        match envelope::tag_of(&response) {
            Some(EnvelopeTag::HostRegistered) => {
                let payload: HostRegistered = envelope::decode(&response)?;
                info!(
                    "registered with relay, session code: {}",
                    payload.session_code
                );

                let (cmd_tx, cmd_rx) = mpsc::channel(16);
                Ok(Self {
                    config,
                    session_code: payload.session_code,
                    ws,
                    flags: Arc::new(Flags::default()),
                    approval: None,
                    cmd_tx,
                    cmd_rx,
                })
            }
            Some(EnvelopeTag::Error) => {
                let err = envelope::decode::<ErrorPayload>(&response)
                    .unwrap_or_else(|_| ErrorPayload::new("unspecified relay error"));
                Err(Error::remote(err.error))
            }
            _ => Err(Error::internal("unexpected registration response")),
        }
    }

    /// The shareable session code handed out by the relay.
    pub fn session_code(&self) -> &str {
        &self.session_code
    }

    /// Handle for grant/revoke/shutdown from other tasks.
    pub fn handle(&self) -> HostHandle {
        HostHandle {
            cmd_tx: self.cmd_tx.clone(),
            flags: Arc::clone(&self.flags),
        }
    }

    /// Register the UI callback consulted on REQUEST_CONTROL. Without one,
    /// every request is denied immediately.
    pub fn set_approval_hook(&mut self, hook: impl Fn(HostHandle) + Send + Sync + 'static) {
        self.approval = Some(Box::new(hook));
    }

    /// Stream frames and apply granted input until the relay goes away or a
    /// handle asks for shutdown.
    pub async fn run(
        self,
        frame_source: impl FrameSource + 'static,
        mut input_sink: impl InputSink,
    ) -> Result<()> {
        let Self {
            config,
            session_code,
            ws,
            flags,
            approval,
            cmd_tx,
            mut cmd_rx,
        } = self;

        info!("session {}: waiting for a viewer", session_code);

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

        let streamer = tokio::spawn(stream_loop(
            config.clone(),
            out_tx.clone(),
            Arc::clone(&flags),
            frame_source,
        ));

        let handle = HostHandle {
            cmd_tx: cmd_tx.clone(),
            flags: Arc::clone(&flags),
        };

        let result = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::GrantControl) => {
                        flags.control_granted.store(true, Ordering::Relaxed);
                        let granted =
                            envelope::encode(EnvelopeTag::ControlGranted, &Notice::new("Control granted"));
                        let _ = out_tx.send(Message::Binary(granted)).await;
                        info!("remote control granted to viewer");
                    }
                    Some(Command::RevokeControl) => {
                        flags.control_granted.store(false, Ordering::Relaxed);
                        let revoked =
                            envelope::encode(EnvelopeTag::ControlRevoked, &Notice::new("Control revoked"));
                        let _ = out_tx.send(Message::Binary(revoked)).await;
                        info!("remote control revoked");
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
                    handle_envelope(&data, &flags, &approval, &handle, &out_tx, &mut input_sink).await;
                }
            }
        };

        streamer.abort();
        drop(handle);
        drop(cmd_tx);
        drop(out_tx);
        let _ = writer.await;

        info!("host agent stopped");
        result
    }
}

/// Dispatch one inbound message by its first byte.
async fn handle_envelope(
    data: &[u8],
    flags: &Flags,
    approval: &Option<ApprovalHook>,
    handle: &HostHandle,
    out_tx: &mpsc::Sender<Message>,
    input_sink: &mut impl InputSink,
) {
    match envelope::tag_of(data) {
        Some(EnvelopeTag::ClientConnected) => {
            flags.viewer_attached.store(true, Ordering::Relaxed);
            flags.control_granted.store(false, Ordering::Relaxed);
            info!("viewer connected, starting stream");
        }
        Some(EnvelopeTag::Disconnect) => {
            let why = envelope::decode::<Disconnect>(data)
                .map(|d| d.why().to_string())
                .unwrap_or_else(|_| "Unknown".into());
            info!("disconnect: {}", why);
            flags.viewer_attached.store(false, Ordering::Relaxed);
            flags.control_granted.store(false, Ordering::Relaxed);
        }
        Some(EnvelopeTag::Error) => {
            if let Ok(err) = envelope::decode::<ErrorPayload>(data) {
                warn!("relay error: {}", err.error);
            }
        }
        Some(EnvelopeTag::RequestControl) => {
            info!("viewer requested remote control");
            match approval {
                Some(hook) => hook(handle.clone()),
                None => {
                    let denied = envelope::encode(
                        EnvelopeTag::ControlDenied,
                        &Notice::new("Host has no UI to approve"),
                    );
                    let _ = out_tx.send(Message::Binary(denied)).await;
                    info!("remote control denied: no approval hook registered");
                }
            }
        }
        Some(EnvelopeTag::ControlRevoked) => {
            // Peer-initiated; mirrors a local revoke.
            flags.control_granted.store(false, Ordering::Relaxed);
            info!("control revoked");
        }
        _ => {
            // Not an envelope the host handles: try the application layer.
            let Ok((header, payload)) = message::parse(data) else {
                return;
            };
            if header.msg_type != MessageType::Input {
                return;
            }
            let Ok(event) = InputMessage::decode(payload) else {
                return;
            };
            if !flags.control_granted.load(Ordering::Relaxed) {
                // Ungranted input is dropped, never applied.
                return;
            }
            if let Err(err) = input_sink.apply(&event) {
                debug!("input injection error: {}", err);
            }
        }
    }
}

/// Capture, encode, and ship frames at the target cadence while a viewer is
/// attached.
async fn stream_loop(
    config: HostConfig,
    out_tx: mpsc::Sender<Message>,
    flags: Arc<Flags>,
    mut source: impl FrameSource,
) {
    let target_interval = Duration::from_secs_f64(1.0 / f64::from(config.fps.max(1)));
    let mut quality = QualityController::new(
        config.quality,
        config.min_quality,
        config.max_quality,
        target_interval,
    );

    let mut ticker = tokio::time::interval(target_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut consecutive_errors = 0u32;
    let mut frames_sent = 0u64;
    let mut bytes_sent = 0u64;
    let mut report_at = Instant::now();

    loop {
        if !flags.viewer_attached.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(100)).await;
            report_at = Instant::now();
            continue;
        }

        ticker.tick().await;

        let frame = match source.next_frame(quality.quality()) {
            Ok(frame) => {
                consecutive_errors = 0;
                frame
            }
            Err(err) => {
                consecutive_errors += 1;
                if consecutive_errors > MAX_CONSECUTIVE_CAPTURE_ERRORS {
                    warn!("too many capture errors: {}", err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                } else {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                continue;
            }
        };

        let wire = FrameMessage {
            width: frame.width,
            height: frame.height,
            frame_number: frame.frame_number,
            data: frame.data,
        }
        .encode(now_ms());
        let wire_len = wire.len() as u64;

        let send_start = Instant::now();
        if out_tx.send(Message::Binary(wire)).await.is_err() {
            break;
        }
        quality.record_send(send_start.elapsed());

        frames_sent += 1;
        bytes_sent += wire_len;

        let elapsed = report_at.elapsed();
        if elapsed >= STATS_INTERVAL {
            info!(
                "streaming: {:.1} fps, {:.1} KB/s, quality {}",
                frames_sent as f64 / elapsed.as_secs_f64(),
                bytes_sent as f64 / elapsed.as_secs_f64() / 1024.0,
                quality.quality()
            );
            report_at = Instant::now();
            frames_sent = 0;
            bytes_sent = 0;
        }
    }

    debug!("stream loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::RecordingSink;

    fn test_handle(flags: &Arc<Flags>) -> (HostHandle, mpsc::Receiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        (
            HostHandle {
                cmd_tx,
                flags: Arc::clone(flags),
            },
            cmd_rx,
        )
    }

    #[tokio::test]
    async fn input_is_gated_on_control_grant() {
        let flags = Arc::new(Flags::default());
        let (handle, _cmd_rx) = test_handle(&flags);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let mut sink = RecordingSink::new();

        let wire = InputMessage::mouse_move(10, 20).encode(now_ms());

        handle_envelope(&wire, &flags, &None, &handle, &out_tx, &mut sink).await;
        assert!(sink.applied().is_empty(), "ungranted input must be dropped");

        flags.control_granted.store(true, Ordering::Relaxed);
        handle_envelope(&wire, &flags, &None, &handle, &out_tx, &mut sink).await;
        assert_eq!(sink.applied().len(), 1);

        // Input handling never produces outbound traffic.
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn control_request_without_hook_is_denied() {
        let flags = Arc::new(Flags::default());
        let (handle, _cmd_rx) = test_handle(&flags);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let mut sink = RecordingSink::new();

        let request = envelope::encode(
            EnvelopeTag::RequestControl,
            &Notice::new("Requesting remote control"),
        );
        handle_envelope(&request, &flags, &None, &handle, &out_tx, &mut sink).await;

        let reply = out_rx.try_recv().expect("denial queued");
        let Message::Binary(data) = reply else {
            panic!("expected binary denial");
        };
        assert_eq!(envelope::tag_of(&data), Some(EnvelopeTag::ControlDenied));
        assert!(!flags.control_granted.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn viewer_attach_resets_control_grant() {
        let flags = Arc::new(Flags::default());
        let (handle, _cmd_rx) = test_handle(&flags);
        let (out_tx, _out_rx) = mpsc::channel(4);
        let mut sink = RecordingSink::new();

        flags.control_granted.store(true, Ordering::Relaxed);
        let connected =
            envelope::encode(EnvelopeTag::ClientConnected, &Notice::new("Client connected"));
        handle_envelope(&connected, &flags, &None, &handle, &out_tx, &mut sink).await;

        assert!(flags.viewer_attached.load(Ordering::Relaxed));
        assert!(!flags.control_granted.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn disconnect_clears_pairing_and_control() {
        let flags = Arc::new(Flags::default());
        let (handle, _cmd_rx) = test_handle(&flags);
        let (out_tx, _out_rx) = mpsc::channel(4);
        let mut sink = RecordingSink::new();

        flags.viewer_attached.store(true, Ordering::Relaxed);
        flags.control_granted.store(true, Ordering::Relaxed);

        let bye = envelope::encode(
            EnvelopeTag::Disconnect,
            &Disconnect::message("Client disconnected"),
        );
        handle_envelope(&bye, &flags, &None, &handle, &out_tx, &mut sink).await;

        assert!(!flags.viewer_attached.load(Ordering::Relaxed));
        assert!(!flags.control_granted.load(Ordering::Relaxed));
    }
}
