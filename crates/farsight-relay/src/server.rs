//! Relay connection handling.
//!
//! Each accepted WebSocket gets one identity-defining first message
//! (HOST_REGISTER or CLIENT_JOIN) and then turns into a forward loop. The
//! relay never looks inside forwarded payloads; it interprets only its own
//! envelope and moves everything else verbatim to the paired transport.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tracing::{debug, info, warn};

use farsight_common::net::{next_data, ws_config};
use weft_core::envelope::{
    self, ClientJoin, ClientJoined, Disconnect, EnvelopeTag, ErrorPayload, HostRegister,
    HostRegistered, Notice,
};
use weft_core::normalize_session_code;

use crate::registry::{ConnId, Departed, Direction, Outbox, Registry, RegistryError};

/// Messages queued per connection before the reading side is held back.
const OUTBOX_CAPACITY: usize = 128;

/// How often registry counters are reported.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Connection handling errors.
///
/// The `Display` text of client-visible variants goes out verbatim in the
/// ERROR envelope, so the wording is part of the wire contract.
#[derive(Debug, thiserror::Error)]
enum AcceptError {
    #[error("Empty message")]
    Empty,
    #[error("Expected HOST_REGISTER or CLIENT_JOIN, got {0}")]
    UnexpectedFirst(u8),
    #[error("Invalid join request")]
    InvalidJoin,
    #[error("Session code required")]
    CodeRequired,
    #[error("Session not found: {0}")]
    UnknownSession(String),
    #[error("Session already has a client connected")]
    SessionBusy,
    #[error("Could not generate unique session code")]
    CodeSpaceExhausted,
    #[error("no first message within budget")]
    FirstMessageTimeout,
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("connection closed")]
    Closed,
}

impl AcceptError {
    /// Whether this error is reported to the offending side before closing.
    fn client_visible(&self) -> bool {
        !matches!(
            self,
            Self::FirstMessageTimeout | Self::Transport(_) | Self::Closed
        )
    }
}

fn error_message(text: &str) -> Message {
    Message::Binary(envelope::encode(
        EnvelopeTag::Error,
        &ErrorPayload::new(text),
    ))
}

/// WebSocket relay pairing hosts and viewers by session code.
pub struct RelayServer {
    listener: TcpListener,
    registry: Mutex<Registry>,
    first_message_timeout: Duration,
}

impl RelayServer {
    /// Bind the listening socket. Forwarding starts with [`Self::run`].
    pub async fn bind(listen: SocketAddr, first_message_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        info!("relay listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry: Mutex::new(Registry::new()),
            first_message_timeout,
        })
    }

    /// Actual bound address; useful when listening on port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until cancelled.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
        stats_tick.tick().await;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_connection(stream, peer).await {
                            debug!("connection from {} ended: {}", peer, err);
                        }
                    });
                }
                _ = stats_tick.tick() => {
                    let stats = self.registry.lock().await.stats();
                    if stats.active_sessions > 0 {
                        info!(
                            "sessions: {} active ({} paired), {} lifetime, {} bytes relayed",
                            stats.active_sessions,
                            stats.paired_sessions,
                            stats.total_sessions,
                            stats.total_bytes_relayed
                        );
                    }
                }
            }
        }
    }

    /// Tear down every live session with a shutdown notice.
    pub async fn shutdown(&self) {
        let sessions = self.registry.lock().await.drain();
        for session in sessions {
            let bye = Message::Binary(envelope::encode(
                EnvelopeTag::Disconnect,
                &Disconnect::reason("Server shutting down"),
            ));
            if let Some(viewer) = session.viewer {
                let _ = viewer.send(bye.clone()).await;
                let _ = viewer.send(Message::Close(None)).await;
            }
            let _ = session.host.send(bye).await;
            let _ = session.host.send(Message::Close(None)).await;
            info!("session closed: {} (Server shutting down)", session.code);
        }
        info!("relay stopped");
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), AcceptError> {
        let ws = accept_async_with_config(stream, Some(ws_config())).await?;
        info!("new connection from {}", peer);

        let (mut sink, mut source) = ws.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOX_CAPACITY);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let conn = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        let result = self.dispatch_first(conn, &tx, &mut source, peer).await;

        if let Err(ref err) = result {
            if err.client_visible() {
                warn!("rejecting {}: {}", peer, err);
                let _ = tx.send(error_message(&err.to_string())).await;
            }
        }
        let _ = tx.send(Message::Close(None)).await;

        self.finish_disconnect(conn).await;
        result
    }

    /// Read the identity-defining first message and dispatch by its tag.
    async fn dispatch_first(
        &self,
        conn: ConnId,
        tx: &Outbox,
        source: &mut WsSource,
        peer: SocketAddr,
    ) -> Result<(), AcceptError> {
        let first = match timeout(self.first_message_timeout, next_data(source)).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => return Err(AcceptError::Closed),
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Err(AcceptError::FirstMessageTimeout),
        };

        if first.is_empty() {
            return Err(AcceptError::Empty);
        }

        match EnvelopeTag::try_from(first[0]) {
            Ok(EnvelopeTag::HostRegister) => self.serve_host(conn, tx, source, &first, peer).await,
            Ok(EnvelopeTag::ClientJoin) => self.serve_viewer(conn, tx, source, &first).await,
            _ => Err(AcceptError::UnexpectedFirst(first[0])),
        }
    }

    async fn serve_host(
        &self,
        conn: ConnId,
        tx: &Outbox,
        source: &mut WsSource,
        first: &[u8],
        peer: SocketAddr,
    ) -> Result<(), AcceptError> {
        // Advisory capture info; never consulted for session logic.
        if let Ok(info) = envelope::decode::<HostRegister>(first) {
            debug!(
                "host {} advertises {:?}x{:?} @ {:?} fps",
                peer, info.screen_width, info.screen_height, info.fps
            );
        }

        let code = self
            .registry
            .lock()
            .await
            .register_host(conn, tx.clone())
            .map_err(|_| AcceptError::CodeSpaceExhausted)?;

        info!("host registered: {}", code);

        let registered = envelope::encode(
            EnvelopeTag::HostRegistered,
            &HostRegistered {
                session_code: code.clone(),
                message: "Share this code with the remote user".into(),
            },
        );
        tx.send(Message::Binary(registered))
            .await
            .map_err(|_| AcceptError::Closed)?;

        self.forward_from_host(&code, source).await;
        Ok(())
    }

    async fn serve_viewer(
        &self,
        conn: ConnId,
        tx: &Outbox,
        source: &mut WsSource,
        first: &[u8],
    ) -> Result<(), AcceptError> {
        let join: ClientJoin = envelope::decode(first).map_err(|_| AcceptError::InvalidJoin)?;
        let code = normalize_session_code(&join.session_code);
        if code.is_empty() {
            return Err(AcceptError::CodeRequired);
        }

        let host = self
            .registry
            .lock()
            .await
            .attach_viewer(&code, conn, tx.clone())
            .map_err(|err| match err {
                RegistryError::Busy => AcceptError::SessionBusy,
                _ => AcceptError::UnknownSession(code.clone()),
            })?;

        info!("viewer joined session: {}", code);

        let joined = envelope::encode(
            EnvelopeTag::ClientJoined,
            &ClientJoined {
                session_code: code.clone(),
                message: "Connected to host".into(),
            },
        );
        tx.send(Message::Binary(joined))
            .await
            .map_err(|_| AcceptError::Closed)?;

        let connected = envelope::encode(EnvelopeTag::ClientConnected, &Notice::new("Client connected"));
        let _ = host.send(Message::Binary(connected)).await;

        self.forward_from_viewer(&code, source).await;
        Ok(())
    }

    /// Forward host traffic to the attached viewer; drop it while unpaired.
    async fn forward_from_host(&self, code: &str, source: &mut WsSource) {
        while let Some(message) = source.next().await {
            let message = match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(msg @ (Message::Text(_) | Message::Binary(_))) => msg,
                Ok(_) => continue,
            };

            let len = message.len();
            let Some(viewer) = self.registry.lock().await.viewer_of(code) else {
                // Unpaired: frames have no receiver, so they carry no value.
                continue;
            };

            if viewer.send(message).await.is_ok() {
                self.registry
                    .lock()
                    .await
                    .record_forward(code, Direction::ToViewer, len);
            }
        }
    }

    /// Forward viewer traffic to the host; exit when the session is gone.
    async fn forward_from_viewer(&self, code: &str, source: &mut WsSource) {
        while let Some(message) = source.next().await {
            let message = match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(msg @ (Message::Text(_) | Message::Binary(_))) => msg,
                Ok(_) => continue,
            };

            let len = message.len();
            let Some(host) = self.registry.lock().await.host_of(code) else {
                break;
            };

            if host.send(message).await.is_err() {
                break;
            }
            self.registry
                .lock()
                .await
                .record_forward(code, Direction::ToHost, len);
        }
    }

    /// Role-aware cleanup once a connection's read side has ended.
    async fn finish_disconnect(&self, conn: ConnId) {
        let departed = self.registry.lock().await.disconnect(conn);
        match departed {
            Departed::Host(session) => {
                info!("host disconnected, closing session: {}", session.code);
                if let Some(viewer) = session.viewer {
                    let bye = envelope::encode(
                        EnvelopeTag::Disconnect,
                        &Disconnect::reason("Host disconnected"),
                    );
                    let _ = viewer.send(Message::Binary(bye)).await;
                    let _ = viewer.send(Message::Close(None)).await;
                }
                info!(
                    "session {} relayed {} frames, {} bytes to viewer, {} bytes to host",
                    session.code, session.frames_relayed, session.bytes_to_viewer, session.bytes_to_host
                );
            }
            Departed::Viewer { code, host } => {
                info!("viewer disconnected from session: {}", code);
                let bye = envelope::encode(
                    EnvelopeTag::Disconnect,
                    &Disconnect::message("Client disconnected"),
                );
                let _ = host.send(Message::Binary(bye)).await;
            }
            Departed::Unknown => {}
        }
    }
}
