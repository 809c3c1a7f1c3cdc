//! Session registry and lifecycle.
//!
//! A session exists in the registry exactly as long as its host transport is
//! live. The registry keeps two maps, `code -> Session` and
//! `connection -> code`, and every mutation of either happens under one
//! exclusive acquisition so they can never disagree.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use weft_core::generate_session_code;

/// How many allocation attempts before the code space counts as exhausted.
const MAX_CODE_ATTEMPTS: usize = 100;

/// Identifier the accept loop assigns to each connection.
pub type ConnId = u64;

/// Outbox feeding a connection's writer task.
pub type Outbox = mpsc::Sender<Message>;

/// An active relay session.
#[derive(Debug)]
pub struct Session {
    pub code: String,
    pub host: Outbox,
    pub host_conn: ConnId,
    pub host_connected_at: Instant,
    pub viewer: Option<Outbox>,
    pub viewer_conn: Option<ConnId>,
    pub viewer_connected_at: Option<Instant>,

    // Stats
    pub bytes_to_viewer: u64,
    pub bytes_to_host: u64,
    pub frames_relayed: u64,
}

impl Session {
    fn new(code: String, host_conn: ConnId, host: Outbox) -> Self {
        Self {
            code,
            host,
            host_conn,
            host_connected_at: Instant::now(),
            viewer: None,
            viewer_conn: None,
            viewer_connected_at: None,
            bytes_to_viewer: 0,
            bytes_to_host: 0,
            frames_relayed: 0,
        }
    }

    pub fn has_viewer(&self) -> bool {
        self.viewer.is_some()
    }
}

/// Registry errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("could not allocate a unique session code")]
    CodeSpaceExhausted,
    #[error("session not found")]
    NotFound,
    #[error("session already has a viewer")]
    Busy,
}

/// Which side of a session a departing connection was.
#[derive(Debug)]
pub enum Departed {
    /// The host left; the whole session is gone. The caller notifies and
    /// closes the orphaned viewer, if any.
    Host(Session),
    /// The viewer left; the session stays alive for a re-join. The caller
    /// notifies the host.
    Viewer { code: String, host: Outbox },
    /// The connection never made it into a session.
    Unknown,
}

/// Snapshot of registry-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub paired_sessions: usize,
    pub total_sessions: u64,
    pub total_bytes_relayed: u64,
}

/// Forwarding direction, for stats accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToViewer,
    ToHost,
}

/// All live sessions, plus lifetime totals.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<String, Session>,
    by_conn: HashMap<ConnId, String>,
    total_sessions: u64,
    total_bytes_relayed: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for a registering host, allocating a unique code.
    pub fn register_host(&mut self, conn: ConnId, host: Outbox) -> Result<String, RegistryError> {
        self.register_host_with(conn, host, generate_session_code)
    }

    /// Same as [`Self::register_host`] with an injected code generator.
    pub fn register_host_with(
        &mut self,
        conn: ConnId,
        host: Outbox,
        mut generate: impl FnMut() -> String,
    ) -> Result<String, RegistryError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate();
            if self.sessions.contains_key(&code) {
                continue;
            }
            self.sessions
                .insert(code.clone(), Session::new(code.clone(), conn, host));
            self.by_conn.insert(conn, code.clone());
            self.total_sessions += 1;
            return Ok(code);
        }
        Err(RegistryError::CodeSpaceExhausted)
    }

    /// Attach a viewer to a session. Returns the host outbox so the caller
    /// can notify it without re-locking.
    pub fn attach_viewer(
        &mut self,
        code: &str,
        conn: ConnId,
        viewer: Outbox,
    ) -> Result<Outbox, RegistryError> {
        let session = self.sessions.get_mut(code).ok_or(RegistryError::NotFound)?;
        if session.has_viewer() {
            return Err(RegistryError::Busy);
        }

        session.viewer = Some(viewer);
        session.viewer_conn = Some(conn);
        session.viewer_connected_at = Some(Instant::now());
        self.by_conn.insert(conn, code.to_string());
        Ok(session.host.clone())
    }

    /// Current forwarding target for messages arriving from the host side.
    /// `None` while the session is unpaired (such messages are dropped).
    pub fn viewer_of(&self, code: &str) -> Option<Outbox> {
        self.sessions.get(code).and_then(|s| s.viewer.clone())
    }

    /// Current forwarding target for messages arriving from the viewer side.
    pub fn host_of(&self, code: &str) -> Option<Outbox> {
        self.sessions.get(code).map(|s| s.host.clone())
    }

    /// Account one forwarded message.
    pub fn record_forward(&mut self, code: &str, direction: Direction, bytes: usize) {
        if let Some(session) = self.sessions.get_mut(code) {
            match direction {
                Direction::ToViewer => {
                    session.bytes_to_viewer += bytes as u64;
                    session.frames_relayed += 1;
                }
                Direction::ToHost => session.bytes_to_host += bytes as u64,
            }
            self.total_bytes_relayed += bytes as u64;
        }
    }

    /// Remove a departing connection from the registry and report which side
    /// of which session it was.
    pub fn disconnect(&mut self, conn: ConnId) -> Departed {
        let Some(code) = self.by_conn.remove(&conn) else {
            return Departed::Unknown;
        };

        let is_host = match self.sessions.get(&code) {
            Some(session) => session.host_conn == conn,
            None => return Departed::Unknown,
        };

        if is_host {
            // Host gone: the session goes with it.
            let Some(session) = self.sessions.remove(&code) else {
                return Departed::Unknown;
            };
            if let Some(viewer_conn) = session.viewer_conn {
                self.by_conn.remove(&viewer_conn);
            }
            return Departed::Host(session);
        }

        let Some(session) = self.sessions.get_mut(&code) else {
            return Departed::Unknown;
        };

        if session.viewer_conn == Some(conn) {
            // Viewer gone: keep the session so another viewer can join.
            session.viewer = None;
            session.viewer_conn = None;
            session.viewer_connected_at = None;
            Departed::Viewer {
                code,
                host: session.host.clone(),
            }
        } else {
            Departed::Unknown
        }
    }

    /// Drain every session for shutdown. The caller owns notification.
    pub fn drain(&mut self) -> Vec<Session> {
        self.by_conn.clear();
        self.sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.sessions.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_sessions: self.sessions.len(),
            paired_sessions: self.sessions.values().filter(|s| s.has_viewer()).count(),
            total_sessions: self.total_sessions,
            total_bytes_relayed: self.total_bytes_relayed,
        }
    }
}
