//! Input injection seam.
//!
//! Applying a viewer event to the local machine is platform work that lives
//! outside this crate. Injection failures are logged and dropped; a bad
//! event must never take the session down.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use weft_core::InputMessage;

/// Applies viewer input events to the local machine.
pub trait InputSink: Send {
    fn apply(&mut self, event: &InputMessage) -> Result<()>;
}

/// Sink for hosts without an injection backend: logs and discards.
#[derive(Debug, Default)]
pub struct LogInputSink;

impl InputSink for LogInputSink {
    fn apply(&mut self, event: &InputMessage) -> Result<()> {
        tracing::debug!(
            "input event {:?} at ({}, {})",
            event.event_type,
            event.x,
            event.y
        );
        Ok(())
    }
}

/// Sink that records every applied event, for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<InputMessage>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything applied so far.
    pub fn applied(&self) -> Vec<InputMessage> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl InputSink for RecordingSink {
    fn apply(&mut self, event: &InputMessage) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(*event);
        }
        Ok(())
    }
}
