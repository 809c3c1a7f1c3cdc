#![forbid(unsafe_code)]

//! Farsight host agent.
//!
//! The host registers with a relay, publishes the session code it gets back,
//! and once a viewer attaches streams encoded frames at a target cadence
//! while applying granted viewer input to the local machine. Screen capture
//! and input injection stay behind the [`capture::FrameSource`] and
//! [`input::InputSink`] seams; this crate owns only the transport state
//! machine around them.

pub mod agent;
pub mod capture;
pub mod input;
pub mod quality;

pub use agent::{HostAgent, HostConfig, HostHandle};
pub use capture::{EncodedFrame, FrameSource, TestCardSource};
pub use input::{InputSink, LogInputSink, RecordingSink};
pub use quality::QualityController;
