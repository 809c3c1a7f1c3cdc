#![forbid(unsafe_code)]

//! Farsight viewer agent.
//!
//! The viewer joins a session by code, hands incoming frames to a
//! [`present::FramePresenter`], and forwards input events to the host while
//! it holds granted control. Decoding and display are external concerns;
//! this crate owns the transport state machine and the pointer-coordinate
//! mapping into the host's capture space.

pub mod display;
pub mod present;
pub mod viewer;

pub use display::DisplayState;
pub use present::{FramePresenter, NullPresenter, RecordingPresenter};
pub use viewer::{ViewerAgent, ViewerConfig, ViewerHandle};
