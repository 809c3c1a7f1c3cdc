#![forbid(unsafe_code)]

//! Farsight relay - pairs hosts and viewers by session code.
//!
//! The relay:
//! 1. Hands each registering host a short shareable session code
//! 2. Attaches at most one viewer per session, by code
//! 3. Forwards traffic between the pair without inspecting it

pub mod registry;
pub mod server;

pub use registry::{Registry, RegistryStats, Session};
pub use server::RelayServer;
