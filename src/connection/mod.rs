//! Connectivity engine seam and connection tracking
//!
//! This module handles:
//! - The trait the runtime uses to talk to the cloud connectivity engine
//! - Events the engine pushes back into the runtime
//! - Connection status tracking and notification logging
//! - A loopback engine for development and tests

mod engine;
mod loopback;
mod monitor;

pub use engine::{
    CommandEvent, ConnectivityEngine, EncodedAttribute, EngineError, EngineEvent, EngineSession,
};
pub use loopback::{parse_console_line, LoopbackEngine, DEFAULT_COMPONENT};
pub use monitor::ConnectionMonitor;

#[cfg(test)]
pub(crate) use loopback::LoopbackConfig;
