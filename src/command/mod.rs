//! Command handling for the device
//!
//! This module handles:
//! - Routing inbound commands and capability init events to handlers
//! - Per-capability ordering of handler execution
//! - Containing handler errors and panics
//! - The handlers installed by the switch application

mod dispatcher;
pub mod handlers;

pub use dispatcher::{CommandDispatcher, DispatchOutcome};
