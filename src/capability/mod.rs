//! Capability registry and handles
//!
//! A capability is identified by its (component, capability) pair. The
//! registry binds init and command handlers to it and routes attribute
//! updates to the connectivity engine.

mod registry;

pub use registry::{
    CapabilityHandle, CapabilityRegistry, CommandHandler, InitHandler, RegistryError,
};

#[cfg(test)]
pub(crate) use registry::{testing, AttributeError};
