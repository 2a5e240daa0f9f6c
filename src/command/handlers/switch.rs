//! Switch capability: `main/switch` with `on` / `off` commands

use super::report;
use crate::capability::{CapabilityHandle, CapabilityRegistry, RegistryError};
use crate::connection::DEFAULT_COMPONENT;
use tracing::info;

pub const CAPABILITY: &str = "switch";
pub const ATTRIBUTE: &str = "switch";

/// Register the switch capability and its command handlers
pub fn install(registry: &CapabilityRegistry) -> Result<CapabilityHandle, RegistryError> {
    let handle = registry.register_capability(DEFAULT_COMPONENT, CAPABILITY, |cap| {
        info!("[SWITCH] Switch initialization invoked");
        report(cap, ATTRIBUTE, "off", "Switch attribute initialized to OFF")
    })?;

    registry.register_command(&handle, "on", |cap, _| {
        info!("[SWITCH] Received Switch ON command");
        report(cap, ATTRIBUTE, "on", "Switch attribute updated to ON")
    })?;

    registry.register_command(&handle, "off", |cap, _| {
        info!("[SWITCH] Received Switch OFF command");
        report(cap, ATTRIBUTE, "off", "Switch attribute updated to OFF")
    })?;

    Ok(handle)
}
