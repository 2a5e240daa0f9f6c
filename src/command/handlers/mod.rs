//! Capability handlers installed by the device application

pub mod switch;

use crate::capability::CapabilityHandle;
use anyhow::Context;
use stdevice_shared::Value;
use tracing::{debug, info};

/// Report a new attribute value and log the sequence number it was given
pub(crate) fn report(
    handle: &CapabilityHandle,
    attribute: &str,
    value: impl Into<Value>,
    what: &str,
) -> anyhow::Result<()> {
    if let Ok(Some(previous)) = handle.attribute(attribute) {
        debug!("[{}] {} was {}", handle.capability().to_uppercase(), attribute, previous);
    }

    let seq = handle
        .set_attribute(attribute, value)
        .with_context(|| format!("Error updating {} attribute", attribute))?;
    info!(
        "[{}] {}; sequence number = {}",
        handle.capability().to_uppercase(),
        what,
        seq
    );
    Ok(())
}
