//! Events surfaced to the application layer

use stdevice_shared::{CapabilityKey, ConnectionState, NotificationEvent};
use tokio::sync::broadcast;

/// Capacity of the application event bus
pub const EVENT_BUS_CAPACITY: usize = 64;

/// Observable events published while the device runs
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Generic status change
    StatusChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Device became fully connected to the server
    Connected,
    /// Engine reported a failure level
    ConnectionFailed(ConnectionState),
    /// Notification forwarded from the engine
    Notification(NotificationEvent),
    /// A capability init handler finished successfully
    CapabilityInitialized(CapabilityKey),
    /// A command handler finished
    CommandCompleted {
        capability: CapabilityKey,
        command: String,
        succeeded: bool,
    },
}

pub type EventBus = broadcast::Sender<DeviceEvent>;

pub fn event_bus() -> EventBus {
    broadcast::channel(EVENT_BUS_CAPACITY).0
}
