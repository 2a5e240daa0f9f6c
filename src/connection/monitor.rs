//! Connection Monitor
//!
//! Feeds engine status reports and notifications through the connection
//! state machine, logs what they mean and publishes them to subscribers.

use crate::events::{DeviceEvent, EventBus};
use std::sync::{Mutex, PoisonError};
use stdevice_shared::{
    ConnectionState, ConnectionStateMachine, Level, NotificationEvent, Status, StatusTransition,
};
use tracing::{debug, error, info, warn};

/// Tracks the device connection state for the runtime
pub struct ConnectionMonitor {
    fsm: Mutex<ConnectionStateMachine>,
    events: EventBus,
}

impl ConnectionMonitor {
    pub fn new(events: EventBus) -> Self {
        Self {
            fsm: Mutex::new(ConnectionStateMachine::new()),
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.fsm.lock().unwrap_or_else(PoisonError::into_inner).state()
    }

    pub fn connected_count(&self) -> u64 {
        self.fsm
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connected_count()
    }

    /// Apply a status report from the engine
    pub fn on_status(&self, status: Status, level: Level) -> StatusTransition {
        // Published under the lock so subscribers see transitions in the order applied
        let mut fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
        let transition = fsm.on_status(status, level);

        let event = match transition {
            StatusTransition::Connected { from } => {
                info!("[STATUS] ** CONNECTED TO SERVER ** (was: {})", from);
                DeviceEvent::Connected
            }
            StatusTransition::Failed { state, .. } => {
                error!("[STATUS] {}", state);
                DeviceEvent::ConnectionFailed(state)
            }
            StatusTransition::Changed { from, to } => {
                info!("[STATUS] {}", to);
                DeviceEvent::StatusChanged { from, to }
            }
            StatusTransition::Unchanged(state) => {
                debug!("[STATUS] Still {}", state);
                return transition;
            }
        };

        // No subscribers is fine
        let _ = self.events.send(event);
        drop(fsm);
        transition
    }

    /// Surface an engine notification
    pub fn on_notification(&self, notification: NotificationEvent) {
        match notification {
            NotificationEvent::DeviceDeleted => warn!("[NOTI] DEVICE DELETED"),
            NotificationEvent::RateLimitExceeded { .. } => {
                warn!("[NOTI] {}", notification.to_string().to_uppercase())
            }
            NotificationEvent::QuotaReached => warn!("[NOTI] Message quota reached"),
            NotificationEvent::SendFailed => error!("[NOTI] Failed to deliver event"),
        }
        let _ = self.events.send(DeviceEvent::Notification(notification));
    }
}
