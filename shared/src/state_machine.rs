//! Connection State Machine
//!
//! Tracks the status/level pair reported by the connectivity engine. The engine
//! is the only source of truth, so every reported pair is accepted; the machine
//! only classifies what the change means for observers.

use std::fmt;

use crate::{Level, Status};

/// Current status and level of the device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionState {
    pub status: Status,
    pub level: Level,
}

impl ConnectionState {
    /// State before the engine has reported anything
    pub const INITIAL: ConnectionState = ConnectionState {
        status: Status::Idle,
        level: Level::Stay,
    };

    pub const fn new(status: Status, level: Level) -> Self {
        Self { status, level }
    }

    /// (Connecting, Done) is the fully connected condition
    pub fn is_connected(&self) -> bool {
        self.status == Status::Connecting && self.level == Level::Done
    }

    pub fn is_failure(&self) -> bool {
        self.level == Level::Fail
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.status.describe(), self.level.describe())
    }
}

/// How a reported status changed the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// Device just became fully connected
    Connected { from: ConnectionState },
    /// The engine reported a failure level
    Failed {
        from: ConnectionState,
        state: ConnectionState,
    },
    /// Any other change
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Same pair reported again
    Unchanged(ConnectionState),
}

/// The connection state machine
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current: ConnectionState,
    connected_count: u64,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.current
    }

    /// Number of times the device has become fully connected
    pub fn connected_count(&self) -> u64 {
        self.connected_count
    }

    /// Apply a status report from the engine
    pub fn on_status(&mut self, status: Status, level: Level) -> StatusTransition {
        let from = self.current;
        let to = ConnectionState::new(status, level);
        self.current = to;

        // Failures are reported every time, even when repeated
        if to.is_failure() {
            return StatusTransition::Failed { from, state: to };
        }

        if from == to {
            return StatusTransition::Unchanged(to);
        }

        if to.is_connected() {
            self.connected_count += 1;
            return StatusTransition::Connected { from };
        }

        StatusTransition::Changed { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = ConnectionStateMachine::new();
        assert_eq!(fsm.state(), ConnectionState::INITIAL);
        assert!(!fsm.state().is_connected());
    }

    #[test]
    fn test_provisioning_flow() {
        let mut fsm = ConnectionStateMachine::new();

        let result = fsm.on_status(Status::Provisioning, Level::Start);
        assert!(matches!(result, StatusTransition::Changed { .. }));

        let result = fsm.on_status(Status::Provisioning, Level::ConnectedToMobile);
        assert!(matches!(result, StatusTransition::Changed { .. }));

        let result = fsm.on_status(Status::Connecting, Level::SigningIn);
        assert!(matches!(result, StatusTransition::Changed { .. }));

        let result = fsm.on_status(Status::Connecting, Level::Done);
        assert!(matches!(result, StatusTransition::Connected { .. }));
        assert!(fsm.state().is_connected());
    }

    #[test]
    fn test_connected_reported_once() {
        let mut fsm = ConnectionStateMachine::new();

        let first = fsm.on_status(Status::Connecting, Level::Done);
        let second = fsm.on_status(Status::Connecting, Level::Done);

        assert!(matches!(first, StatusTransition::Connected { .. }));
        assert!(matches!(second, StatusTransition::Unchanged(_)));
        assert_eq!(fsm.connected_count(), 1);
    }

    #[test]
    fn test_fail_at_any_status() {
        let mut fsm = ConnectionStateMachine::new();

        for status in [Status::Idle, Status::Provisioning, Status::Connecting] {
            let result = fsm.on_status(status, Level::Fail);
            assert!(matches!(result, StatusTransition::Failed { state, .. } if state.status == status));
        }

        // Repeated failure is still a failure
        let result = fsm.on_status(Status::Connecting, Level::Fail);
        assert!(matches!(result, StatusTransition::Failed { .. }));
    }

    #[test]
    fn test_any_transition_accepted() {
        let mut fsm = ConnectionStateMachine::new();

        fsm.on_status(Status::Connecting, Level::Done);
        let result = fsm.on_status(Status::Idle, Level::Stay);
        assert!(matches!(result, StatusTransition::Changed { .. }));

        // Reconnect counts again
        let result = fsm.on_status(Status::Connecting, Level::Done);
        assert!(matches!(result, StatusTransition::Connected { .. }));
        assert_eq!(fsm.connected_count(), 2);
    }

    #[test]
    fn test_state_display() {
        let state = ConnectionState::new(Status::Provisioning, Level::SigningIn);
        assert_eq!(state.to_string(), "Onboarding...signing in");
    }
}
