//! Switch Device Shared Types
//!
//! This crate provides the attribute value codec, the outbound wire framing and
//! the connection state machine shared by the device runtime and its tools.

pub mod provisioning;
pub mod state_machine;
pub mod value;
pub mod wire;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use state_machine::{ConnectionState, ConnectionStateMachine, StatusTransition};
pub use value::{decode, encode, Codec, EncodeError, TypedValue, Value, ValueType};

/// Limits shared by the runtime and the wire format
pub mod limits {
    /// Longest string attribute value accepted by the codec, in bytes
    pub const MAX_STRING_LEN: usize = 1024;

    /// Largest outbound frame accepted by the wire codec (64 KiB)
    pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

    /// Default time the engine is given to start, in seconds
    pub const DEFAULT_START_TIMEOUT_SECS: u64 = 15;

    /// Maximum number of arguments carried by a single command
    pub const MAX_COMMAND_ARGS: usize = 5;
}

/// Raw code that did not map to a known status, level or notification
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unknown {kind} code: {code}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub code: i32,
}

/// Connection status reported by the connectivity engine
///
/// The raw codes are distinct bits, but a status is always a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Idle,
    Provisioning,
    NeedsInteraction,
    Connecting,
}

impl Status {
    pub const fn code(self) -> i32 {
        match self {
            Status::Idle => 0b0001,
            Status::Provisioning => 0b0010,
            Status::NeedsInteraction => 0b0100,
            Status::Connecting => 0b1000,
        }
    }

    /// Operator-facing description of the status
    pub fn describe(self) -> &'static str {
        match self {
            Status::Idle => "Idle, not connected",
            Status::Provisioning => "Onboarding",
            Status::NeedsInteraction => "User interaction required",
            Status::Connecting => "Connecting to server",
        }
    }
}

impl TryFrom<i32> for Status {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0b0001 => Ok(Status::Idle),
            0b0010 => Ok(Status::Provisioning),
            0b0100 => Ok(Status::NeedsInteraction),
            0b1000 => Ok(Status::Connecting),
            _ => Err(UnknownCode { kind: "status", code }),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Progress level paired with every status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Stay,
    /// Also reported as "sign up" during provisioning
    Start,
    Done,
    Fail,
    ConnectedToMobile,
    SigningIn,
}

impl Level {
    pub const fn code(self) -> i32 {
        match self {
            Level::Stay => 0,
            Level::Start => 1,
            Level::Done => 2,
            Level::Fail => 3,
            Level::ConnectedToMobile => 4,
            Level::SigningIn => 6,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Level::Stay => "...staying",
            Level::Start => "...starting",
            Level::Done => "...DONE",
            Level::Fail => "...FAILED",
            Level::ConnectedToMobile => "...connected to mobile",
            Level::SigningIn => "...signing in",
        }
    }
}

impl TryFrom<i32> for Level {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Level::Stay),
            1 => Ok(Level::Start),
            2 => Ok(Level::Done),
            3 => Ok(Level::Fail),
            4 => Ok(Level::ConnectedToMobile),
            6 => Ok(Level::SigningIn),
            _ => Err(UnknownCode { kind: "level", code }),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Notifications pushed by the connectivity engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationEvent {
    /// The device was removed from the cloud account
    DeviceDeleted,
    /// Outbound events are being throttled
    RateLimitExceeded {
        remaining_time: u32,
        sequence_number: u32,
    },
    /// The daily message quota is exhausted
    QuotaReached,
    /// An event could not be delivered
    SendFailed,
}

impl NotificationEvent {
    pub const fn code(&self) -> i32 {
        match self {
            NotificationEvent::DeviceDeleted => 0,
            NotificationEvent::RateLimitExceeded { .. } => 1,
            NotificationEvent::QuotaReached => 2,
            NotificationEvent::SendFailed => 3,
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationEvent::DeviceDeleted => write!(f, "device deleted"),
            NotificationEvent::RateLimitExceeded {
                remaining_time,
                sequence_number,
            } => write!(
                f,
                "rate limit; remaining time: {}, sequence number: {}",
                remaining_time, sequence_number
            ),
            NotificationEvent::QuotaReached => write!(f, "quota reached"),
            NotificationEvent::SendFailed => write!(f, "send failed"),
        }
    }
}

/// Identifier assigned to a successfully queued outbound attribute update
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// Integer reported to callers that only understand the raw convention
    pub const FAILED_RAW: i64 = -1;

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Collapse a send result into the raw convention: the number, or -1
    pub fn raw_or_failed<E>(result: &Result<SequenceNumber, E>) -> i64 {
        match result {
            Ok(seq) => i64::try_from(seq.0).unwrap_or(i64::MAX),
            Err(_) => Self::FAILED_RAW,
        }
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// (component, capability) pair naming one capability instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CapabilityKey {
    pub component: String,
    pub capability: String,
}

impl CapabilityKey {
    pub fn new(component: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            capability: capability.into(),
        }
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component, self.capability)
    }
}
