//! Connectivity engine abstraction
//!
//! The engine owns the secure transport, provisioning handshake and message
//! delivery. The runtime only sees this seam: it starts a session, hands over
//! encoded attributes, and receives pushed events.

use crate::config::{DeviceIdentity, OnboardingConfig};
use async_trait::async_trait;
use std::time::Duration;
use stdevice_shared::{
    wire::WireError, CapabilityKey, Level, NotificationEvent, SequenceNumber, Status,
    TypedValue, UnknownCode,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Inbound command for a capability
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEvent {
    pub capability: CapabilityKey,
    pub command: String,
    pub args: Vec<TypedValue>,
}

impl CommandEvent {
    pub fn new(capability: CapabilityKey, command: impl Into<String>) -> Self {
        Self {
            capability,
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<TypedValue>) -> Self {
        self.args = args;
        self
    }
}

/// Events pushed by the engine into the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Notification(NotificationEvent),
    Status { status: Status, level: Level },
    CapabilityInit(CapabilityKey),
    Command(CommandEvent),
}

impl EngineEvent {
    /// Build a status event from the engine's raw codes
    pub fn from_raw_status(status: i32, level: i32) -> Result<Self, UnknownCode> {
        Ok(EngineEvent::Status {
            status: Status::try_from(status)?,
            level: Level::try_from(level)?,
        })
    }

    /// Build a notification event from the engine's raw type code
    pub fn from_raw_notification(
        code: i32,
        remaining_time: u32,
        sequence_number: u32,
    ) -> Result<Self, UnknownCode> {
        let noti = match code {
            0 => NotificationEvent::DeviceDeleted,
            1 => NotificationEvent::RateLimitExceeded {
                remaining_time,
                sequence_number,
            },
            2 => NotificationEvent::QuotaReached,
            3 => NotificationEvent::SendFailed,
            _ => {
                return Err(UnknownCode {
                    kind: "notification",
                    code,
                })
            }
        };
        Ok(EngineEvent::Notification(noti))
    }
}

pub type EventSender = mpsc::Sender<EngineEvent>;

/// Attribute update handed to the engine send path
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAttribute {
    pub capability: CapabilityKey,
    pub attribute: String,
    pub value: TypedValue,
}

/// Everything the engine needs to run a session
#[derive(Debug, Clone)]
pub struct EngineSession {
    pub events: EventSender,
    pub capabilities: Vec<CapabilityKey>,
    pub timeout: Duration,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine already started")]
    AlreadyStarted,

    #[error("Engine not started")]
    NotStarted,

    #[error("Engine did not accept the session within {0:?}")]
    StartTimeout(Duration),

    #[error("Outbound queue full")]
    QueueFull,

    #[error("Engine closed")]
    Closed,

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
}

/// The external cloud connectivity engine
#[async_trait]
pub trait ConnectivityEngine: Send + Sync + 'static {
    /// Create a connection context from the two configuration documents
    fn init(identity: &DeviceIdentity, onboarding: &OnboardingConfig) -> Result<Self, EngineError>
    where
        Self: Sized;

    /// Begin the session; events are delivered through `session.events`
    async fn start(&self, session: EngineSession) -> Result<(), EngineError>;

    /// Queue an attribute for delivery. Fire-and-forget: a sequence number
    /// means the engine accepted it, not that the cloud received it.
    fn send_attribute(&self, attribute: &EncodedAttribute) -> Result<SequenceNumber, EngineError>;

    /// Human-readable name for this engine
    fn name(&self) -> &'static str;
}
