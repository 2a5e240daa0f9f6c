//! Loopback connectivity engine
//!
//! Stands in for the cloud engine during development. It replays the status
//! sequence of a successful onboarding, frames outbound attributes onto an
//! in-process stream, and lets an operator inject inbound events.

use super::engine::{
    CommandEvent, ConnectivityEngine, EncodedAttribute, EngineError, EngineEvent, EngineSession,
    EventSender,
};
use crate::config::{DeviceIdentity, OnboardingConfig};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use stdevice_shared::wire::{self, AttributeEvent};
use stdevice_shared::{
    limits, CapabilityKey, Level, SequenceNumber, Status, TypedValue, UnknownCode,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::timeout;
use tracing::{debug, info};

/// Component used when a console line names only the capability
pub const DEFAULT_COMPONENT: &str = "main";

/// Status reports of a first-time onboarding followed by sign-in
const ONBOARDING_SEQUENCE: [(Status, Level); 6] = [
    (Status::Provisioning, Level::Start),
    (Status::Provisioning, Level::ConnectedToMobile),
    (Status::Provisioning, Level::Done),
    (Status::Connecting, Level::Start),
    (Status::Connecting, Level::SigningIn),
    (Status::Connecting, Level::Done),
];

/// Configuration for the loopback engine
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Delay between replayed status reports
    pub status_step: Duration,
    /// Capacity of the outbound frame stream
    pub outbound_capacity: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            status_step: Duration::from_millis(200),
            outbound_capacity: 100,
        }
    }
}

pub struct LoopbackEngine {
    device_name: String,
    config: LoopbackConfig,
    sequence: AtomicU64,
    started: AtomicBool,
    outbound_tx: mpsc::Sender<Bytes>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    events: Mutex<Option<EventSender>>,
}

impl LoopbackEngine {
    pub fn with_config(
        identity: &DeviceIdentity,
        onboarding: &OnboardingConfig,
        config: LoopbackConfig,
    ) -> Result<Self, EngineError> {
        identity
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        onboarding
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let device_name = format!(
            "{}-{}",
            onboarding.onboarding.device_onboarding_id, identity.device_info.serial_number
        );

        Ok(Self {
            device_name,
            config,
            sequence: AtomicU64::new(0),
            started: AtomicBool::new(false),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            events: Mutex::new(None),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Take the stream of framed outbound attributes (once)
    pub fn take_outbound(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Deliver an event as if it came from the cloud
    pub async fn inject(&self, event: EngineEvent) -> Result<(), EngineError> {
        let sender = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EngineError::NotStarted)?;
        sender.send(event).await.map_err(|_| EngineError::Closed)
    }
}

#[async_trait]
impl ConnectivityEngine for LoopbackEngine {
    fn init(identity: &DeviceIdentity, onboarding: &OnboardingConfig) -> Result<Self, EngineError> {
        Self::with_config(identity, onboarding, LoopbackConfig::default())
    }

    async fn start(&self, session: EngineSession) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        // The first report doubles as the session handshake
        let (status, level) = ONBOARDING_SEQUENCE[0];
        let first = EngineEvent::Status { status, level };
        match timeout(session.timeout, session.events.send(first)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(EngineError::Closed);
            }
            Err(_) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(EngineError::StartTimeout(session.timeout));
            }
        }

        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.events.clone());
        info!("[LOOPBACK] Session started for {}", self.device_name);

        let step = self.config.status_step;
        tokio::spawn(async move {
            replay_onboarding(session.events, session.capabilities, step).await;
        });

        Ok(())
    }

    fn send_attribute(&self, attribute: &EncodedAttribute) -> Result<SequenceNumber, EngineError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(EngineError::NotStarted);
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = AttributeEvent::new(
            &attribute.capability,
            attribute.attribute.clone(),
            &attribute.value,
            None,
            seq,
        )?;
        let frame = wire::encode_frame(&event)?;

        self.outbound_tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EngineError::QueueFull,
            TrySendError::Closed(_) => EngineError::Closed,
        })?;

        Ok(SequenceNumber::new(seq))
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

/// Replay the remaining onboarding reports, then initialize every capability
async fn replay_onboarding(events: EventSender, capabilities: Vec<CapabilityKey>, step: Duration) {
    for (status, level) in ONBOARDING_SEQUENCE.iter().skip(1) {
        tokio::time::sleep(step).await;
        let event = EngineEvent::Status {
            status: *status,
            level: *level,
        };
        if events.send(event).await.is_err() {
            debug!("[LOOPBACK] Runtime gone, stopping replay");
            return;
        }
    }

    for key in capabilities {
        if events.send(EngineEvent::CapabilityInit(key)).await.is_err() {
            return;
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("usage: [component/]capability command [args...] | !status <code> <level> | !noti <code> [remaining] [seq]")]
    Usage,

    #[error("not a number: {0:?}")]
    NotANumber(String),

    #[error("too many command arguments: {0} (max: {})", limits::MAX_COMMAND_ARGS)]
    TooManyArgs(usize),

    #[error(transparent)]
    UnknownCode(#[from] UnknownCode),
}

/// Parse one operator console line into an engine event
///
/// Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_console_line(line: &str) -> Result<Option<EngineEvent>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut tokens = line.split_whitespace();
    let head = tokens.next().ok_or(ConsoleError::Usage)?;

    match head {
        "!status" => {
            let status = number(tokens.next())?;
            let level = number(tokens.next())?;
            Ok(Some(EngineEvent::from_raw_status(status, level)?))
        }
        "!noti" => {
            let code = number(tokens.next())?;
            let remaining = tokens.next().map(|t| number(Some(t))).transpose()?.unwrap_or(0);
            let seq = tokens.next().map(|t| number(Some(t))).transpose()?.unwrap_or(0);
            Ok(Some(EngineEvent::from_raw_notification(code, remaining, seq)?))
        }
        target => {
            let capability = match target.split_once('/') {
                Some((component, capability)) => CapabilityKey::new(component, capability),
                None => CapabilityKey::new(DEFAULT_COMPONENT, target),
            };
            let command = tokens.next().ok_or(ConsoleError::Usage)?;
            let args: Vec<TypedValue> = tokens.map(TypedValue::parse_token).collect();
            if args.len() > limits::MAX_COMMAND_ARGS {
                return Err(ConsoleError::TooManyArgs(args.len()));
            }
            Ok(Some(EngineEvent::Command(
                CommandEvent::new(capability, command).with_args(args),
            )))
        }
    }
}

fn number<T: std::str::FromStr>(token: Option<&str>) -> Result<T, ConsoleError> {
    let token = token.ok_or(ConsoleError::Usage)?;
    token
        .parse()
        .map_err(|_| ConsoleError::NotANumber(token.to_string()))
}
