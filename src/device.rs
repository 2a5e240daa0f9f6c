//! The device: engine, capability registry and connection state
//!
//! Only one device may be live per process. Tearing it down releases the
//! registry, after which every capability handle is invalid.

use crate::capability::CapabilityRegistry;
use crate::config::{DeviceIdentity, OnboardingConfig, RuntimeConfig};
use crate::connection::{ConnectionMonitor, ConnectivityEngine, EngineError};
use crate::events::{event_bus, EventBus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stdevice_shared::Codec;
use thiserror::Error;
use tracing::{debug, info};

static DEVICE_LIVE: AtomicBool = AtomicBool::new(false);

/// Serializes tests that bring a device up
#[cfg(test)]
pub(crate) static DEVICE_TEST_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("A device is already live in this process")]
    AlreadyLive,

    #[error("Engine initialization failed: {0}")]
    Engine(#[from] EngineError),
}

/// Marks the process-wide device slot as taken until dropped
struct LiveLease;

impl LiveLease {
    fn acquire() -> Result<Self, DeviceError> {
        DEVICE_LIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| LiveLease)
            .map_err(|_| DeviceError::AlreadyLive)
    }
}

impl Drop for LiveLease {
    fn drop(&mut self) {
        DEVICE_LIVE.store(false, Ordering::SeqCst);
    }
}

pub struct Device {
    engine: Arc<dyn ConnectivityEngine>,
    registry: CapabilityRegistry,
    monitor: Arc<ConnectionMonitor>,
    events: EventBus,
    config: RuntimeConfig,
    // Released last, after the registry is closed
    _lease: LiveLease,
}

impl Device {
    /// Initialize engine `E` from the two configuration documents
    ///
    /// The engine is also returned to the caller for the parts of its
    /// surface the runtime does not use.
    pub fn bring_up<E: ConnectivityEngine>(
        identity: &DeviceIdentity,
        onboarding: &OnboardingConfig,
        config: RuntimeConfig,
    ) -> Result<(Self, Arc<E>), DeviceError> {
        let lease = LiveLease::acquire()?;
        let engine = Arc::new(E::init(identity, onboarding)?);
        let device = Self::assemble(engine.clone(), config, lease);
        Ok((device, engine))
    }

    /// Wrap an engine that was constructed by the caller
    #[cfg(test)]
    pub fn with_engine(
        engine: Arc<dyn ConnectivityEngine>,
        config: RuntimeConfig,
    ) -> Result<Self, DeviceError> {
        let lease = LiveLease::acquire()?;
        Ok(Self::assemble(engine, config, lease))
    }

    fn assemble(
        engine: Arc<dyn ConnectivityEngine>,
        config: RuntimeConfig,
        lease: LiveLease,
    ) -> Self {
        let events = event_bus();
        let codec = Codec::with_max_len(config.max_string_len);
        info!("[DEVICE] Device initialized ({} engine)", engine.name());

        Self {
            registry: CapabilityRegistry::new(engine.clone(), codec),
            monitor: Arc::new(ConnectionMonitor::new(events.clone())),
            engine,
            events,
            config,
            _lease: lease,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn engine(&self) -> &Arc<dyn ConnectivityEngine> {
        &self.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn event_bus(&self) -> EventBus {
        self.events.clone()
    }

    /// Release the device; every capability handle becomes invalid
    pub fn teardown(self) {
        info!("[DEVICE] Tearing down");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.registry.close();
        debug!("[DEVICE] Released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AttributeError, RegistryError};
    use crate::config::fixtures;
    use crate::connection::LoopbackEngine;

    #[test]
    fn test_single_live_device() {
        let _guard = DEVICE_TEST_LOCK.blocking_lock();

        let (first, engine) = Device::bring_up::<LoopbackEngine>(
            &fixtures::identity(),
            &fixtures::onboarding(),
            RuntimeConfig::default(),
        )
        .unwrap();
        assert_eq!(first.engine().name(), "loopback");
        assert_eq!(engine.device_name(), "RPiSwitch-STDKtest0001");

        let second = Device::bring_up::<LoopbackEngine>(
            &fixtures::identity(),
            &fixtures::onboarding(),
            RuntimeConfig::default(),
        );
        assert!(matches!(second, Err(DeviceError::AlreadyLive)));

        first.teardown();
        assert!(Device::bring_up::<LoopbackEngine>(
            &fixtures::identity(),
            &fixtures::onboarding(),
            RuntimeConfig::default(),
        )
        .is_ok());
    }

    #[test]
    fn test_bad_config_releases_slot() {
        let _guard = DEVICE_TEST_LOCK.blocking_lock();

        let mut onboarding = fixtures::onboarding();
        onboarding.onboarding.mn_id.clear();
        let result = Device::bring_up::<LoopbackEngine>(
            &fixtures::identity(),
            &onboarding,
            RuntimeConfig::default(),
        );
        assert!(matches!(
            result,
            Err(DeviceError::Engine(EngineError::InvalidConfig(_)))
        ));
        assert!(!DEVICE_LIVE.load(Ordering::SeqCst));
    }

    #[test]
    fn test_handles_invalid_after_teardown() {
        let _guard = DEVICE_TEST_LOCK.blocking_lock();

        let (device, _) = Device::bring_up::<LoopbackEngine>(
            &fixtures::identity(),
            &fixtures::onboarding(),
            RuntimeConfig::default(),
        )
        .unwrap();
        let handle = device.registry().register_bare("main", "switch").unwrap();
        device.teardown();

        assert!(matches!(
            handle.set_attribute("switch", "on"),
            Err(AttributeError::Registry(RegistryError::InvalidHandle))
        ));
    }

    #[test]
    fn test_string_cap_follows_config() {
        let _guard = DEVICE_TEST_LOCK.blocking_lock();

        let config = RuntimeConfig {
            max_string_len: 4,
            ..Default::default()
        };
        let (device, _) = Device::bring_up::<LoopbackEngine>(
            &fixtures::identity(),
            &fixtures::onboarding(),
            config,
        )
        .unwrap();
        let handle = device.registry().register_bare("main", "switch").unwrap();

        assert!(matches!(
            handle.set_attribute("switch", "toolong"),
            Err(AttributeError::Encode(_))
        ));
    }
}
