//! Runtime shell
//!
//! Starts the engine session, then runs the control loop: engine events are
//! handled in delivery order until shutdown is requested. On exit the
//! dispatcher is drained before the device is torn down.

use crate::command::{CommandDispatcher, DispatchOutcome};
use crate::connection::{EngineEvent, EngineSession};
use crate::device::Device;
use anyhow::Context;
use std::future::Future;
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cloneable trigger for stopping the runtime
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown on the first Ctrl-C
    pub fn on_ctrl_c(&self) -> JoinHandle<()> {
        self.on_interrupt(tokio::signal::ctrl_c())
    }

    /// Trigger shutdown once `interrupt` resolves
    ///
    /// The watcher ends without triggering if shutdown happens first. A
    /// failed listener also triggers shutdown, since no interrupt could be
    /// delivered afterwards.
    fn on_interrupt<F>(&self, interrupt: F) -> JoinHandle<()>
    where
        F: Future<Output = io::Result<()>> + Send + 'static,
    {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = interrupt => {
                    match result {
                        Ok(()) => info!("[RUNTIME] Keyboard interrupt detected"),
                        Err(e) => error!("[RUNTIME] Failed to listen for Ctrl-C: {}", e),
                    }
                    shutdown.trigger();
                }
                _ = shutdown.token.cancelled() => {}
            }
        })
    }
}

/// What happened during a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Engine events received by the loop
    pub events: u64,
    /// Commands queued on a handler
    pub commands: u64,
    /// Commands dropped for lack of a handler or capability
    pub dropped: u64,
    /// Times the device became fully connected
    pub connected: u64,
    /// Whether all handlers finished within the shutdown grace
    pub drained: bool,
}

pub struct Runtime {
    device: Device,
    shutdown: Shutdown,
}

impl Runtime {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            shutdown: Shutdown::new(),
        }
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Start the engine and run until shutdown
    ///
    /// A failed engine start is fatal; the device is torn down and the error
    /// returned.
    pub async fn run(self) -> anyhow::Result<RunSummary> {
        let Runtime { device, shutdown } = self;
        let config = device.config().clone();

        let (events_tx, mut events_rx) = mpsc::channel(config.event_capacity);
        let dispatcher = CommandDispatcher::new(device.registry().clone(), device.event_bus());

        let session = EngineSession {
            events: events_tx,
            capabilities: device.registry().keys(),
            timeout: config.start_timeout,
        };
        info!(
            "[RUNTIME] Starting session, {} capability key(s)",
            session.capabilities.len()
        );
        device
            .engine()
            .start(session)
            .await
            .with_context(|| format!("Failed to start {} engine", device.engine().name()))?;

        let mut summary = RunSummary::default();
        let mut ticker = interval(config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = shutdown.token();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("[RUNTIME] Shutdown requested");
                    break;
                }

                event = events_rx.recv() => {
                    let Some(event) = event else {
                        warn!("[RUNTIME] Engine event stream closed");
                        break;
                    };
                    summary.events += 1;
                    handle_event(&device, &dispatcher, event, &mut summary);
                }

                _ = ticker.tick() => {
                    debug!(
                        "[RUNTIME] Connection: {}, {} capability worker(s)",
                        device.monitor().state(),
                        dispatcher.worker_count()
                    );
                }
            }
        }

        summary.drained = dispatcher.shutdown(config.shutdown_grace).await;
        summary.connected = device.monitor().connected_count();
        device.teardown();

        info!(
            "[RUNTIME] Exiting: {} event(s), {} command(s), {} dropped, connected {} time(s)",
            summary.events, summary.commands, summary.dropped, summary.connected
        );
        Ok(summary)
    }
}

fn handle_event(
    device: &Device,
    dispatcher: &CommandDispatcher,
    event: EngineEvent,
    summary: &mut RunSummary,
) {
    match event {
        EngineEvent::Status { status, level } => {
            device.monitor().on_status(status, level);
        }
        EngineEvent::Notification(notification) => {
            device.monitor().on_notification(notification);
        }
        EngineEvent::CapabilityInit(key) => {
            dispatcher.dispatch_init(&key);
        }
        EngineEvent::Command(command) => match dispatcher.dispatch(command) {
            DispatchOutcome::Queued => summary.commands += 1,
            _ => summary.dropped += 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::RegistryError;
    use crate::command::handlers::switch;
    use crate::config::{fixtures, RuntimeConfig};
    use crate::connection::{CommandEvent, LoopbackConfig, LoopbackEngine};
    use crate::device::DEVICE_TEST_LOCK;
    use crate::events::DeviceEvent;
    use bytes::BytesMut;
    use std::sync::Arc;
    use std::time::Duration;
    use stdevice_shared::wire;
    use stdevice_shared::{CapabilityKey, TypedValue};
    use tokio::sync::{broadcast, oneshot};

    fn fast_engine() -> Arc<LoopbackEngine> {
        let config = LoopbackConfig {
            status_step: Duration::from_millis(1),
            ..Default::default()
        };
        Arc::new(
            LoopbackEngine::with_config(&fixtures::identity(), &fixtures::onboarding(), config)
                .unwrap(),
        )
    }

    fn fast_config() -> RuntimeConfig {
        RuntimeConfig {
            poll_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    /// Collect events until `done` matches one
    async fn wait_for(
        rx: &mut broadcast::Receiver<DeviceEvent>,
        done: impl Fn(&DeviceEvent) -> bool,
    ) -> Vec<DeviceEvent> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let finished = done(&event);
                        seen.push(event);
                        if finished {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        })
        .await
        .expect("event not observed in time");
        seen
    }

    #[tokio::test]
    async fn test_switch_end_to_end() {
        let _guard = DEVICE_TEST_LOCK.lock().await;

        let engine = fast_engine();
        let mut outbound = engine.take_outbound().unwrap();
        let device = Device::with_engine(engine.clone(), fast_config()).unwrap();
        let handle = switch::install(device.registry()).unwrap();
        let mut events = device.event_bus().subscribe();

        let runtime = Runtime::new(device);
        let shutdown = runtime.shutdown_handle();
        let task = tokio::spawn(runtime.run());

        let seen = wait_for(&mut events, |e| {
            matches!(e, DeviceEvent::CapabilityInitialized(_))
        })
        .await;
        let connected = seen
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Connected))
            .count();
        assert_eq!(connected, 1);
        assert_eq!(
            handle.attribute("switch").unwrap(),
            Some(TypedValue::String("off".into()))
        );

        let on = CommandEvent::new(CapabilityKey::new("main", "switch"), "on");
        engine.inject(EngineEvent::Command(on)).await.unwrap();
        wait_for(&mut events, |e| {
            matches!(e, DeviceEvent::CommandCompleted { succeeded: true, .. })
        })
        .await;
        assert_eq!(
            handle.attribute("switch").unwrap(),
            Some(TypedValue::String("on".into()))
        );

        // Both updates went out on the wire, in order
        let mut buf = BytesMut::new();
        for _ in 0..2 {
            buf.extend_from_slice(&outbound.recv().await.unwrap());
        }
        let first = wire::decode_frame(&mut buf).unwrap().unwrap();
        let second = wire::decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(first.typed_value().unwrap(), TypedValue::String("off".into()));
        assert_eq!(second.typed_value().unwrap(), TypedValue::String("on".into()));
        assert!(first.sequence_number >= 1);
        assert!(second.sequence_number > first.sequence_number);

        shutdown.trigger();
        let summary = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("runtime did not stop")
            .unwrap()
            .unwrap();

        assert!(summary.drained);
        assert_eq!(summary.commands, 1);
        assert_eq!(summary.connected, 1);
        assert_eq!(handle.attribute("switch"), Err(RegistryError::InvalidHandle));
    }

    #[tokio::test]
    async fn test_unknown_command_dropped() {
        let _guard = DEVICE_TEST_LOCK.lock().await;

        let engine = fast_engine();
        let device = Device::with_engine(engine.clone(), fast_config()).unwrap();
        switch::install(device.registry()).unwrap();
        let mut events = device.event_bus().subscribe();

        let runtime = Runtime::new(device);
        let shutdown = runtime.shutdown_handle();
        let task = tokio::spawn(runtime.run());
        wait_for(&mut events, |e| matches!(e, DeviceEvent::CapabilityInitialized(_))).await;

        let toggle = CommandEvent::new(CapabilityKey::new("main", "switch"), "toggle");
        engine.inject(EngineEvent::Command(toggle)).await.unwrap();
        let off = CommandEvent::new(CapabilityKey::new("main", "switch"), "off");
        engine.inject(EngineEvent::Command(off)).await.unwrap();
        wait_for(&mut events, |e| matches!(e, DeviceEvent::CommandCompleted { .. })).await;

        shutdown.trigger();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.commands, 1);
        assert_eq!(summary.dropped, 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_events() {
        let _guard = DEVICE_TEST_LOCK.lock().await;

        let device = Device::with_engine(fast_engine(), fast_config()).unwrap();
        let runtime = Runtime::new(device);
        let shutdown = runtime.shutdown_handle();
        shutdown.trigger();
        assert!(shutdown.is_triggered());

        let summary = runtime.run().await.unwrap();
        assert_eq!(summary.commands, 0);
        assert!(summary.drained);
    }

    #[tokio::test]
    async fn test_interrupt_stops_runtime() {
        let _guard = DEVICE_TEST_LOCK.lock().await;

        let engine = fast_engine();
        let device = Device::with_engine(engine.clone(), fast_config()).unwrap();
        switch::install(device.registry()).unwrap();
        let mut events = device.event_bus().subscribe();

        let runtime = Runtime::new(device);
        let shutdown = runtime.shutdown_handle();
        let (interrupt, received) = oneshot::channel::<()>();
        let watcher = shutdown.on_interrupt(async move {
            received
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
        });
        let task = tokio::spawn(runtime.run());
        wait_for(&mut events, |e| matches!(e, DeviceEvent::CapabilityInitialized(_))).await;
        assert!(!shutdown.is_triggered());

        interrupt.send(()).unwrap();
        watcher.await.unwrap();
        assert!(shutdown.is_triggered());

        let summary = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("runtime did not stop on interrupt")
            .unwrap()
            .unwrap();
        assert!(summary.drained);
        assert_eq!(summary.connected, 1);
    }

    #[tokio::test]
    async fn test_failed_interrupt_listener_triggers_shutdown() {
        let shutdown = Shutdown::new();
        let watcher = shutdown.on_interrupt(async {
            Err::<(), _>(io::Error::new(io::ErrorKind::Unsupported, "no signal support"))
        });

        watcher.await.unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_ctrl_c_watcher_ends_on_shutdown() {
        let shutdown = Shutdown::new();
        let watcher = shutdown.on_ctrl_c();

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("Ctrl-C watcher outlived shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_engine_start_failure_is_fatal() {
        let _guard = DEVICE_TEST_LOCK.lock().await;

        let engine = fast_engine();
        let device = Device::with_engine(engine.clone(), fast_config()).unwrap();
        let runtime = Runtime::new(device);
        let shutdown = runtime.shutdown_handle();
        let task = tokio::spawn(runtime.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        task.await.unwrap().unwrap();

        // The loopback engine only runs one session
        let device = Device::with_engine(engine, fast_config()).unwrap();
        let err = Runtime::new(device).run().await.unwrap_err();
        assert!(err.to_string().contains("Failed to start loopback engine"));
    }
}
