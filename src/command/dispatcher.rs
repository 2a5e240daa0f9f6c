//! Command dispatcher - routes engine events to capability handlers
//!
//! Every capability gets its own worker task with an ordered queue, so
//! handlers for one capability never overlap and run in delivery order.
//! Handlers are user code: they run on the blocking pool and any error or
//! panic is contained here.

use crate::capability::{CapabilityHandle, CapabilityRegistry, CommandHandler, InitHandler};
use crate::connection::CommandEvent;
use crate::events::{DeviceEvent, EventBus};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use stdevice_shared::{CapabilityKey, TypedValue};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What happened to an event handed to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Queued on the capability's worker
    Queued,
    /// Capability known but nothing bound to the command
    NoHandler,
    /// No capability registered under that key
    UnknownCapability,
    /// Dispatcher no longer accepts work
    ShuttingDown,
}

enum Job {
    Init(InitHandler),
    Command {
        command: String,
        handler: CommandHandler,
        args: Vec<TypedValue>,
    },
}

impl Job {
    fn name(&self) -> &str {
        match self {
            Job::Init(_) => "init",
            Job::Command { command, .. } => command,
        }
    }

    fn run(&self, handle: &CapabilityHandle) -> anyhow::Result<()> {
        match self {
            Job::Init(init) => init(handle),
            Job::Command { handler, args, .. } => handler(handle, args.as_slice()),
        }
    }
}

struct Worker {
    queue: mpsc::UnboundedSender<Job>,
    task: JoinHandle<()>,
}

/// Routes command and init events to per-capability workers
pub struct CommandDispatcher {
    registry: CapabilityRegistry,
    events: EventBus,
    workers: Mutex<HashMap<CapabilityKey, Worker>>,
    accepting: AtomicBool,
}

impl CommandDispatcher {
    pub fn new(registry: CapabilityRegistry, events: EventBus) -> Self {
        Self {
            registry,
            events,
            workers: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Route an inbound command to its handler
    ///
    /// Must be called from within a tokio runtime; the handler itself runs
    /// later on the capability's worker.
    pub fn dispatch(&self, event: CommandEvent) -> DispatchOutcome {
        if !self.accepting.load(Ordering::SeqCst) {
            debug!("[DISPATCH] Dropping {} {}: shutting down", event.capability, event.command);
            return DispatchOutcome::ShuttingDown;
        }

        let Some(handle) = self.registry.handle(&event.capability) else {
            warn!(
                "[DISPATCH] Command {} for unknown capability {}",
                event.command, event.capability
            );
            return DispatchOutcome::UnknownCapability;
        };

        let handler = match self.registry.command_handler(&handle, &event.command) {
            Ok(Some(handler)) => handler,
            Ok(None) => {
                warn!(
                    "[DISPATCH] No handler for {}.{}, dropping",
                    event.capability, event.command
                );
                return DispatchOutcome::NoHandler;
            }
            Err(e) => {
                warn!("[DISPATCH] {}: {}", event.capability, e);
                return DispatchOutcome::UnknownCapability;
            }
        };

        debug!(
            "[DISPATCH] {}.{} args={:?}",
            event.capability, event.command, event.args
        );
        self.enqueue(
            handle,
            Job::Command {
                command: event.command,
                handler,
                args: event.args,
            },
        )
    }

    /// Run the init handler of a capability the engine just initialized
    pub fn dispatch_init(&self, key: &CapabilityKey) -> DispatchOutcome {
        if !self.accepting.load(Ordering::SeqCst) {
            return DispatchOutcome::ShuttingDown;
        }

        let Some(handle) = self.registry.handle(key) else {
            warn!("[DISPATCH] Init for unknown capability {}", key);
            return DispatchOutcome::UnknownCapability;
        };

        match self.registry.init_handler(&handle) {
            Ok(Some(init)) => self.enqueue(handle, Job::Init(init)),
            Ok(None) => {
                debug!("[DISPATCH] {} has no init handler", key);
                let _ = self.events.send(DeviceEvent::CapabilityInitialized(key.clone()));
                DispatchOutcome::NoHandler
            }
            Err(e) => {
                warn!("[DISPATCH] {}: {}", key, e);
                DispatchOutcome::UnknownCapability
            }
        }
    }

    fn enqueue(&self, handle: CapabilityHandle, job: Job) -> DispatchOutcome {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let key = handle.key().clone();

        let worker = workers.entry(key).or_insert_with(|| {
            let (queue, rx) = mpsc::unbounded_channel();
            let task = tokio::spawn(run_worker(handle, rx, self.events.clone()));
            Worker { queue, task }
        });

        match worker.queue.send(job) {
            Ok(()) => DispatchOutcome::Queued,
            Err(_) => DispatchOutcome::ShuttingDown,
        }
    }

    /// Number of capabilities with a live worker
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop accepting work and wait for queued handlers to finish
    ///
    /// Returns `false` if the workers did not drain within `grace`. Handlers
    /// still running at that point are left to finish on their own.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);

        let workers: Vec<Worker> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, worker)| worker)
            .collect();

        if workers.is_empty() {
            return true;
        }

        info!("[DISPATCH] Draining {} worker(s)", workers.len());
        // Dropping the senders lets each worker exit once its queue is empty
        let tasks: Vec<JoinHandle<()>> = workers.into_iter().map(|w| w.task).collect();

        match tokio::time::timeout(grace, join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("[DISPATCH] Worker ended abnormally: {}", e);
                    }
                }
                true
            }
            Err(_) => {
                warn!("[DISPATCH] Handlers still running after {:?}", grace);
                false
            }
        }
    }
}

async fn run_worker(
    handle: CapabilityHandle,
    mut queue: mpsc::UnboundedReceiver<Job>,
    events: EventBus,
) {
    let key = handle.key().clone();
    debug!("[DISPATCH] Worker for {} started", key);

    while let Some(job) = queue.recv().await {
        let name = job.name().to_string();
        let is_init = matches!(job, Job::Init(_));
        let worker_handle = handle.clone();

        let result = tokio::task::spawn_blocking(move || job.run(&worker_handle)).await;

        let succeeded = match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("[DISPATCH] {} {} failed: {:#}", key, name, e);
                false
            }
            Err(e) if e.is_panic() => {
                error!("[DISPATCH] {} {} panicked", key, name);
                false
            }
            Err(e) => {
                error!("[DISPATCH] {} {} did not complete: {}", key, name, e);
                false
            }
        };

        let event = if is_init {
            if !succeeded {
                continue;
            }
            DeviceEvent::CapabilityInitialized(key.clone())
        } else {
            DeviceEvent::CommandCompleted {
                capability: key.clone(),
                command: name,
                succeeded,
            }
        };
        // No subscribers is fine
        let _ = events.send(event);
    }

    debug!("[DISPATCH] Worker for {} stopped", key);
}
