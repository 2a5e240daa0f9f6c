//! Capability registry
//!
//! Holds, per device, every registered capability with its init handler,
//! command handlers and last reported attribute values. All table access is
//! serialized behind one lock; handles stay valid until the device is torn
//! down.

use crate::connection::{ConnectivityEngine, EncodedAttribute, EngineError};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use stdevice_shared::{CapabilityKey, Codec, EncodeError, SequenceNumber, TypedValue, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Called once the engine has initialized the capability
pub type InitHandler = Arc<dyn Fn(&CapabilityHandle) -> anyhow::Result<()> + Send + Sync>;

/// Called for each inbound command bound to the capability
pub type CommandHandler =
    Arc<dyn Fn(&CapabilityHandle, &[TypedValue]) -> anyhow::Result<()> + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0} is already registered")]
    AlreadyRegistered(String),

    #[error("Invalid capability handle")]
    InvalidHandle,
}

#[derive(Error, Debug)]
pub enum AttributeError {
    #[error("Failed to encode attribute value: {0}")]
    Encode(#[from] EncodeError),

    #[error("Failed to send attribute: {0}")]
    Send(#[from] EngineError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

struct CapabilityEntry {
    key: CapabilityKey,
    init: Option<InitHandler>,
    commands: HashMap<String, CommandHandler>,
    attributes: HashMap<String, TypedValue>,
}

struct RegistryState {
    open: bool,
    entries: Vec<CapabilityEntry>,
    index: HashMap<CapabilityKey, usize>,
}

struct RegistryInner {
    engine: Arc<dyn ConnectivityEngine>,
    codec: Codec,
    state: Mutex<RegistryState>,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_mut<'a>(
        state: &'a mut RegistryState,
        handle: &CapabilityHandle,
    ) -> Result<&'a mut CapabilityEntry, RegistryError> {
        if !state.open {
            return Err(RegistryError::InvalidHandle);
        }
        state
            .entries
            .get_mut(handle.slot)
            .filter(|entry| entry.key == handle.key)
            .ok_or(RegistryError::InvalidHandle)
    }
}

/// Reference to one registered capability
///
/// Cheap to clone; becomes invalid once the owning device is torn down.
#[derive(Clone)]
pub struct CapabilityHandle {
    slot: usize,
    key: CapabilityKey,
    registry: Weak<RegistryInner>,
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("slot", &self.slot)
            .field("key", &self.key)
            .finish()
    }
}

impl CapabilityHandle {
    pub fn key(&self) -> &CapabilityKey {
        &self.key
    }

    pub fn capability(&self) -> &str {
        &self.key.capability
    }

    fn registry(&self) -> Result<CapabilityRegistry, RegistryError> {
        self.registry
            .upgrade()
            .map(|inner| CapabilityRegistry { inner })
            .ok_or(RegistryError::InvalidHandle)
    }

    /// Encode and send an attribute update for this capability
    pub fn set_attribute(
        &self,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<SequenceNumber, AttributeError> {
        self.registry()?.set_attribute(self, attribute, value)
    }

    /// Last value successfully sent for `attribute`
    pub fn attribute(&self, attribute: &str) -> Result<Option<TypedValue>, RegistryError> {
        self.registry()?.attribute(self, attribute)
    }
}

/// Registry of the device's capabilities
#[derive(Clone)]
pub struct CapabilityRegistry {
    inner: Arc<RegistryInner>,
}

impl CapabilityRegistry {
    pub fn new(engine: Arc<dyn ConnectivityEngine>, codec: Codec) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                engine,
                codec,
                state: Mutex::new(RegistryState {
                    open: true,
                    entries: Vec::new(),
                    index: HashMap::new(),
                }),
            }),
        }
    }

    fn check_owner(&self, handle: &CapabilityHandle) -> Result<(), RegistryError> {
        if Weak::ptr_eq(&handle.registry, &Arc::downgrade(&self.inner)) {
            Ok(())
        } else {
            Err(RegistryError::InvalidHandle)
        }
    }

    /// Register a capability with the handler run when the engine initializes it
    pub fn register_capability<F>(
        &self,
        component: &str,
        capability: &str,
        init: F,
    ) -> Result<CapabilityHandle, RegistryError>
    where
        F: Fn(&CapabilityHandle) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(CapabilityKey::new(component, capability), Some(Arc::new(init)))
    }

    /// Register a capability that needs no initialization
    #[cfg(test)]
    pub fn register_bare(
        &self,
        component: &str,
        capability: &str,
    ) -> Result<CapabilityHandle, RegistryError> {
        self.insert(CapabilityKey::new(component, capability), None)
    }

    fn insert(
        &self,
        key: CapabilityKey,
        init: Option<InitHandler>,
    ) -> Result<CapabilityHandle, RegistryError> {
        let mut state = self.inner.lock();
        if !state.open {
            return Err(RegistryError::InvalidHandle);
        }
        if state.index.contains_key(&key) {
            warn!("[REGISTRY] Capability {} registered twice", key);
            return Err(RegistryError::AlreadyRegistered(format!("capability {}", key)));
        }

        let slot = state.entries.len();
        state.entries.push(CapabilityEntry {
            key: key.clone(),
            init,
            commands: HashMap::new(),
            attributes: HashMap::new(),
        });
        state.index.insert(key.clone(), slot);
        debug!("[REGISTRY] Registered capability {}", key);

        Ok(CapabilityHandle {
            slot,
            key,
            registry: Arc::downgrade(&self.inner),
        })
    }

    /// Bind a handler to a command of the capability
    ///
    /// A second handler for the same command is rejected.
    pub fn register_command<F>(
        &self,
        handle: &CapabilityHandle,
        command: &str,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&CapabilityHandle, &[TypedValue]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.check_owner(handle)?;
        let mut state = self.inner.lock();
        let entry = RegistryInner::entry_mut(&mut state, handle)?;

        if entry.commands.contains_key(command) {
            warn!("[REGISTRY] Command {}.{} registered twice", entry.key, command);
            return Err(RegistryError::AlreadyRegistered(format!(
                "command {}.{}",
                entry.key, command
            )));
        }

        entry.commands.insert(command.to_string(), Arc::new(handler));
        debug!("[REGISTRY] Registered command {}.{}", entry.key, command);
        Ok(())
    }

    /// Encode a value and hand it to the engine send path
    ///
    /// An error does not guarantee the cloud never saw the update; the send is
    /// fire-and-forget once the engine accepts it.
    pub fn set_attribute(
        &self,
        handle: &CapabilityHandle,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<SequenceNumber, AttributeError> {
        self.check_owner(handle)?;
        let typed = self.inner.codec.encode(&value.into())?;

        // Hold the lock across the send so sequence order matches table order
        let mut state = self.inner.lock();
        let entry = RegistryInner::entry_mut(&mut state, handle)?;

        let encoded = EncodedAttribute {
            capability: entry.key.clone(),
            attribute: attribute.to_string(),
            value: typed,
        };
        let seq = self.inner.engine.send_attribute(&encoded)?;

        entry.attributes.insert(encoded.attribute, encoded.value);
        Ok(seq)
    }

    pub fn attribute(
        &self,
        handle: &CapabilityHandle,
        attribute: &str,
    ) -> Result<Option<TypedValue>, RegistryError> {
        self.check_owner(handle)?;
        let mut state = self.inner.lock();
        let entry = RegistryInner::entry_mut(&mut state, handle)?;
        Ok(entry.attributes.get(attribute).cloned())
    }

    /// Look up the handle of a registered capability
    pub fn handle(&self, key: &CapabilityKey) -> Option<CapabilityHandle> {
        let state = self.inner.lock();
        if !state.open {
            return None;
        }
        state.index.get(key).map(|&slot| CapabilityHandle {
            slot,
            key: key.clone(),
            registry: Arc::downgrade(&self.inner),
        })
    }

    pub fn init_handler(
        &self,
        handle: &CapabilityHandle,
    ) -> Result<Option<InitHandler>, RegistryError> {
        self.check_owner(handle)?;
        let mut state = self.inner.lock();
        Ok(RegistryInner::entry_mut(&mut state, handle)?.init.clone())
    }

    pub fn command_handler(
        &self,
        handle: &CapabilityHandle,
        command: &str,
    ) -> Result<Option<CommandHandler>, RegistryError> {
        self.check_owner(handle)?;
        let mut state = self.inner.lock();
        Ok(RegistryInner::entry_mut(&mut state, handle)?
            .commands
            .get(command)
            .cloned())
    }

    /// Keys of every registered capability, in registration order
    pub fn keys(&self) -> Vec<CapabilityKey> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|entry| entry.key.clone())
            .collect()
    }

    /// Release all tables; every handle becomes invalid
    pub fn close(&self) {
        let mut state = self.inner.lock();
        if state.open {
            state.open = false;
            state.entries.clear();
            state.index.clear();
            debug!("[REGISTRY] Closed");
        }
    }
}
