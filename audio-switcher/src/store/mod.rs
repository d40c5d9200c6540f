//! Persisted session state.
//!
//! The session only needs load-at-start and save-at-end semantics; where the
//! bytes live is up to the [`StateStore`] implementation.

pub mod file;

pub use file::FileStateStore;

use crate::controller::DeviceId;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// State carried across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Rotation order of enabled device ids
    #[serde(default)]
    pub enabled_devices: Vec<DeviceId>,

    /// Last device selected, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_device: Option<DeviceId>,

    /// Pinned controller digest; empty when not configured
    #[serde(default)]
    pub controller_digest: String,
}

/// Persistence error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State is corrupt: {0}")]
    Corrupt(String),

    #[error("Failed to serialize state: {0}")]
    Serialize(String),

    #[error("No location available for state storage")]
    NoLocation,

    #[error("Failed to access registry: {0}")]
    Registry(String),
}

/// Get/set access to persisted state.
pub trait StateStore {
    fn load(&self) -> Result<PersistedState, StoreError>;
    fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

impl<S: StateStore + ?Sized> StateStore for Box<S> {
    fn load(&self) -> Result<PersistedState, StoreError> {
        (**self).load()
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        (**self).save(state)
    }
}

/// In-process store. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    state: Arc<Mutex<PersistedState>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStateStore {
    pub fn new(state: PersistedState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            saves: Arc::default(),
        }
    }

    /// Current contents.
    pub fn snapshot(&self) -> PersistedState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let mut stored = self
            .state
            .lock()
            .map_err(|_| StoreError::Corrupt("memory store poisoned".to_string()))?;
        *stored = state.clone();
        if let Ok(mut n) = self.saves.lock() {
            *n += 1;
        }
        Ok(())
    }
}

/// The platform's default store: the registry on Windows, a JSON file elsewhere.
pub fn default_store() -> Result<Box<dyn StateStore + Send>, StoreError> {
    #[cfg(windows)]
    {
        Ok(Box::new(crate::platform::RegistryStateStore::new()))
    }
    #[cfg(not(windows))]
    {
        Ok(Box::new(FileStateStore::default_location()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_clones_share_state() {
        let store = MemoryStateStore::default();
        let other = store.clone();
        let state = PersistedState {
            enabled_devices: vec![DeviceId(5), DeviceId(3)],
            last_device: Some(DeviceId(3)),
            controller_digest: "ab".to_string(),
        };
        store.save(&state).unwrap();
        assert_eq!(other.load().unwrap(), state);
        assert_eq!(other.save_count(), 1);
    }

    #[test]
    fn test_state_json_shape() {
        let state = PersistedState {
            enabled_devices: vec![DeviceId(5), DeviceId(3)],
            last_device: None,
            controller_digest: String::new(),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"enabled_devices":[5,3],"controller_digest":""}"#);
        let back: PersistedState = serde_json::from_str("{}").unwrap();
        assert_eq!(back, PersistedState::default());
    }
}
