//! JSON file state store.

use super::{PersistedState, StateStore, StoreError};
use crate::config::project_dirs;
use std::path::{Path, PathBuf};
use tracing::debug;

const STATE_FILE: &str = "state.json";

/// Stores state as pretty-printed JSON, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `state.json` in the per-user data directory.
    pub fn default_location() -> Result<Self, StoreError> {
        let dirs = project_dirs().ok_or(StoreError::NoLocation)?;
        Ok(Self::new(dirs.data_dir().join(STATE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        if !self.path.exists() {
            debug!("No state file at {}, starting empty", self.path.display());
            return Ok(PersistedState::default());
        }

        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            serde_json::to_string_pretty(state).map_err(|e| StoreError::Serialize(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}
