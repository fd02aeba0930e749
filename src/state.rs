//! Recording state that survives a process restart.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Result, TrkptError};
use crate::types::Fix;

/// Recording lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    #[default]
    Stopped,
    Recording,
}

/// What is written on every state change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub tracking_state: TrackingState,
    pub current_best: Option<Fix>,
}

/// Storage for [`PersistedState`].
pub trait StatePersistence {
    /// Load the last saved state. Nothing saved yet is not an error.
    fn load(&self) -> Result<PersistedState>;
    fn save(&mut self, state: &PersistedState) -> Result<()>;
}

// ============================================================================
// JSON file
// ============================================================================

/// State kept as a small JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonStateFile {
    path: PathBuf,
}

impl JsonStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state_error(&self, message: impl std::fmt::Display) -> TrkptError {
        TrkptError::State {
            message: format!("{}: {}", self.path.display(), message),
        }
    }
}

impl StatePersistence for JsonStateFile {
    fn load(&self) -> Result<PersistedState> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedState::default());
            }
            Err(e) => return Err(self.state_error(e)),
        };
        serde_json::from_str(&json).map_err(|e| self.state_error(e))
    }

    fn save(&mut self, state: &PersistedState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let json = serde_json::to_vec(state)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.state_error(e))?;
        tmp.write_all(&json).map_err(|e| self.state_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.state_error(e.error))?;
        Ok(())
    }
}

// ============================================================================
// In memory
// ============================================================================

/// Process-local state. Clones share storage, which lets a test hand the same
/// state to a second tracker to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    inner: Arc<Mutex<PersistedState>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn snapshot(&self) -> PersistedState {
        self.inner.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl StatePersistence for MemoryState {
    fn load(&self) -> Result<PersistedState> {
        Ok(self.snapshot())
    }

    fn save(&mut self, state: &PersistedState) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| TrkptError::State {
            message: "state lock poisoned".to_string(),
        })?;
        *inner = state.clone();
        Ok(())
    }
}
