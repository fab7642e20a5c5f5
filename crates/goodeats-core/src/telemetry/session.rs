//! Telemetry session identity and per-session state.
//!
//! The session id lives in a [`SessionStorage`] so that every reporter
//! started within the same storage scope reports under the same id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::frustration::{DropdownTracker, RageClickDetector};
use super::TelemetryError;

/// Storage key for the session id
pub const SESSION_KEY: &str = "goodeats_session";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Key/value storage scoped to one browsing session.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), TelemetryError>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TelemetryError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Session storage persisted as a small JSON object on disk.
/// The scope ends when [`FileSessionStorage::clear`] removes the file.
pub struct FileSessionStorage {
    cache_dir: PathBuf,
}

impl FileSessionStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    fn load(&self) -> HashMap<String, String> {
        let path = self.session_path();
        if !path.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|contents| serde_json::from_str(&contents).map_err(|e| e.to_string()))
        {
            Ok(values) => values,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unreadable session file");
                HashMap::new()
            }
        }
    }

    /// Forget everything stored in this scope.
    pub fn clear(&self) -> Result<(), TelemetryError> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| TelemetryError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}

impl SessionStorage for FileSessionStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TelemetryError> {
        let mut values = self.load();
        values.insert(key.to_string(), value.to_string());

        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TelemetryError::Storage(e.to_string()))?;
        }
        let contents = serde_json::to_string_pretty(&values)
            .map_err(|e| TelemetryError::Storage(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| TelemetryError::Storage(e.to_string()))
    }
}

/// Read the session id from storage, or mint and store a new one.
pub fn resolve_session_id(storage: &dyn SessionStorage) -> String {
    if let Some(id) = storage.get(SESSION_KEY).filter(|id| !id.is_empty()) {
        return id;
    }
    let id = Uuid::new_v4().to_string();
    if let Err(e) = storage.set(SESSION_KEY, &id) {
        warn!(error = %e, "Could not persist telemetry session id");
    }
    id
}

/// Everything the reporter tracks for one session.
#[derive(Debug)]
pub struct SessionState {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub event_count: u64,
    pub clicks: RageClickDetector,
    pub dropdown: DropdownTracker,
    /// Set once the session-end beacon went out; cleared when the page becomes visible again.
    pub teardown_reported: bool,
}

impl SessionState {
    pub fn new(id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            event_count: 0,
            clicks: RageClickDetector::default(),
            dropdown: DropdownTracker::default(),
            teardown_reported: false,
        }
    }
}
