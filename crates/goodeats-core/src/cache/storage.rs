//! Named cache generations.
//!
//! A [`CacheStorage`] holds any number of generations, each a map from
//! request URL to [`CachedResponse`]. Generations are kept in creation
//! order, which is also the order [`CacheStorage::match_any`] searches.
//!
//! Storage is in-memory; a persistent storage additionally writes one JSON
//! snapshot per changed generation on [`CacheStorage::save`] and reloads them
//! on startup. Snapshots are written to a temporary file and renamed into
//! place, so a crash mid-save leaves the previous snapshot intact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{CacheError, CachedResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Generation {
    name: String,
    created_at: DateTime<Utc>,
    entries: HashMap<String, CachedResponse>,
    /// When the on-disk snapshot was last written.
    #[serde(skip)]
    saved_at: Option<DateTime<Utc>>,
    /// Changed since the last snapshot.
    #[serde(skip)]
    dirty: bool,
}

impl Generation {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            entries: HashMap::new(),
            saved_at: None,
            dirty: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSummary {
    pub name: String,
    pub entries: usize,
    pub bytes: usize,
    pub created_at: DateTime<Utc>,
    /// `None` until the generation has been written to disk.
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct CacheStorage {
    dir: Option<PathBuf>,
    generations: RwLock<Vec<Generation>>,
}

impl CacheStorage {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a storage backed by `dir`, loading any snapshots already there.
    /// Unreadable snapshots are skipped rather than failing the whole load.
    pub fn persistent(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut generations = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_snapshot(&path) {
                Ok(cached) => {
                    let mut generation = cached.data;
                    generation.saved_at = Some(cached.cached_at);
                    generations.push(generation);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable cache snapshot");
                }
            }
        }
        generations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        debug!(dir = %dir.display(), generations = generations.len(), "Loaded cache storage");

        Ok(Self {
            dir: Some(dir),
            generations: RwLock::new(generations),
        })
    }

    fn load_snapshot(path: &Path) -> anyhow::Result<CachedData<Generation>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// File for a generation. Bytes outside `[A-Za-z0-9.-]` are written as
    /// `_XX` so distinct names never share a file.
    fn snapshot_path(dir: &Path, name: &str) -> PathBuf {
        let mut file = String::with_capacity(name.len());
        for byte in name.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
                file.push(byte as char);
            } else {
                file.push_str(&format!("_{:02X}", byte));
            }
        }
        dir.join(format!("{}.json", file))
    }

    /// Write every generation changed since the last save. No-op for
    /// in-memory storage.
    pub async fn save(&self) -> Result<(), CacheError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let mut generations = self.generations.write().await;
        for generation in generations.iter_mut().filter(|g| g.dirty) {
            let cached = CachedData::new(&*generation);
            let saved_at = cached.cached_at;
            let contents = serde_json::to_string(&cached).map_err(|source| CacheError::Snapshot {
                name: generation.name.clone(),
                source,
            })?;

            let path = Self::snapshot_path(dir, &generation.name);
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, contents)?;
            std::fs::rename(&tmp, &path)?;

            generation.saved_at = Some(saved_at);
            generation.dirty = false;
            debug!(cache = %generation.name, entries = generation.entries.len(), "Saved cache snapshot");
        }
        Ok(())
    }

    /// Create the generation if it doesn't exist yet.
    pub async fn open(&self, name: &str) {
        let mut generations = self.generations.write().await;
        if !generations.iter().any(|g| g.name == name) {
            generations.push(Generation::new(name));
        }
    }

    pub async fn has(&self, name: &str) -> bool {
        self.generations.read().await.iter().any(|g| g.name == name)
    }

    /// Generation names in creation order.
    pub async fn keys(&self) -> Vec<String> {
        self.generations
            .read()
            .await
            .iter()
            .map(|g| g.name.clone())
            .collect()
    }

    /// Remove a generation and its snapshot. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut generations = self.generations.write().await;
        let before = generations.len();
        generations.retain(|g| g.name != name);
        let existed = generations.len() != before;

        if let Some(dir) = &self.dir {
            let path = Self::snapshot_path(dir, name);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(existed)
    }

    pub async fn match_in(&self, name: &str, key: &str) -> Option<CachedResponse> {
        self.generations
            .read()
            .await
            .iter()
            .find(|g| g.name == name)
            .and_then(|g| g.entries.get(key).cloned())
    }

    /// Look the key up in every generation, oldest first.
    pub async fn match_any(&self, key: &str) -> Option<CachedResponse> {
        self.generations
            .read()
            .await
            .iter()
            .find_map(|g| g.entries.get(key).cloned())
    }

    /// Store one entry, creating the generation if needed.
    pub async fn put(&self, name: &str, key: &str, response: CachedResponse) {
        self.put_all(name, vec![(key.to_string(), response)]).await;
    }

    /// Store several entries under a single lock, so readers see all or none.
    pub async fn put_all(&self, name: &str, entries: Vec<(String, CachedResponse)>) {
        let mut generations = self.generations.write().await;
        let index = match generations.iter().position(|g| g.name == name) {
            Some(index) => index,
            None => {
                generations.push(Generation::new(name));
                generations.len() - 1
            }
        };
        let generation = &mut generations[index];
        generation.entries.extend(entries);
        generation.dirty = true;
    }

    pub async fn len(&self, name: &str) -> usize {
        self.generations
            .read()
            .await
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.entries.len())
            .unwrap_or(0)
    }

    pub async fn summaries(&self) -> Vec<GenerationSummary> {
        self.generations
            .read()
            .await
            .iter()
            .map(|g| GenerationSummary {
                name: g.name.clone(),
                entries: g.entries.len(),
                bytes: g.entries.values().map(|r| r.body.len()).sum(),
                created_at: g.created_at,
                saved_at: g.saved_at,
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
