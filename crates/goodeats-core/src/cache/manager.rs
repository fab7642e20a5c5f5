//! Request interception for the offline cache.
//!
//! The manager owns one version of the cache layout (a static generation
//! and a tiles generation, both named after the version token) and answers
//! every outgoing request:
//!
//! - Map tiles: cache first, network on miss, successful responses stored.
//!   Tiles are never revalidated or evicted.
//! - Everything else: stale-while-revalidate against any generation, with
//!   same-origin network responses stored on a miss.
//!
//! Lifecycle follows the service worker model: `install` precaches the
//! manifest, `activate` deletes other versions' generations and starts
//! intercepting. [`CacheManager::start`] runs the whole sequence for a
//! process that may already have a version on disk.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    CacheError, CacheSettings, CacheStorage, CachedResponse, FetchError, FetchOutcome,
    FetchRequest, Fetcher,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// Commands the hosting page can post to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Take over immediately instead of waiting for existing pages to close.
    SkipWaiting,
}

impl FromStr for ControlMessage {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skipWaiting" => Ok(ControlMessage::SkipWaiting),
            other => Err(CacheError::UnknownMessage(other.to_string())),
        }
    }
}

pub struct CacheManager<F: Fetcher> {
    settings: CacheSettings,
    storage: Arc<CacheStorage>,
    fetcher: Arc<F>,
    state: WorkerState,
    skip_waiting: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: Fetcher> CacheManager<F> {
    pub fn new(settings: CacheSettings, storage: Arc<CacheStorage>, fetcher: Arc<F>) -> Self {
        Self {
            settings,
            storage,
            fetcher,
            state: WorkerState::Parsed,
            skip_waiting: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Installed but still waiting for the previous version's pages to go away.
    pub fn is_waiting(&self) -> bool {
        self.state == WorkerState::Installed && !self.skip_waiting.load(Ordering::SeqCst)
    }

    pub fn skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            debug!(version = %self.settings.version, "Skip waiting requested");
        }
    }

    pub fn on_message(&self, message: ControlMessage) {
        match message {
            ControlMessage::SkipWaiting => self.skip_waiting(),
        }
    }

    /// Bring up the configured version against existing storage.
    ///
    /// An installed version is resumed and its stale generations cleaned up.
    /// Otherwise the version is installed and activated. If that fails, or
    /// the new version has to wait, the most recent previously installed
    /// version keeps serving. With nothing installed at all the returned
    /// manager is not active and passes every request to the network.
    pub async fn start(
        settings: CacheSettings,
        storage: Arc<CacheStorage>,
        fetcher: Arc<F>,
    ) -> Result<Self, CacheError> {
        let mut manager = Self::new(settings, storage, fetcher);

        if manager.storage.has(&manager.settings.static_cache).await {
            debug!(version = %manager.settings.version, "Found installed cache version");
            manager.state = WorkerState::Installed;
            manager.skip_waiting();
            manager.activate().await?;
            return Ok(manager);
        }

        match manager.install().await {
            Ok(()) if !manager.is_waiting() => {
                manager.activate().await?;
                return Ok(manager);
            }
            Ok(()) => {
                info!(version = %manager.settings.version, "New cache version installed and waiting");
            }
            Err(e) => {
                warn!(version = %manager.settings.version, error = %e, "Could not install cache version");
            }
        }

        let names = manager.storage.keys().await;
        if let Some(previous) = manager.settings.installed_version(&names) {
            info!(version = %previous, "Serving previously installed cache version");
            let mut fallback = Self::new(
                manager.settings.with_version(&previous),
                Arc::clone(&manager.storage),
                Arc::clone(&manager.fetcher),
            );
            fallback.resume();
            return Ok(fallback);
        }

        if manager.state == WorkerState::Installed {
            // No older version to wait for
            manager.skip_waiting();
            manager.activate().await?;
        }
        Ok(manager)
    }

    /// Precache the manifest into this version's static generation.
    ///
    /// All-or-nothing: if any entry fails to fetch or comes back non-2xx,
    /// nothing is stored and the manager becomes `Redundant`.
    pub async fn install(&mut self) -> Result<(), CacheError> {
        if self.state != WorkerState::Parsed {
            return Err(CacheError::InvalidState {
                action: "install",
                state: self.state,
            });
        }
        self.state = WorkerState::Installing;
        info!(version = %self.settings.version, assets = self.settings.precache.len(), "Installing offline cache");

        let fetches = self.settings.precache.iter().map(|url| self.precache_one(url));
        let fetched = try_join_all(fetches).await;
        let entries = match fetched {
            Ok(entries) => entries,
            Err(e) => {
                warn!(version = %self.settings.version, error = %e, "Install failed");
                self.state = WorkerState::Redundant;
                return Err(e);
            }
        };

        self.storage.put_all(&self.settings.static_cache, entries).await;
        self.state = WorkerState::Installed;
        info!(cache = %self.settings.static_cache, "Cached static assets");

        if self.settings.skip_waiting {
            self.skip_waiting();
        }
        Ok(())
    }

    async fn precache_one(&self, url: &Url) -> Result<(String, CachedResponse), CacheError> {
        let request = FetchRequest::get(url.clone());
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|source| CacheError::PrecacheFetch {
                url: url.to_string(),
                source,
            })?;
        if !response.is_ok() {
            return Err(CacheError::PrecacheStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok((request.cache_key(), response))
    }

    /// Delete every generation in our namespace that isn't this version's,
    /// then start intercepting. Returns the names of deleted generations.
    ///
    /// Refused while the version is waiting for [`ControlMessage::SkipWaiting`].
    pub async fn activate(&mut self) -> Result<Vec<String>, CacheError> {
        if self.state != WorkerState::Installed {
            return Err(CacheError::InvalidState {
                action: "activate",
                state: self.state,
            });
        }
        if self.is_waiting() {
            return Err(CacheError::Waiting {
                version: self.settings.version.clone(),
            });
        }
        self.state = WorkerState::Activating;
        info!(version = %self.settings.version, "Activating offline cache");

        let mut deleted = Vec::new();
        for name in self.storage.keys().await {
            if !self.settings.is_stale_generation(&name) {
                continue;
            }
            info!(cache = %name, "Deleting old cache generation");
            match self.storage.delete(&name).await {
                Ok(true) => deleted.push(name),
                Ok(false) => {}
                Err(e) => {
                    self.state = WorkerState::Installed;
                    return Err(e);
                }
            }
        }

        self.state = WorkerState::Activated;
        Ok(deleted)
    }

    /// Resume a version whose install already happened in an earlier run.
    pub fn resume(&mut self) {
        if self.state == WorkerState::Parsed {
            debug!(version = %self.settings.version, "Resuming installed cache version");
            self.state = WorkerState::Activated;
        }
    }

    /// Answer one outgoing request.
    ///
    /// Network transport errors are returned as-is; nothing is retried.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        if self.state != WorkerState::Activated || !request.is_get() {
            let response = self.fetcher.fetch(request).await?;
            return Ok(FetchOutcome::from_network(response));
        }

        if self.settings.is_tile_request(&request.url) {
            self.serve_tile(request).await
        } else {
            self.serve_static(request).await
        }
    }

    async fn serve_tile(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        let key = request.cache_key();
        if let Some(cached) = self.storage.match_in(&self.settings.tiles_cache, &key).await {
            return Ok(FetchOutcome::from_cache(cached));
        }

        let response = self.fetcher.fetch(request).await?;
        if response.is_ok() {
            self.storage
                .put(&self.settings.tiles_cache, &key, response.clone())
                .await;
        }
        Ok(FetchOutcome::from_network(response))
    }

    async fn serve_static(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        let key = request.cache_key();
        if let Some(cached) = self.storage.match_any(&key).await {
            self.revalidate(request.clone());
            return Ok(FetchOutcome::from_cache(cached));
        }

        let response = self.fetcher.fetch(request).await?;
        if response.is_ok() && self.settings.is_same_origin(&request.url) {
            self.storage
                .put(&self.settings.static_cache, &key, response.clone())
                .await;
        }
        Ok(FetchOutcome::from_network(response))
    }

    /// Refresh a static entry in the background. Failures are dropped.
    fn revalidate(&self, request: FetchRequest) {
        let fetcher = Arc::clone(&self.fetcher);
        let storage = Arc::clone(&self.storage);
        let cache_name = self.settings.static_cache.clone();

        let handle = tokio::spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) if response.is_ok() => {
                    storage.put(&cache_name, &request.cache_key(), response).await;
                    debug!(url = %request.url, "Refreshed cached asset");
                }
                Ok(response) => {
                    debug!(url = %request.url, status = response.status, "Background refresh not cached");
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Background refresh failed");
                }
            }
        });

        let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// Wait for every background refresh started so far.
    pub async fn settle(&self) {
        let handles = {
            let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *background)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background refresh task did not complete");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
