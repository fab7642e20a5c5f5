//! Offline cache for static assets and map tiles.
//!
//! This module provides the `CacheManager`, which answers every outgoing
//! request of the map app from two versioned cache generations:
//!
//! - `<namespace>static-<version>`: app shell, scripts, stylesheets, icons, fonts
//! - `<namespace>tiles-<version>`: map tile imagery, grown on demand and never evicted
//!
//! Bumping the version token is the only invalidation mechanism: a new
//! version precaches into fresh generations on install and deletes the
//! previous version's generations on activate.

pub mod error;
pub mod manager;
pub mod network;
pub mod response;
pub mod settings;
pub mod storage;

pub use error::{CacheError, FetchError};
pub use manager::{CacheManager, ControlMessage, WorkerState};
pub use network::{Fetcher, HttpFetcher};
pub use response::{CachedResponse, FetchOutcome, FetchRequest, ResponseSource};
pub use settings::CacheSettings;
pub use storage::{CacheStorage, CachedData, GenerationSummary};
