use thiserror::Error;

use super::manager::WorkerState;

/// Failure of a single network fetch. Handed back to the caller untouched.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Network unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Precache fetch failed for {url}: {source}")]
    PrecacheFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Precache fetch for {url} returned status {status}")]
    PrecacheStatus { url: String, status: u16 },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Cannot {action} while worker is {state:?}")]
    InvalidState {
        action: &'static str,
        state: WorkerState,
    },

    #[error("Version {version} is installed and waiting for skipWaiting")]
    Waiting { version: String },

    #[error("Unknown control message: {0}")]
    UnknownMessage(String),

    #[error("Cache storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode cache snapshot {name}: {source}")]
    Snapshot {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}
