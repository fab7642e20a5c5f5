//! Application configuration management.
//!
//! This module handles loading and saving the configuration shared by the
//! telemetry reporter and the offline cache: the collection endpoint and
//! key, the cache namespace and version token, and the precache manifest.
//!
//! Configuration is stored at `~/.config/goodeats/config.json`. Any field
//! may be overridden from the environment (see [`Config::apply_env`]).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "goodeats";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Tag attached to every telemetry event to tell app builds apart.
const DEFAULT_APP_VERSION: &str = "mapbox";

/// HTTP timeout for telemetry posts. Analytics must never hold a connection for long.
const DEFAULT_TELEMETRY_TIMEOUT_SECS: u64 = 10;

/// Prefix shared by every cache generation this app owns.
const DEFAULT_NAMESPACE: &str = "uncle-ds-";

/// Bump to invalidate every cached asset and tile.
const DEFAULT_CACHE_VERSION: &str = "v6";

const DEFAULT_SCOPE: &str = "http://localhost:8080/";

const DEFAULT_TILE_HOST: &str = "mapbox";
const DEFAULT_TILE_PATH: &str = "/tiles/";

/// Assets fetched eagerly on install. Relative entries resolve against the scope.
const DEFAULT_PRECACHE: &[&str] = &[
    "./",
    "./index.html",
    "./manifest.json",
    "./icons/icon-192.svg",
    "./icons/icon-512.svg",
    "https://api.mapbox.com/mapbox-gl-js/v3.0.1/mapbox-gl.css",
    "https://api.mapbox.com/mapbox-gl-js/v3.0.1/mapbox-gl.js",
    "https://fonts.googleapis.com/css2?family=Archivo+Black&family=Inter:wght@300;400;500;600;700&display=swap",
];

pub const ENV_TELEMETRY_ENDPOINT: &str = "GOODEATS_TELEMETRY_ENDPOINT";
pub const ENV_TELEMETRY_API_KEY: &str = "GOODEATS_TELEMETRY_API_KEY";
pub const ENV_SCOPE: &str = "GOODEATS_SCOPE";
pub const ENV_CACHE_VERSION: &str = "GOODEATS_CACHE_VERSION";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub telemetry: TelemetryConfig,
    pub offline: OfflineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Base URL of the collection API; events go to `<endpoint>/events`.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub app_version: String,
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            app_version: DEFAULT_APP_VERSION.to_string(),
            timeout_secs: DEFAULT_TELEMETRY_TIMEOUT_SECS,
        }
    }
}

impl TelemetryConfig {
    /// Telemetry is only sent when both endpoint and key are configured.
    pub fn is_enabled(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.is_empty())
            && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Root URL of the application. Its origin decides what counts as same-origin.
    pub scope: String,
    pub namespace: String,
    pub version: String,
    pub precache: Vec<String>,
    /// A request is a tile request when its host contains `tile_host`
    /// and its path contains `tile_path`.
    pub tile_host: String,
    pub tile_path: String,
    /// Activate a freshly installed version right away. When false, the
    /// previous version keeps serving until a `skipWaiting` message arrives.
    pub skip_waiting: bool,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            version: DEFAULT_CACHE_VERSION.to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
            tile_host: DEFAULT_TILE_HOST.to_string(),
            tile_path: DEFAULT_TILE_PATH.to_string(),
            skip_waiting: true,
        }
    }
}

impl OfflineConfig {
    pub fn static_cache_name(&self) -> String {
        format!("{}static-{}", self.namespace, self.version)
    }

    pub fn tiles_cache_name(&self) -> String {
        format!("{}tiles-{}", self.namespace, self.version)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override fields from environment variables. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = get(ENV_TELEMETRY_ENDPOINT) {
            self.telemetry.endpoint = Some(endpoint);
        }
        if let Some(key) = get(ENV_TELEMETRY_API_KEY) {
            self.telemetry.api_key = Some(key);
        }
        if let Some(scope) = get(ENV_SCOPE) {
            self.offline.scope = scope;
        }
        if let Some(version) = get(ENV_CACHE_VERSION) {
            self.offline.version = version;
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
