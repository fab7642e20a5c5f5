use reqwest::Url;

use super::CacheError;
use crate::config::OfflineConfig;

/// Resolved form of [`OfflineConfig`]: parsed URLs and concrete generation names.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub scope: Url,
    pub namespace: String,
    pub version: String,
    pub static_cache: String,
    pub tiles_cache: String,
    pub precache: Vec<Url>,
    pub tile_host: String,
    pub tile_path: String,
    pub skip_waiting: bool,
}

impl CacheSettings {
    pub fn from_config(config: &OfflineConfig) -> Result<Self, CacheError> {
        let scope = Url::parse(&config.scope).map_err(|e| CacheError::InvalidUrl {
            url: config.scope.clone(),
            reason: e.to_string(),
        })?;

        let precache = config
            .precache
            .iter()
            .map(|entry| {
                scope.join(entry).map_err(|e| CacheError::InvalidUrl {
                    url: entry.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            static_cache: config.static_cache_name(),
            tiles_cache: config.tiles_cache_name(),
            scope,
            namespace: config.namespace.clone(),
            version: config.version.clone(),
            precache,
            tile_host: config.tile_host.clone(),
            tile_path: config.tile_path.clone(),
            skip_waiting: config.skip_waiting,
        })
    }

    /// The same layout for another version token.
    pub fn with_version(&self, version: &str) -> Self {
        Self {
            version: version.to_string(),
            static_cache: format!("{}static-{}", self.namespace, version),
            tiles_cache: format!("{}tiles-{}", self.namespace, version),
            ..self.clone()
        }
    }

    /// Most recently created version other than ours that has a static
    /// generation among `names` (given in creation order).
    pub fn installed_version(&self, names: &[String]) -> Option<String> {
        let prefix = format!("{}static-", self.namespace);
        names
            .iter()
            .rev()
            .filter(|name| **name != self.static_cache)
            .find_map(|name| name.strip_prefix(&prefix))
            .filter(|version| !version.is_empty())
            .map(str::to_string)
    }

    pub fn is_tile_request(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| host.contains(&self.tile_host))
            && url.path().contains(&self.tile_path)
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.scope.origin()
    }

    /// A generation in our namespace that belongs to some other version.
    pub fn is_stale_generation(&self, name: &str) -> bool {
        name.starts_with(&self.namespace) && name != self.static_cache && name != self.tiles_cache
    }
}
