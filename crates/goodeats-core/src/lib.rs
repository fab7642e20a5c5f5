//! goodeats core library.
//!
//! Two independent pieces that ship alongside the Good Eats restaurant map:
//!
//! - [`telemetry`]: a fire-and-forget event reporter with frustration
//!   heuristics (rage clicks, dropdown thrashing, quick bounces)
//! - [`cache`]: a versioned offline cache that serves map tiles cache-first
//!   and static assets stale-while-revalidate
//!
//! Both read their settings from [`Config`].

pub mod cache;
pub mod config;
pub mod telemetry;
pub mod utils;

pub use cache::{CacheManager, CacheSettings, CacheStorage, HttpFetcher};
pub use config::{Config, OfflineConfig, TelemetryConfig};
pub use telemetry::{HttpTransport, Reporter, TelemetrySettings};
