//! goodeats - command-line driver for the Good Eats offline cache and
//! telemetry reporter.
//!
//! Cache generations are persisted under the user cache directory, so
//! `install`, `fetch`, `status` and `purge` operate on the same state
//! across runs.
//!
//! `track` runs a full reporter session: it emits the session's `page_view`
//! before the requested event. The session id is kept in the cache directory
//! and reused by every run until `session-reset` clears it.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use goodeats_core::cache::{FetchRequest, ResponseSource};
use goodeats_core::telemetry::{
    spawn_reporter, EventType, FileSessionStorage, PageContext, Reporter,
};
use goodeats_core::utils::{age_display, SystemClock};
use goodeats_core::{
    CacheManager, CacheSettings, CacheStorage, Config, HttpFetcher, HttpTransport,
    TelemetrySettings,
};

// ============================================================================
// Constants
// ============================================================================

/// Directory for rolling log files; logs only go to stderr when unset
const ENV_LOG_DIR: &str = "GOODEATS_LOG_DIR";

const LOG_FILE_PREFIX: &str = "goodeats.log";

/// Subdirectory of the cache dir holding generation snapshots
const CACHES_DIR: &str = "caches";

const USAGE: &str = "\
Usage: goodeats <command>

Commands:
  install            install and activate the current cache version
  fetch <url>        serve one request through the offline cache
  status             list cache generations
  purge              delete every cache generation in the namespace
  track <type> [v]   send one telemetry event (after the session's page_view)
  session-reset      start a new telemetry session on the next track
  config             write the effective configuration to the config file
";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the log file on drop and must be held until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprint!("{}", USAGE);
        std::process::exit(2);
    };

    let config = Config::load()?;
    debug!(command = %command, version = %config.offline.version, "goodeats starting");

    match command.as_str() {
        "install" => install(&config).await,
        "fetch" => {
            let url = args.get(1).context("fetch requires a URL")?;
            fetch(&config, url).await
        }
        "status" => status(&config).await,
        "purge" => purge(&config).await,
        "track" => {
            let event_type = args.get(1).context("track requires an event type")?;
            track(&config, event_type, args.get(2).map(String::as_str)).await
        }
        "session-reset" => session_reset(&config),
        "config" => {
            config.save()?;
            println!("Wrote {}", Config::config_path()?.display());
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print!("{}", USAGE);
            Ok(())
        }
        other => {
            eprint!("{}", USAGE);
            bail!("Unknown command: {}", other)
        }
    }
}

// ============================================================================
// Offline cache commands
// ============================================================================

fn open_storage(config: &Config) -> Result<Arc<CacheStorage>> {
    let dir: PathBuf = config.cache_dir()?.join(CACHES_DIR);
    let storage = CacheStorage::persistent(dir.clone())
        .with_context(|| format!("Failed to open cache storage: {}", dir.display()))?;
    Ok(Arc::new(storage))
}

fn new_manager(config: &Config, storage: Arc<CacheStorage>) -> Result<CacheManager<HttpFetcher>> {
    let settings = CacheSettings::from_config(&config.offline)?;
    let fetcher = HttpFetcher::new()?;
    Ok(CacheManager::new(settings, storage, Arc::new(fetcher)))
}

async fn install(config: &Config) -> Result<()> {
    let storage = open_storage(config)?;
    let mut manager = new_manager(config, Arc::clone(&storage))?;

    manager.install().await.context("Install failed")?;
    if manager.is_waiting() {
        info!(version = %manager.settings().version, "Taking over from the running version");
        manager.skip_waiting();
    }
    let deleted = manager.activate().await.context("Activate failed")?;
    storage.save().await?;

    let settings = manager.settings();
    println!(
        "Installed {} ({} assets)",
        settings.static_cache,
        storage.len(&settings.static_cache).await
    );
    for name in deleted {
        println!("Deleted {}", name);
    }
    Ok(())
}

async fn fetch(config: &Config, url: &str) -> Result<()> {
    let storage = open_storage(config)?;
    let settings = CacheSettings::from_config(&config.offline)?;
    let fetcher = Arc::new(HttpFetcher::new()?);
    let manager = CacheManager::start(settings, Arc::clone(&storage), fetcher)
        .await
        .context("Failed to start offline cache")?;
    if manager.settings().version != config.offline.version {
        eprintln!("Serving cache version {}", manager.settings().version);
    }

    let request = FetchRequest::parse_get(url)?;
    let outcome = manager.handle_fetch(&request).await?;
    manager.settle().await;
    storage.save().await?;

    let source = match outcome.source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
    };
    let response = &outcome.response;
    println!(
        "{} {} from {} ({} bytes, {})",
        response.status,
        response.url,
        source,
        response.body.len(),
        response.header("content-type").unwrap_or("no content type")
    );
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let storage = open_storage(config)?;
    let summaries = storage.summaries().await;
    if summaries.is_empty() {
        println!("No cache generations");
        return Ok(());
    }

    let now = Utc::now();
    let static_cache = config.offline.static_cache_name();
    let tiles_cache = config.offline.tiles_cache_name();
    for summary in summaries {
        let current = summary.name == static_cache || summary.name == tiles_cache;
        let saved = summary
            .saved_at
            .map(|at| format!("saved {}", age_display(at, now)))
            .unwrap_or_else(|| "not saved".to_string());
        println!(
            "{} {:<28} {:>6} entries {:>10} bytes  created {}, {}",
            if current { "*" } else { " " },
            summary.name,
            summary.entries,
            summary.bytes,
            age_display(summary.created_at, now),
            saved
        );
    }
    Ok(())
}

async fn purge(config: &Config) -> Result<()> {
    let storage = open_storage(config)?;
    let mut purged = 0;
    for name in storage.keys().await {
        if name.starts_with(&config.offline.namespace) && storage.delete(&name).await? {
            info!(cache = %name, "Purged cache generation");
            purged += 1;
        }
    }
    println!("Purged {} generation(s)", purged);
    Ok(())
}

// ============================================================================
// Telemetry command
// ============================================================================

async fn track(config: &Config, event_type: &str, value: Option<&str>) -> Result<()> {
    let event_type: EventType = event_type.parse()?;
    if !config.telemetry.is_enabled() {
        bail!("Telemetry is not configured (set telemetry.endpoint and telemetry.api_key)");
    }

    let settings = TelemetrySettings::from_config(&config.telemetry)?;
    let transport = Arc::new(HttpTransport::new(&settings)?);
    let storage = FileSessionStorage::new(config.cache_dir()?);
    let page = PageContext {
        url: config.offline.scope.clone(),
        referrer: None,
        user_agent: format!("goodeats-cli/{}", env!("CARGO_PKG_VERSION")),
        viewport_width: 0,
        viewport_height: 0,
    };

    let reporter = Reporter::start(transport, &storage, SystemClock, &settings.app_version, page);
    let session_id = reporter.session_id().to_string();
    let (handle, task) = spawn_reporter(reporter);

    handle.track(event_type, value).await;
    drop(handle);
    task.await.context("Telemetry reporter task failed")?;

    println!("Sent {} (session {})", event_type, session_id);
    Ok(())
}

fn session_reset(config: &Config) -> Result<()> {
    FileSessionStorage::new(config.cache_dir()?).clear()?;
    println!("Telemetry session cleared");
    Ok(())
}
