//! End-to-end checks through the public API: a cache version bump across a
//! process restart, and a reporter session driven through its actor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use goodeats_core::cache::{
    CacheManager, CacheSettings, CacheStorage, CachedResponse, FetchError, FetchRequest, Fetcher,
    ResponseSource, WorkerState,
};
use goodeats_core::config::OfflineConfig;
use goodeats_core::telemetry::{
    spawn_reporter, ClickSignal, EventRecord, EventType, MemorySessionStorage, PageContext,
    Reporter, Signal, TelemetryError, Transport, UserAction,
};
use goodeats_core::utils::ManualClock;

/// Serves a 200 for every URL, with the URL as the body.
#[derive(Default)]
struct EchoFetcher {
    calls: AtomicUsize,
}

impl Fetcher for EchoFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CachedResponse::new(
            request.url.as_str(),
            200,
            request.url.as_str().as_bytes().to_vec(),
        ))
    }
}

fn offline_config(version: &str) -> OfflineConfig {
    OfflineConfig {
        scope: "https://goodeats.test/".to_string(),
        version: version.to_string(),
        precache: vec!["./".to_string(), "./index.html".to_string()],
        ..OfflineConfig::default()
    }
}

fn manager(
    version: &str,
    storage: Arc<CacheStorage>,
    fetcher: Arc<EchoFetcher>,
) -> CacheManager<EchoFetcher> {
    let settings = CacheSettings::from_config(&offline_config(version)).expect("settings");
    CacheManager::new(settings, storage, fetcher)
}

#[tokio::test]
async fn test_version_bump_across_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(EchoFetcher::default());
    let tile = FetchRequest::parse_get("https://api.mapbox.com/v4/tiles/3/2/1.png").expect("url");

    // First run: install v6 and pull one tile through the cache
    {
        let storage = Arc::new(CacheStorage::persistent(dir.path()).expect("storage"));
        storage.open("someone-else-v1").await;

        let mut v6 = manager("v6", Arc::clone(&storage), Arc::clone(&fetcher));
        v6.install().await.expect("install v6");
        v6.activate().await.expect("activate v6");

        let outcome = v6.handle_fetch(&tile).await.expect("tile");
        assert_eq!(outcome.source, ResponseSource::Network);
        storage.save().await.expect("save");
    }

    // Restart on the same version: the tile is served from disk
    {
        let storage = Arc::new(CacheStorage::persistent(dir.path()).expect("storage"));
        let mut v6 = manager("v6", Arc::clone(&storage), Arc::clone(&fetcher));
        assert!(storage.has("uncle-ds-static-v6").await);
        v6.resume();
        assert_eq!(v6.state(), WorkerState::Activated);

        let before = fetcher.calls.load(Ordering::SeqCst);
        let outcome = v6.handle_fetch(&tile).await.expect("tile");
        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), before);
    }

    // Bump to v7: old generations go, foreign ones stay, tiles start cold
    let storage = Arc::new(CacheStorage::persistent(dir.path()).expect("storage"));
    let mut v7 = manager("v7", Arc::clone(&storage), Arc::clone(&fetcher));
    v7.install().await.expect("install v7");
    let mut deleted = v7.activate().await.expect("activate v7");
    deleted.sort();
    assert_eq!(deleted, vec!["uncle-ds-static-v6", "uncle-ds-tiles-v6"]);

    let keys = storage.keys().await;
    assert!(keys.contains(&"someone-else-v1".to_string()));
    assert!(keys.contains(&"uncle-ds-static-v7".to_string()));
    assert!(!keys.iter().any(|k| k.ends_with("-v6")));

    let outcome = v7.handle_fetch(&tile).await.expect("tile");
    assert_eq!(outcome.source, ResponseSource::Network);
    assert_eq!(storage.len("uncle-ds-tiles-v7").await, 1);

    storage.save().await.expect("save");
    let reloaded = CacheStorage::persistent(dir.path()).expect("reload");
    assert!(!reloaded.has("uncle-ds-static-v6").await);
}

#[derive(Default)]
struct RecordingTransport {
    posted: Mutex<Vec<EventRecord>>,
    beacons: Mutex<Vec<EventRecord>>,
}

impl Transport for RecordingTransport {
    async fn post_event(&self, record: &EventRecord) -> Result<(), TelemetryError> {
        self.posted.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn send_beacon(&self, record: &EventRecord) -> bool {
        self.beacons.lock().unwrap().push(record.clone());
        true
    }
}

#[tokio::test]
async fn test_reporter_session_through_actor() {
    let transport = Arc::new(RecordingTransport::default());
    let clock = Arc::new(ManualClock::default());
    let page = PageContext {
        url: "https://goodeats.test/".to_string(),
        referrer: Some(String::new()),
        user_agent: "integration".to_string(),
        viewport_width: 390,
        viewport_height: 844,
    };
    let reporter = Reporter::start(
        Arc::clone(&transport),
        &MemorySessionStorage::new(),
        Arc::clone(&clock),
        "mapbox",
        page,
    );
    let (handle, task) = spawn_reporter(reporter);

    handle
        .action(UserAction::Search("  brisket ".to_string()))
        .await;
    for _ in 0..3 {
        handle
            .signal(Signal::Click(ClickSignal {
                x: 120.0,
                y: 80.0,
                target_tag: "DIV".to_string(),
                target_class: Some("map-marker".to_string()),
            }))
            .await;
        clock.advance_ms(150);
    }
    clock.advance_ms(20_000);
    handle.signal(Signal::VisibilityChange { hidden: true }).await;
    handle.signal(Signal::PageUnload).await;

    drop(handle);
    task.await.expect("reporter task");

    let posted = transport.posted.lock().unwrap().clone();
    let types: Vec<_> = posted.iter().map(|r| r.event_type).collect();
    assert_eq!(
        types,
        vec![EventType::PageView, EventType::Search, EventType::RageClick]
    );
    assert_eq!(posted[1].event_value.as_deref(), Some("brisket"));
    assert_eq!(posted[2].event_value.as_deref(), Some("map-marker"));
    assert!(posted.iter().all(|r| r.referrer.is_none()));
    assert!(posted.iter().all(|r| r.session_id == posted[0].session_id));

    let beacons = transport.beacons.lock().unwrap().clone();
    assert_eq!(beacons.len(), 1);
    assert_eq!(beacons[0].event_type, EventType::SessionEnd);
    assert_eq!(beacons[0].event_value.as_deref(), Some("20s, 3 events"));
}
