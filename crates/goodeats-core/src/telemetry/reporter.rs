//! The event reporter.
//!
//! A [`Reporter`] owns one session's state and turns host signals and
//! explicit tracking calls into [`EventRecord`]s. Every record is handed to
//! the [`Transport`] on a detached task: the caller never waits on the
//! network and never sees a delivery failure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frustration::{classify_teardown, ClickSample};
use super::session::{resolve_session_id, SessionState, SessionStorage};
use super::{EventRecord, EventType, PageContext, Transport};
use crate::utils::{truncate_chars, Clock, SystemClock};

/// Longest value sent for user-typed or DOM-derived text.
pub const MAX_VALUE_CHARS: usize = 100;

/// Host signal categories the reporter listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Error,
    UnhandledRejection,
    Click,
    VisibilityChange,
    PageUnload,
}

/// A click as reported by the host, with what was clicked.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickSignal {
    pub x: f64,
    pub y: f64,
    pub target_tag: String,
    /// Class attribute of the nearest ancestor (or self) that has one.
    pub target_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Error {
        message: String,
        source: String,
        line: u32,
    },
    UnhandledRejection {
        reason: String,
    },
    Click(ClickSignal),
    VisibilityChange {
        hidden: bool,
    },
    PageUnload,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Error { .. } => SignalKind::Error,
            Signal::UnhandledRejection { .. } => SignalKind::UnhandledRejection,
            Signal::Click(_) => SignalKind::Click,
            Signal::VisibilityChange { .. } => SignalKind::VisibilityChange,
            Signal::PageUnload => SignalKind::PageUnload,
        }
    }
}

/// Domain actions the app reports explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    RestaurantClick(String),
    PopupOpen(String),
    DirectionsClick(String),
    ViewOnMapClick(String),
    Search(String),
    SearchNoResults(String),
    SearchResultClick(String),
    ViewSwitch(String),
    SortChange(String),
    LocationRequest(String),
    DropdownClick,
}

const SUBSCRIPTIONS: &[SignalKind] = &[
    SignalKind::Error,
    SignalKind::UnhandledRejection,
    SignalKind::Click,
    SignalKind::VisibilityChange,
    SignalKind::PageUnload,
];

pub struct Reporter<T: Transport, C: Clock = SystemClock> {
    transport: Arc<T>,
    clock: C,
    app_version: String,
    page: PageContext,
    session: SessionState,
    pending: Vec<JoinHandle<()>>,
}

impl<T: Transport, C: Clock> Reporter<T, C> {
    /// Resolve the session, record its start and emit `page_view`.
    pub fn start(
        transport: Arc<T>,
        storage: &dyn SessionStorage,
        clock: C,
        app_version: impl Into<String>,
        page: PageContext,
    ) -> Self {
        let session = SessionState::new(resolve_session_id(storage), clock.now());
        let mut reporter = Self {
            transport,
            clock,
            app_version: app_version.into(),
            page,
            session,
            pending: Vec::new(),
        };

        reporter.track(EventType::PageView, None);
        info!(session = %reporter.session.id, "Telemetry reporter started");
        reporter
    }

    /// Signal kinds the host should route to [`Reporter::on_signal`].
    pub fn subscriptions() -> &'static [SignalKind] {
        SUBSCRIPTIONS
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn event_count(&self) -> u64 {
        self.session.event_count
    }

    /// Current dropdown `(clicks, changes)` counters.
    pub fn dropdown_counts(&self) -> (u32, u32) {
        self.session.dropdown.counts()
    }

    pub fn set_page(&mut self, page: PageContext) {
        self.page = page;
    }

    fn record(&self, event_type: EventType, value: Option<&str>) -> EventRecord {
        EventRecord::new(&self.session.id, event_type, value, &self.page, &self.app_version)
    }

    /// Emit one event. Delivery happens in the background; failures are only logged.
    pub fn track(&mut self, event_type: EventType, value: Option<&str>) {
        self.session.event_count += 1;
        let record = self.record(event_type, value);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = %event_type, "No async runtime, telemetry event dropped");
            return;
        };

        let transport = Arc::clone(&self.transport);
        let handle = runtime.spawn(async move {
            if let Err(e) = transport.post_event(&record).await {
                debug!(event = %record.event_type, error = %e, "Telemetry event not delivered");
            }
        });

        self.pending.retain(|h| !h.is_finished());
        self.pending.push(handle);
    }

    /// Emit one event through the teardown-safe beacon path.
    pub fn send_beacon(&self, event_type: EventType, value: &str) {
        let record = self.record(event_type, Some(value));
        if !self.transport.send_beacon(&record) {
            debug!(event = %event_type, "Beacon not queued");
        }
    }

    pub fn on_signal(&mut self, signal: Signal) {
        let now = self.clock.now();
        self.on_signal_at(signal, now);
    }

    /// Handle a signal that happened at `at`. Hosts that queue signals
    /// stamp them when they occur so the click and teardown windows stay exact.
    pub fn on_signal_at(&mut self, signal: Signal, at: DateTime<Utc>) {
        match signal {
            Signal::Error {
                message,
                source,
                line,
            } => {
                let value = format!("{} at {}:{}", message, source, line);
                self.track(EventType::JsError, Some(&value));
            }
            Signal::UnhandledRejection { reason } => {
                let value = format!("Unhandled promise: {}", reason);
                self.track(EventType::JsError, Some(&value));
            }
            Signal::Click(click) => self.on_click(click, at),
            Signal::VisibilityChange { hidden: true } | Signal::PageUnload => self.end_session(at),
            Signal::VisibilityChange { hidden: false } => {
                self.session.teardown_reported = false;
            }
        }
    }

    fn on_click(&mut self, click: ClickSignal, at: DateTime<Utc>) {
        let sample = ClickSample {
            x: click.x,
            y: click.y,
            at,
        };
        if !self.session.clicks.record(sample) {
            return;
        }

        let target = click
            .target_class
            .filter(|class| !class.is_empty())
            .unwrap_or(click.target_tag);
        let value = truncate_chars(&target, MAX_VALUE_CHARS);
        self.track(EventType::RageClick, Some(&value));
    }

    /// Report the end of the session once per teardown.
    fn end_session(&mut self, at: DateTime<Utc>) {
        if self.session.teardown_reported {
            return;
        }
        self.session.teardown_reported = true;

        let elapsed = at - self.session.started_at;
        let teardown = classify_teardown(elapsed, self.session.event_count);
        debug!(event = %teardown.event_type, secs = teardown.duration_secs, "Session teardown");
        self.send_beacon(teardown.event_type, &teardown.value);
    }

    // ===== Dropdown Frustration =====

    pub fn track_dropdown_click(&mut self) {
        let now = self.clock.now();
        self.track_dropdown_click_at(now);
    }

    pub fn track_dropdown_click_at(&mut self, at: DateTime<Utc>) {
        let frustrated = self.session.dropdown.record_click(at);
        self.track(EventType::DropdownClick, Some("sort"));

        if let Some((clicks, changes)) = frustrated {
            let value = format!("{} clicks, {} changes", clicks, changes);
            self.track(EventType::DropdownFrustration, Some(&value));
        }
    }

    /// Meant to be called every few seconds by the host.
    pub fn reset_dropdown_tracking(&mut self) {
        let now = self.clock.now();
        self.session.dropdown.reset_if_idle(now);
    }

    // ===== Convenience Methods =====

    pub fn track_restaurant_click(&mut self, name: &str) {
        self.track(EventType::RestaurantClick, Some(name));
    }

    pub fn track_popup_open(&mut self, name: &str) {
        self.track(EventType::PopupOpen, Some(name));
    }

    pub fn track_directions_click(&mut self, name: &str) {
        self.track(EventType::DirectionsClick, Some(name));
    }

    pub fn track_view_on_map_click(&mut self, name: &str) {
        self.track(EventType::ViewOnMapClick, Some(name));
    }

    /// Blank queries are not reported.
    pub fn track_search(&mut self, query: &str) {
        let query = query.trim();
        if !query.is_empty() {
            let value = truncate_chars(query, MAX_VALUE_CHARS);
            self.track(EventType::Search, Some(&value));
        }
    }

    pub fn track_search_no_results(&mut self, query: &str) {
        let value = truncate_chars(query.trim(), MAX_VALUE_CHARS);
        self.track(EventType::SearchNoResults, Some(&value));
    }

    pub fn track_search_result_click(&mut self, name: &str) {
        self.track(EventType::SearchResultClick, Some(name));
    }

    pub fn track_view_switch(&mut self, view: &str) {
        self.track(EventType::ViewSwitch, Some(view));
    }

    /// A completed selection in the sort dropdown.
    pub fn track_sort_change(&mut self, sort_by: &str) {
        self.session.dropdown.record_change();
        self.track(EventType::SortChange, Some(sort_by));
    }

    pub fn track_location_request(&mut self, result: &str) {
        self.track(EventType::LocationRequest, Some(result));
    }

    pub fn record_action(&mut self, action: UserAction) {
        let now = self.clock.now();
        self.record_action_at(action, now);
    }

    /// Like [`Reporter::record_action`], for an action that happened at `at`.
    pub fn record_action_at(&mut self, action: UserAction, at: DateTime<Utc>) {
        match action {
            UserAction::RestaurantClick(name) => self.track_restaurant_click(&name),
            UserAction::PopupOpen(name) => self.track_popup_open(&name),
            UserAction::DirectionsClick(name) => self.track_directions_click(&name),
            UserAction::ViewOnMapClick(name) => self.track_view_on_map_click(&name),
            UserAction::Search(query) => self.track_search(&query),
            UserAction::SearchNoResults(query) => self.track_search_no_results(&query),
            UserAction::SearchResultClick(name) => self.track_search_result_click(&name),
            UserAction::ViewSwitch(view) => self.track_view_switch(&view),
            UserAction::SortChange(sort_by) => self.track_sort_change(&sort_by),
            UserAction::LocationRequest(result) => self.track_location_request(&result),
            UserAction::DropdownClick => self.track_dropdown_click_at(at),
        }
    }

    /// Wait for every dispatched event and queued beacon.
    pub async fn flush(&mut self) {
        for handle in std::mem::take(&mut self.pending) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Telemetry dispatch task did not complete");
            }
        }
        self.transport.flush().await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::telemetry::{MemorySessionStorage, TelemetryError, SESSION_KEY};
    use crate::utils::ManualClock;

    #[derive(Default)]
    struct RecordingTransport {
        posted: Mutex<Vec<EventRecord>>,
        beacons: Mutex<Vec<EventRecord>>,
        fail: AtomicBool,
    }

    impl RecordingTransport {
        fn posted_types(&self) -> Vec<EventType> {
            self.posted.lock().unwrap().iter().map(|r| r.event_type).collect()
        }

        fn posted_of(&self, event_type: EventType) -> Vec<EventRecord> {
            self.posted
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.event_type == event_type)
                .cloned()
                .collect()
        }

        fn beacons(&self) -> Vec<(EventType, Option<String>)> {
            self.beacons
                .lock()
                .unwrap()
                .iter()
                .map(|r| (r.event_type, r.event_value.clone()))
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        async fn post_event(&self, record: &EventRecord) -> Result<(), TelemetryError> {
            self.posted.lock().unwrap().push(record.clone());
            if self.fail.load(Ordering::SeqCst) {
                Err(TelemetryError::Rejected { status: 500 })
            } else {
                Ok(())
            }
        }

        fn send_beacon(&self, record: &EventRecord) -> bool {
            self.beacons.lock().unwrap().push(record.clone());
            true
        }
    }

    type TestReporter = Reporter<RecordingTransport, Arc<ManualClock>>;

    fn page() -> PageContext {
        PageContext {
            url: "https://goodeats.test/".to_string(),
            referrer: None,
            user_agent: "test-agent".to_string(),
            viewport_width: 1280,
            viewport_height: 720,
        }
    }

    fn start() -> (TestReporter, Arc<RecordingTransport>, Arc<ManualClock>) {
        let transport = Arc::new(RecordingTransport::default());
        let clock = Arc::new(ManualClock::default());
        let storage = MemorySessionStorage::new();
        let reporter = Reporter::start(
            Arc::clone(&transport),
            &storage,
            Arc::clone(&clock),
            "mapbox",
            page(),
        );
        (reporter, transport, clock)
    }

    fn click(x: f64, y: f64, class: Option<&str>) -> Signal {
        Signal::Click(ClickSignal {
            x,
            y,
            target_tag: "BUTTON".to_string(),
            target_class: class.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_start_emits_page_view() {
        let (mut reporter, transport, _) = start();
        reporter.flush().await;

        assert_eq!(transport.posted_types(), vec![EventType::PageView]);
        assert_eq!(reporter.event_count(), 1);

        let record = &transport.posted.lock().unwrap()[0];
        assert_eq!(record.session_id, reporter.session_id());
        assert_eq!(record.page_url, "https://goodeats.test/");
        assert_eq!(record.screen_width, 1280);
        assert_eq!(record.app_version, "mapbox");
    }

    #[tokio::test]
    async fn test_session_id_reused_within_storage_scope() {
        let transport = Arc::new(RecordingTransport::default());
        let storage = MemorySessionStorage::new();
        storage.set(SESSION_KEY, "existing-session").expect("set");

        let reporter = Reporter::start(transport, &storage, SystemClock, "mapbox", page());
        assert_eq!(reporter.session_id(), "existing-session");
    }

    #[tokio::test]
    async fn test_track_snapshots_current_page() {
        let (mut reporter, transport, _) = start();
        reporter.set_page(PageContext {
            url: "https://goodeats.test/#list".to_string(),
            referrer: Some("https://search.example.com/".to_string()),
            ..page()
        });
        reporter.track_view_switch("list");
        reporter.flush().await;

        let records = transport.posted_of(EventType::ViewSwitch);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].page_url, "https://goodeats.test/#list");
        assert_eq!(records[0].referrer.as_deref(), Some("https://search.example.com/"));
        assert_eq!(records[0].event_value.as_deref(), Some("list"));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let (mut reporter, transport, _) = start();
        transport.fail.store(true, Ordering::SeqCst);

        reporter.track_restaurant_click("Joe's Diner");
        reporter.flush().await;

        assert_eq!(reporter.event_count(), 2);
        assert_eq!(transport.posted_of(EventType::RestaurantClick).len(), 1);
    }

    #[tokio::test]
    async fn test_error_signals() {
        let (mut reporter, transport, _) = start();
        reporter.on_signal(Signal::Error {
            message: "TypeError: x is undefined".to_string(),
            source: "app.js".to_string(),
            line: 42,
        });
        reporter.on_signal(Signal::UnhandledRejection {
            reason: "timeout".to_string(),
        });
        reporter.flush().await;

        let values: Vec<_> = transport
            .posted_of(EventType::JsError)
            .into_iter()
            .filter_map(|r| r.event_value)
            .collect();
        assert_eq!(
            values,
            vec!["TypeError: x is undefined at app.js:42", "Unhandled promise: timeout"]
        );
    }

    #[tokio::test]
    async fn test_rage_click_fires_once_per_burst() {
        let (mut reporter, transport, clock) = start();

        for _ in 0..3 {
            reporter.on_signal(click(200.0, 300.0, Some("sort-dropdown open")));
            clock.advance_ms(200);
        }
        // History was cleared; a fourth click alone does nothing
        reporter.on_signal(click(200.0, 300.0, Some("sort-dropdown open")));
        reporter.flush().await;

        let rage = transport.posted_of(EventType::RageClick);
        assert_eq!(rage.len(), 1);
        assert_eq!(rage[0].event_value.as_deref(), Some("sort-dropdown open"));

        clock.advance_ms(200);
        reporter.on_signal(click(205.0, 305.0, None));
        clock.advance_ms(200);
        reporter.on_signal(click(195.0, 295.0, None));
        reporter.flush().await;
        assert_eq!(transport.posted_of(EventType::RageClick).len(), 2);
    }

    #[tokio::test]
    async fn test_rage_click_value_falls_back_to_tag_and_truncates() {
        let (mut reporter, transport, clock) = start();
        for _ in 0..3 {
            reporter.on_signal(click(10.0, 10.0, Some("")));
            clock.advance_ms(100);
        }
        let long_class = "x".repeat(150);
        for _ in 0..3 {
            reporter.on_signal(click(10.0, 10.0, Some(&long_class)));
            clock.advance_ms(100);
        }
        reporter.flush().await;

        let values: Vec<_> = transport
            .posted_of(EventType::RageClick)
            .into_iter()
            .filter_map(|r| r.event_value)
            .collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], "BUTTON");
        assert_eq!(values[1].chars().count(), MAX_VALUE_CHARS);
    }

    #[tokio::test]
    async fn test_slow_clicks_are_not_rage() {
        let (mut reporter, transport, clock) = start();
        for _ in 0..4 {
            reporter.on_signal(click(10.0, 10.0, None));
            clock.advance_ms(1000);
        }
        reporter.flush().await;
        assert!(transport.posted_of(EventType::RageClick).is_empty());
    }

    #[tokio::test]
    async fn test_quick_bounce_reported_once() {
        let (mut reporter, transport, clock) = start();
        clock.advance_ms(5_000);

        reporter.on_signal(Signal::VisibilityChange { hidden: true });
        reporter.on_signal(Signal::PageUnload);

        assert_eq!(
            transport.beacons(),
            vec![(EventType::QuickBounce, Some("5s".to_string()))]
        );
        // Beacons don't count as events
        assert_eq!(reporter.event_count(), 1);
    }

    #[tokio::test]
    async fn test_session_end_after_long_visit() {
        let (mut reporter, transport, clock) = start();
        clock.advance_ms(12_000);

        reporter.on_signal(Signal::PageUnload);

        assert_eq!(
            transport.beacons(),
            vec![(EventType::SessionEnd, Some("12s, 1 events".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_session_end_after_interaction() {
        let (mut reporter, transport, clock) = start();
        reporter.track_popup_open("Taco Stand");
        clock.advance_ms(3_000);

        reporter.on_signal(Signal::VisibilityChange { hidden: true });

        assert_eq!(
            transport.beacons(),
            vec![(EventType::SessionEnd, Some("3s, 2 events".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_visible_again_rearms_teardown() {
        let (mut reporter, transport, clock) = start();
        clock.advance_ms(20_000);

        reporter.on_signal(Signal::VisibilityChange { hidden: true });
        reporter.on_signal(Signal::VisibilityChange { hidden: false });
        clock.advance_ms(10_000);
        reporter.on_signal(Signal::VisibilityChange { hidden: true });

        let beacons = transport.beacons();
        assert_eq!(beacons.len(), 2);
        assert_eq!(beacons[1].1.as_deref(), Some("30s, 1 events"));
    }

    #[tokio::test]
    async fn test_dropdown_frustration() {
        let (mut reporter, transport, _) = start();
        for _ in 0..4 {
            reporter.track_dropdown_click();
        }
        reporter.flush().await;

        assert_eq!(transport.posted_of(EventType::DropdownClick).len(), 4);
        let frustration = transport.posted_of(EventType::DropdownFrustration);
        assert_eq!(frustration.len(), 1);
        assert_eq!(frustration[0].event_value.as_deref(), Some("4 clicks, 0 changes"));
        assert_eq!(reporter.dropdown_counts(), (0, 0));

        // Frustration is reported after the click that triggered it
        let types = transport.posted_types();
        assert_eq!(types.last(), Some(&EventType::DropdownFrustration));
    }

    #[tokio::test]
    async fn test_sort_changes_count_against_frustration() {
        let (mut reporter, transport, _) = start();
        reporter.track_sort_change("rating");
        reporter.track_sort_change("distance");
        for _ in 0..4 {
            reporter.track_dropdown_click();
        }
        reporter.flush().await;

        assert!(transport.posted_of(EventType::DropdownFrustration).is_empty());
        assert_eq!(reporter.dropdown_counts(), (4, 2));
        assert_eq!(transport.posted_of(EventType::SortChange).len(), 2);
    }

    #[tokio::test]
    async fn test_idle_reset_zeroes_counters() {
        let (mut reporter, _, clock) = start();
        reporter.track_dropdown_click();
        reporter.track_dropdown_click();
        reporter.track_sort_change("name");

        clock.advance_ms(1_000);
        reporter.reset_dropdown_tracking();
        assert_eq!(reporter.dropdown_counts(), (2, 1));

        clock.advance_ms(4_000);
        reporter.reset_dropdown_tracking();
        assert_eq!(reporter.dropdown_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_search_tracking() {
        let (mut reporter, transport, _) = start();
        reporter.track_search("");
        reporter.track_search("   \t ");
        reporter.track_search("  bbq  ");
        reporter.track_search(&"a".repeat(150));
        reporter.flush().await;

        let values: Vec<_> = transport
            .posted_of(EventType::Search)
            .into_iter()
            .filter_map(|r| r.event_value)
            .collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], "bbq");
        assert_eq!(values[1], "a".repeat(100));
    }

    #[tokio::test]
    async fn test_search_no_results_is_trimmed() {
        let (mut reporter, transport, _) = start();
        reporter.track_search_no_results("  ramen  ");
        reporter.flush().await;

        let records = transport.posted_of(EventType::SearchNoResults);
        assert_eq!(records[0].event_value.as_deref(), Some("ramen"));
    }

    #[tokio::test]
    async fn test_record_action_maps_to_event_types() {
        let (mut reporter, transport, _) = start();
        let actions = vec![
            (UserAction::RestaurantClick("a".into()), EventType::RestaurantClick),
            (UserAction::PopupOpen("a".into()), EventType::PopupOpen),
            (UserAction::DirectionsClick("a".into()), EventType::DirectionsClick),
            (UserAction::ViewOnMapClick("a".into()), EventType::ViewOnMapClick),
            (UserAction::SearchResultClick("a".into()), EventType::SearchResultClick),
            (UserAction::ViewSwitch("map".into()), EventType::ViewSwitch),
            (UserAction::LocationRequest("granted".into()), EventType::LocationRequest),
        ];
        let expected: Vec<_> = std::iter::once(EventType::PageView)
            .chain(actions.iter().map(|(_, t)| *t))
            .collect();

        for (action, _) in actions {
            reporter.record_action(action);
        }
        reporter.flush().await;

        assert_eq!(transport.posted_types(), expected);
    }

    #[test]
    fn test_track_without_runtime_does_not_panic() {
        let transport = Arc::new(RecordingTransport::default());
        let storage = MemorySessionStorage::new();
        let mut reporter = Reporter::start(
            Arc::clone(&transport),
            &storage,
            SystemClock,
            "mapbox",
            page(),
        );
        reporter.track_search("pizza");

        assert_eq!(reporter.event_count(), 2);
        assert!(transport.posted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_subscriptions_cover_all_signal_kinds() {
        let subs = TestReporter::subscriptions();
        assert!(subs.contains(&SignalKind::Error));
        assert!(subs.contains(&SignalKind::UnhandledRejection));
        assert!(subs.contains(&SignalKind::Click));
        assert!(subs.contains(&SignalKind::VisibilityChange));
        assert!(subs.contains(&SignalKind::PageUnload));
        assert_eq!(Signal::PageUnload.kind(), SignalKind::PageUnload);
    }
}
