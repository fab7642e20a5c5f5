//! Frustration heuristics: rage clicks, dropdown thrashing, quick bounces.
//!
//! These are plain state machines over timestamps; the reporter decides
//! what to emit when they trigger.

use chrono::{DateTime, Duration, Utc};

use super::EventType;

/// Clicks older than this no longer count toward a rage click.
pub const RAGE_CLICK_WINDOW_MS: i64 = 2000;

/// Clicks must land strictly closer than this on both axes.
pub const RAGE_CLICK_RADIUS_PX: f64 = 50.0;

pub const RAGE_CLICK_THRESHOLD: usize = 3;

/// Dropdown counters are dropped after this much inactivity.
pub const DROPDOWN_IDLE_MS: i64 = 5000;

const DROPDOWN_MIN_CLICKS: u32 = 3;
const DROPDOWN_CLICK_MARGIN: u32 = 2;

/// Sessions shorter than this with at most one event are bounces.
pub const QUICK_BOUNCE_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ClickSample {
    pub x: f64,
    pub y: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RageClickDetector {
    history: Vec<ClickSample>,
}

impl RageClickDetector {
    /// Record a click. Returns true when it completes a rage click,
    /// in which case the history is cleared.
    pub fn record(&mut self, sample: ClickSample) -> bool {
        let now = sample.at;
        let (x, y) = (sample.x, sample.y);

        self.history
            .retain(|c| (now - c.at).num_milliseconds() < RAGE_CLICK_WINDOW_MS);
        self.history.push(sample);

        let nearby = self
            .history
            .iter()
            .filter(|c| (c.x - x).abs() < RAGE_CLICK_RADIUS_PX && (c.y - y).abs() < RAGE_CLICK_RADIUS_PX)
            .count();

        if nearby >= RAGE_CLICK_THRESHOLD {
            self.history.clear();
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Counts dropdown opens against actual selections.
#[derive(Debug, Default)]
pub struct DropdownTracker {
    clicks: u32,
    changes: u32,
    last_click: Option<DateTime<Utc>>,
}

impl DropdownTracker {
    /// Record a click on the dropdown. Returns `(clicks, changes)` when the
    /// user is opening it far more often than picking anything; both
    /// counters are reset in that case.
    pub fn record_click(&mut self, now: DateTime<Utc>) -> Option<(u32, u32)> {
        self.clicks += 1;
        self.last_click = Some(now);

        if self.clicks > DROPDOWN_MIN_CLICKS && self.clicks > self.changes + DROPDOWN_CLICK_MARGIN {
            let counts = (self.clicks, self.changes);
            self.clicks = 0;
            self.changes = 0;
            Some(counts)
        } else {
            None
        }
    }

    pub fn record_change(&mut self) {
        self.changes += 1;
    }

    /// Zero both counters if the dropdown has been idle long enough.
    /// Returns whether a reset happened.
    pub fn reset_if_idle(&mut self, now: DateTime<Utc>) -> bool {
        let idle = match self.last_click {
            Some(last) => (now - last).num_milliseconds() >= DROPDOWN_IDLE_MS,
            None => true,
        };
        if idle {
            self.clicks = 0;
            self.changes = 0;
        }
        idle
    }

    pub fn counts(&self) -> (u32, u32) {
        (self.clicks, self.changes)
    }
}

/// The single event sent when a session is torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teardown {
    pub event_type: EventType,
    pub value: String,
    pub duration_secs: i64,
}

pub fn classify_teardown(elapsed: Duration, event_count: u64) -> Teardown {
    let millis = elapsed.num_milliseconds().max(0);
    let duration_secs = (millis as f64 / 1000.0).round() as i64;

    if duration_secs < QUICK_BOUNCE_SECS && event_count <= 1 {
        Teardown {
            event_type: EventType::QuickBounce,
            value: format!("{}s", duration_secs),
            duration_secs,
        }
    } else {
        Teardown {
            event_type: EventType::SessionEnd,
            value: format!("{}s, {} events", duration_secs, event_count),
            duration_secs,
        }
    }
}
