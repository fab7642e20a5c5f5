//! Event records as sent to the collection endpoint.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::TelemetryError;

/// Every event type the reporter emits. Serialized as its snake_case wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    JsError,
    RageClick,
    QuickBounce,
    SessionEnd,
    RestaurantClick,
    PopupOpen,
    DirectionsClick,
    ViewOnMapClick,
    Search,
    SearchNoResults,
    SearchResultClick,
    ViewSwitch,
    SortChange,
    LocationRequest,
    DropdownClick,
    DropdownFrustration,
}

impl EventType {
    pub const ALL: [EventType; 17] = [
        EventType::PageView,
        EventType::JsError,
        EventType::RageClick,
        EventType::QuickBounce,
        EventType::SessionEnd,
        EventType::RestaurantClick,
        EventType::PopupOpen,
        EventType::DirectionsClick,
        EventType::ViewOnMapClick,
        EventType::Search,
        EventType::SearchNoResults,
        EventType::SearchResultClick,
        EventType::ViewSwitch,
        EventType::SortChange,
        EventType::LocationRequest,
        EventType::DropdownClick,
        EventType::DropdownFrustration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "page_view",
            EventType::JsError => "js_error",
            EventType::RageClick => "rage_click",
            EventType::QuickBounce => "quick_bounce",
            EventType::SessionEnd => "session_end",
            EventType::RestaurantClick => "restaurant_click",
            EventType::PopupOpen => "popup_open",
            EventType::DirectionsClick => "directions_click",
            EventType::ViewOnMapClick => "view_on_map_click",
            EventType::Search => "search",
            EventType::SearchNoResults => "search_no_results",
            EventType::SearchResultClick => "search_result_click",
            EventType::ViewSwitch => "view_switch",
            EventType::SortChange => "sort_change",
            EventType::LocationRequest => "location_request",
            EventType::DropdownClick => "dropdown_click",
            EventType::DropdownFrustration => "dropdown_frustration",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TelemetryError::UnknownEventType(s.to_string()))
    }
}

/// What the host page looks like right now. Snapshotted into every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    pub url: String,
    pub referrer: Option<String>,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: String,
    pub event_type: EventType,
    pub event_value: Option<String>,
    pub page_url: String,
    pub referrer: Option<String>,
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub app_version: String,
}

impl EventRecord {
    pub fn new(
        session_id: &str,
        event_type: EventType,
        event_value: Option<&str>,
        page: &PageContext,
        app_version: &str,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            event_type,
            event_value: event_value.map(str::to_string),
            page_url: page.url.clone(),
            // An empty referrer means "none"
            referrer: page.referrer.clone().filter(|r| !r.is_empty()),
            user_agent: page.user_agent.clone(),
            screen_width: page.viewport_width,
            screen_height: page.viewport_height,
            app_version: app_version.to_string(),
        }
    }
}
