//! Delivery of event records to the collection endpoint.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{EventRecord, TelemetryError};
use crate::config::TelemetryConfig;

/// Content type `navigator.sendBeacon` uses for string bodies.
const BEACON_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

/// Sends event records somewhere. Implementations must never block the caller
/// for long; the reporter already runs `post_event` on a detached task.
pub trait Transport: Send + Sync + 'static {
    /// Post one record and report whether the endpoint accepted it.
    fn post_event(
        &self,
        record: &EventRecord,
    ) -> impl Future<Output = Result<(), TelemetryError>> + Send;

    /// Queue a record for delivery that must outlive the page.
    /// Returns whether it was queued; there is no delivery confirmation.
    fn send_beacon(&self, record: &EventRecord) -> bool;

    /// Wait for queued beacons.
    fn flush(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Resolved endpoint and credentials.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub events_url: Url,
    pub api_key: String,
    pub app_version: String,
    pub timeout: Duration,
}

impl TelemetrySettings {
    pub fn from_config(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| TelemetryError::NotConfigured("telemetry.endpoint is required".to_string()))?;
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| TelemetryError::NotConfigured("telemetry.api_key is required".to_string()))?;

        let events = format!("{}/events", endpoint.trim_end_matches('/'));
        let events_url = Url::parse(&events).map_err(|e| TelemetryError::InvalidEndpoint {
            url: events.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            events_url,
            api_key,
            app_version: config.app_version.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Beacons can't carry headers, so the key travels in the query string.
    pub fn beacon_url(&self) -> Url {
        let mut url = self.events_url.clone();
        url.query_pairs_mut().append_pair("apikey", &self.api_key);
        url
    }

    pub fn event_headers(&self) -> Result<HeaderMap, TelemetryError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("apikey", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert("prefer", HeaderValue::from_static("return=minimal"));
        Ok(headers)
    }
}

/// HTTP transport for the collection endpoint.
pub struct HttpTransport {
    client: Client,
    events_url: Url,
    beacon_url: Url,
    headers: HeaderMap,
    beacons: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpTransport {
    pub fn new(settings: &TelemetrySettings) -> Result<Self, TelemetryError> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            events_url: settings.events_url.clone(),
            beacon_url: settings.beacon_url(),
            headers: settings.event_headers()?,
            beacons: Mutex::new(Vec::new()),
        })
    }
}

impl Transport for HttpTransport {
    async fn post_event(&self, record: &EventRecord) -> Result<(), TelemetryError> {
        let response = self
            .client
            .post(self.events_url.clone())
            .headers(self.headers.clone())
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TelemetryError::Rejected {
                status: status.as_u16(),
            })
        }
    }

    fn send_beacon(&self, record: &EventRecord) -> bool {
        let body = match serde_json::to_string(record) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Could not encode beacon");
                return false;
            }
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = %record.event_type, "No async runtime, beacon dropped");
            return false;
        };

        let request = self
            .client
            .post(self.beacon_url.clone())
            .header(CONTENT_TYPE, BEACON_CONTENT_TYPE)
            .body(body);
        let event_type = record.event_type;
        let handle = runtime.spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    debug!(event = %event_type, status = response.status().as_u16(), "Beacon rejected");
                }
                Ok(_) => {}
                Err(e) => debug!(event = %event_type, error = %e, "Beacon failed"),
            }
        });

        let mut beacons = self.beacons.lock().unwrap_or_else(|e| e.into_inner());
        beacons.retain(|h| !h.is_finished());
        beacons.push(handle);
        true
    }

    async fn flush(&self) {
        let handles = {
            let mut beacons = self.beacons.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *beacons)
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}
