use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Telemetry is not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid telemetry endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Collection endpoint rejected event with status {status}")]
    Rejected { status: u16 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}
