//! Network side of the cache manager.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use super::{CachedResponse, FetchError, FetchRequest};

/// HTTP request timeout in seconds.
/// Tiles and fonts can be slow on mobile links; anything past this is treated as offline.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Performs the real network request for a [`FetchRequest`].
///
/// Non-2xx responses are returned as `Ok`; only transport failures are errors.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<CachedResponse, FetchError>> + Send;
}

/// reqwest-backed fetcher.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, FetchError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await?;

        let status = response.status();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Fetched from network");

        Ok(CachedResponse {
            url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}
