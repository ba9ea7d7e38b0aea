//! Replay client for delivering queued updates to the remote API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use tracing::{debug, warn};

use super::ApiError;
use crate::models::{HttpMethod, PendingUpdate};
use crate::sync::Replayer;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// HTTP replayer for pending updates.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReplayClient {
    client: Client,
    base_url: Option<String>,
    token: Option<Arc<String>>,
    initial_backoff_ms: u64,
}

impl ReplayClient {
    pub fn new() -> Result<Self, ApiError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: None,
            token: None,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
        })
    }

    /// Base for relative update urls such as `/api/progress`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    /// Create a new ReplayClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: Arc<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
            initial_backoff_ms: self.initial_backoff_ms,
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Absolute urls pass through; relative ones are joined to the base url.
    pub fn resolve_url(&self, url: &str) -> Result<String, ApiError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        match &self.base_url {
            Some(base) if url.starts_with('/') => Ok(format!("{}{}", base, url)),
            Some(base) => Ok(format!("{}/{}", base, url)),
            None => Err(ApiError::InvalidUrl(url.to_string())),
        }
    }

    /// Send one queued update. Rate limiting is retried with exponential
    /// backoff; every other non-2xx status is returned as an error.
    pub async fn send(&self, update: &PendingUpdate) -> Result<(), ApiError> {
        let url = self.resolve_url(&update.url)?;
        let method = to_method(update.method);
        let mut retries = 0;
        let mut backoff_ms = self.initial_backoff_ms;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(header::ACCEPT, "application/json");
            if let Some(ref token) = self.token {
                request = request.bearer_auth(token.as_str());
            }
            if !update.data.is_null() {
                request = request.json(&update.data);
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                debug!(id = update.id, %status, url = %url, "Replayed pending update");
                return Ok(());
            }

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
    }
}

#[async_trait]
impl Replayer for ReplayClient {
    async fn replay(&self, update: &PendingUpdate) -> Result<(), ApiError> {
        self.send(update).await
    }
}
