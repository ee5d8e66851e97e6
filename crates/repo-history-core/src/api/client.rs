//! API client for the backend import-history endpoints.
//!
//! This module provides the `ApiClient` struct, the HTTP implementation of
//! [`RemoteHistory`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ApiError, RemoteHistory};
use crate::models::{HistoryRecord, NewRecord};

// ============================================================================
// Constants
// ============================================================================

/// Default backend base URL when none is configured
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// The history list comes back either bare or wrapped in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryResponse {
    List(Vec<HistoryRecord>),
    Wrapped { history: Vec<HistoryRecord> },
}

impl HistoryResponse {
    fn into_records(self) -> Vec<HistoryRecord> {
        match self {
            HistoryResponse::List(records) => records,
            HistoryResponse::Wrapped { history } => history,
        }
    }
}

/// API client for the history backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    token: Option<Arc<str>>,
    initial_backoff_ms: u64,
}

impl ApiClient {
    /// Create a new API client against `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            token: None,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: impl Into<Arc<str>>) {
        self.token = Some(token.into());
    }

    fn history_url(&self) -> String {
        format!("{}/history", self.base_url)
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/history/{}", self.base_url, id)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let token = self.token.as_deref().ok_or(ApiError::MissingToken)?;
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Token is not a valid header value")?,
        );
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// Send a request, backing off and retrying while rate limited.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let mut retries = 0;
        let mut backoff_ms = self.initial_backoff_ms;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(self.auth_headers()?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send {} request to {}", method, url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}

#[async_trait]
impl RemoteHistory for ApiClient {
    async fn fetch_history(&self) -> Result<Vec<HistoryRecord>> {
        let url = self.history_url();
        let response = self.send::<()>(Method::GET, &url, None).await?;
        let parsed: HistoryResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", url))?;
        let records = parsed.into_records();
        debug!(count = records.len(), "Fetched remote history");
        Ok(records)
    }

    async fn create_record(&self, record: &NewRecord) -> Result<HistoryRecord> {
        let url = self.history_url();
        let response = self.send(Method::POST, &url, Some(record)).await?;
        let created: HistoryRecord = response
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", url))?;
        debug!(id = %created.id, url = %created.url, "Created remote history record");
        Ok(created)
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        let url = self.record_url(id);
        match self.send::<()>(Method::DELETE, &url, None).await {
            Ok(_) => Ok(()),
            // Already gone is what we wanted
            Err(e) if matches!(e.downcast_ref::<ApiError>(), Some(ApiError::NotFound(_))) => {
                debug!(id, "Remote history record already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn clear_all(&self) -> Result<()> {
        let url = self.history_url();
        self.send::<()>(Method::DELETE, &url, None).await?;
        Ok(())
    }
}
