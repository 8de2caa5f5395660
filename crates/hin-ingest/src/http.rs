//! HTTP client with timeouts and retry
//!
//! Feature service and token endpoints both answer with JSON. Transient
//! failures (timeouts, refused connections, 5xx, 429) are retried with
//! exponential backoff; everything else is returned to the caller at once.

use crate::config::HttpConfig;
use crate::error::{IngestError, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("hin-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        })
    }

    /// GET `url` with extra query parameters appended to any it already has
    pub async fn get_json(&self, url: &Url, query: &[(&str, String)]) -> Result<Value> {
        self.send_with_retry(|| self.client.get(url.clone()).query(query))
            .await
    }

    /// POST a form-encoded body
    pub async fn post_form<T: Serialize + ?Sized>(&self, url: &Url, form: &T) -> Result<Value> {
        self.send_with_retry(|| self.client.post(url.clone()).form(form))
            .await
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Value>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;

        loop {
            match send_once(build()).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

async fn send_once(request: RequestBuilder) -> Result<Value> {
    let response = request.send().await.map_err(IngestError::from_request)?;
    let status = response.status();

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(IngestError::TransientNetwork(format!("HTTP {}", status)));
    }

    if !status.is_success() {
        return Err(IngestError::Service(format!("HTTP {}", status)));
    }

    let bytes = response.bytes().await.map_err(IngestError::from_request)?;
    debug!(bytes = bytes.len(), "Received response body");

    serde_json::from_slice(&bytes)
        .map_err(|e| IngestError::MalformedPayload(format!("response is not JSON: {}", e)))
}
