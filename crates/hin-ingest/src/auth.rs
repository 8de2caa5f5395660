//! Portal token broker
//!
//! Exchanges the configured credential bundle for a short-lived token. The
//! token is cached with its expiry and re-issued once less than the refresh
//! margin remains, so a long pagination never runs on an expired token.

use crate::config::{PortalConfig, PortalCredentials};
use crate::error::{IngestError, Result};
use crate::http::HttpClient;
use crate::service::ServiceDescriptor;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// A portal access token
#[derive(Clone, PartialEq)]
pub struct AuthToken {
    pub value: String,
    pub obtained_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// True when the token is expired or will be within `margin`
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct TokenBroker {
    http: HttpClient,
    token_url: Url,
    auth_host: String,
    credentials: PortalCredentials,
    refresh_margin: Duration,
    cached: Mutex<Option<AuthToken>>,
}

impl TokenBroker {
    pub fn new(http: HttpClient, config: &PortalConfig) -> Result<Self> {
        Ok(Self {
            http,
            token_url: Url::parse(&config.token_url)?,
            auth_host: config.auth_host.clone(),
            credentials: config.credentials.clone(),
            refresh_margin: Duration::seconds(config.refresh_margin_secs),
            cached: Mutex::new(None),
        })
    }

    /// Whether `descriptor` is served from the token-protected host
    pub fn applies_to(&self, descriptor: &ServiceDescriptor) -> bool {
        descriptor.requires_token(&self.auth_host)
    }

    /// Issue a fresh token. One POST to the token endpoint.
    pub async fn acquire(&self) -> Result<AuthToken> {
        let body = self.http.post_form(&self.token_url, &self.credentials).await?;
        let token = parse_token_response(&body, Utc::now(), self.credentials.expiration)?;

        info!(expires_at = %token.expires_at, "Issued portal token");
        Ok(token)
    }

    /// Cached token, re-issued when missing or close to expiry
    pub async fn token(&self) -> Result<AuthToken> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.expires_within(Utc::now(), self.refresh_margin) {
                return Ok(token.clone());
            }
            debug!(expires_at = %token.expires_at, "Portal token close to expiry, refreshing");
        }

        let token = self.acquire().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

/// Read `{token, expires?}` from the portal. `expires` is epoch
/// milliseconds; without it the requested lifetime is assumed.
fn parse_token_response(
    body: &Value,
    obtained_at: DateTime<Utc>,
    expiration_minutes: u32,
) -> Result<AuthToken> {
    if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
        return Err(IngestError::Auth(message.to_string()));
    }

    let value = body
        .get("token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| IngestError::Auth("token endpoint returned no token".to_string()))?;

    let expires_at = body
        .get("expires")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(|| obtained_at + Duration::minutes(i64::from(expiration_minutes)));

    Ok(AuthToken {
        value: value.to_string(),
        obtained_at,
        expires_at,
    })
}
