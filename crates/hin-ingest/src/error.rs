//! Error types for feature-service ingestion
//!
//! Every variant is scoped to a single service: the run loop reports the
//! error against that service and moves on to the next one.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Timeout, refused connection, 5xx or rate limiting. Retried with backoff.
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    /// Non-retryable HTTP client failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error envelope or missing count returned by the feature service
    #[error("Feature service error: {0}")]
    Service(String),

    /// Token issuance returned no token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A payload did not have the expected shape
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Geometry conversion failed: {0}")]
    Geometry(String),

    /// The spatial write found nothing to put in the geometry column
    #[error("No valid geometries in the data")]
    NoValidGeometries,

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Common(#[from] hin_common::HinError),
}

impl IngestError {
    /// Whether retrying the same request might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::TransientNetwork(_))
    }

    /// Whether a page request failing this way costs only that page
    ///
    /// A body that is not JSON or a client error status is confined to the
    /// page; exhausted retries and everything else still fail the service.
    pub fn skips_page(&self) -> bool {
        matches!(self, IngestError::MalformedPayload(_) | IngestError::Service(_))
    }

    /// Sort a reqwest failure into transient and permanent buckets
    pub fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            IngestError::TransientNetwork(err.to_string())
        } else {
            IngestError::Http(err)
        }
    }
}
