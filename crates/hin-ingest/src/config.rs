//! Configuration management
//!
//! One [`IngestConfig`] is built at startup (environment first, CLI flags on
//! top) and handed to every component. Nothing reads the environment after
//! that point.

use crate::error::{IngestError, Result};
use hin_common::Crs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/hin";

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Per-request timeout for feature service and token calls.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Total attempts per request, including the first one.
pub const DEFAULT_HTTP_MAX_RETRIES: u32 = 3;

/// First backoff delay; doubles on every further attempt.
pub const DEFAULT_HTTP_BACKOFF_MS: u64 = 2000;

pub const DEFAULT_TARGET_SCHEMA: &str = "input";
pub const DEFAULT_SOURCES_PATH: &str = "source/dvrpc_data_sources.json";
pub const DEFAULT_MAX_CONCURRENT_SERVICES: usize = 1;

pub const DEFAULT_PORTAL_TOKEN_URL: &str = "https://arcgis.dvrpc.org/dvrpc/sharing/rest/generateToken";
pub const DEFAULT_PORTAL_AUTH_HOST: &str = "https://arcgis.dvrpc.org";
pub const DEFAULT_PORTAL_EXPIRATION_MINUTES: u32 = 60;
pub const DEFAULT_TOKEN_REFRESH_MARGIN_SECS: i64 = 120;

/// Ingestion run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub run: RunConfig,
    /// Present only when some services sit behind a token-protected portal
    pub portal: Option<PortalConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub target_schema: String,
    pub target_crs: Crs,
    pub sources_path: PathBuf,
    pub max_concurrent_services: usize,
}

/// Token portal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub token_url: String,
    /// Services whose URL starts with this prefix need a token
    pub auth_host: String,
    pub credentials: PortalCredentials,
    pub refresh_margin_secs: i64,
}

/// Credential bundle posted to the token endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct PortalCredentials {
    pub username: String,
    pub password: String,
    pub client: String,
    pub referer: String,
    /// Requested token lifetime in minutes
    pub expiration: u32,
    #[serde(rename = "f")]
    pub format: String,
}

impl std::fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client", &self.client)
            .field("referer", &self.referer)
            .field("expiration", &self.expiration)
            .field("format", &self.format)
            .finish()
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment, and defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let target_crs = match std::env::var("HIN_TARGET_CRS") {
            Ok(raw) => raw.parse()?,
            Err(_) => Crs::EPSG_26918,
        };

        let config = IngestConfig {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            http: HttpConfig {
                timeout_secs: env_or("HIN_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
                max_retries: env_or("HIN_HTTP_MAX_RETRIES", DEFAULT_HTTP_MAX_RETRIES),
                backoff_ms: env_or("HIN_HTTP_BACKOFF_MS", DEFAULT_HTTP_BACKOFF_MS),
            },
            run: RunConfig {
                target_schema: std::env::var("HIN_TARGET_SCHEMA")
                    .unwrap_or_else(|_| DEFAULT_TARGET_SCHEMA.to_string()),
                target_crs,
                sources_path: std::env::var("HIN_SOURCES")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOURCES_PATH)),
                max_concurrent_services: env_or(
                    "HIN_MAX_CONCURRENT_SERVICES",
                    DEFAULT_MAX_CONCURRENT_SERVICES,
                ),
            },
            portal: PortalConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(IngestError::Config("Database URL cannot be empty".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(IngestError::Config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.http.timeout_secs == 0 {
            return Err(IngestError::Config("HTTP timeout must be greater than 0".to_string()));
        }

        if self.http.max_retries == 0 {
            return Err(IngestError::Config(
                "HTTP max_retries counts the first attempt and must be at least 1".to_string(),
            ));
        }

        if self.run.target_schema.trim().is_empty() {
            return Err(IngestError::Config("Target schema cannot be empty".to_string()));
        }

        if self.run.max_concurrent_services == 0 {
            return Err(IngestError::Config(
                "max_concurrent_services must be greater than 0".to_string(),
            ));
        }

        if let Some(portal) = &self.portal {
            portal.validate()?;
        }

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            http: HttpConfig::default(),
            run: RunConfig {
                target_schema: DEFAULT_TARGET_SCHEMA.to_string(),
                target_crs: Crs::EPSG_26918,
                sources_path: PathBuf::from(DEFAULT_SOURCES_PATH),
                max_concurrent_services: DEFAULT_MAX_CONCURRENT_SERVICES,
            },
            portal: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_retries: DEFAULT_HTTP_MAX_RETRIES,
            backoff_ms: DEFAULT_HTTP_BACKOFF_MS,
        }
    }
}

impl PortalConfig {
    /// Portal settings are optional: without `PORTAL_USERNAME` no service
    /// is treated as authenticated.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("PORTAL_USERNAME").ok()?;

        Some(PortalConfig {
            token_url: std::env::var("PORTAL_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_PORTAL_TOKEN_URL.to_string()),
            auth_host: std::env::var("PORTAL_AUTH_HOST")
                .unwrap_or_else(|_| DEFAULT_PORTAL_AUTH_HOST.to_string()),
            credentials: PortalCredentials {
                username,
                password: std::env::var("PORTAL_PASSWORD").unwrap_or_default(),
                client: std::env::var("PORTAL_CLIENT").unwrap_or_else(|_| "referer".to_string()),
                referer: std::env::var("PORTAL_URL").unwrap_or_default(),
                expiration: env_or("PORTAL_EXPIRATION", DEFAULT_PORTAL_EXPIRATION_MINUTES),
                format: std::env::var("PORTAL_F").unwrap_or_else(|_| "json".to_string()),
            },
            refresh_margin_secs: env_or(
                "PORTAL_REFRESH_MARGIN_SECS",
                DEFAULT_TOKEN_REFRESH_MARGIN_SECS,
            ),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_url.is_empty() || self.auth_host.is_empty() {
            return Err(IngestError::Config(
                "Portal token URL and auth host must both be set".to_string(),
            ));
        }

        if self.credentials.password.is_empty() {
            return Err(IngestError::Config(
                "PORTAL_PASSWORD is required when PORTAL_USERNAME is set".to_string(),
            ));
        }

        if self.credentials.expiration == 0 {
            return Err(IngestError::Config("Portal token expiration must be greater than 0".to_string()));
        }

        if self.refresh_margin_secs < 0 {
            return Err(IngestError::Config("Token refresh margin cannot be negative".to_string()));
        }

        Ok(())
    }
}

// ============================================================================
// Sources File
// ============================================================================

/// The list of services to ingest, as stored on disk:
///
/// ```json
/// { "urls": { "crashes": "https://.../FeatureServer/0/query?where=1=1&outFields=*&f=geojson" } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesFile {
    urls: serde_json::Map<String, serde_json::Value>,
}

impl SourcesFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("cannot read sources file '{}': {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let sources: SourcesFile = serde_json::from_str(text)?;
        sources.validate()?;
        Ok(sources)
    }

    /// `(key, url)` pairs in file order
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        self.urls
            .iter()
            .map(|(key, url)| match url.as_str() {
                Some(url) => Ok((key.clone(), url.to_string())),
                None => Err(IngestError::Config(format!("URL for '{}' must be a string", key))),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Keys become table names once lower-cased, so they must stay unique
    fn validate(&self) -> Result<()> {
        let mut seen: HashMap<String, &str> = HashMap::new();
        for key in self.urls.keys() {
            if key.trim().is_empty() {
                return Err(IngestError::Config("Source keys cannot be empty".to_string()));
            }
            if let Some(previous) = seen.insert(key.to_lowercase(), key) {
                return Err(IngestError::Config(format!(
                    "Source keys '{}' and '{}' map to the same table",
                    previous, key
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn portal() -> PortalConfig {
        PortalConfig {
            token_url: DEFAULT_PORTAL_TOKEN_URL.to_string(),
            auth_host: DEFAULT_PORTAL_AUTH_HOST.to_string(),
            credentials: PortalCredentials {
                username: "analyst".to_string(),
                password: "hunter2".to_string(),
                client: "referer".to_string(),
                referer: "https://www.dvrpc.org".to_string(),
                expiration: 60,
                format: "json".to_string(),
            },
            refresh_margin_secs: 120,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.run.target_schema, "input");
        assert_eq!(config.run.target_crs, Crs::EPSG_26918);
        assert_eq!(config.http.max_retries, 3);
    }

    #[test]
    fn test_validate_rejects_bad_pool_and_http_settings() {
        let mut config = IngestConfig::default();
        config.database.min_connections = 10;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.http.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.run.max_concurrent_services = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_portal_requires_password() {
        let mut config = IngestConfig::default();
        config.portal = Some(portal());
        assert!(config.validate().is_ok());

        let mut missing = portal();
        missing.credentials.password.clear();
        config.portal = Some(missing);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let rendered = format!("{:?}", portal().credentials);
        assert!(rendered.contains("analyst"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_credentials_serialize_with_format_key() {
        let form = serde_json::to_value(&portal().credentials).unwrap();
        assert_eq!(form["f"], "json");
        assert_eq!(form["expiration"], 60);
    }

    #[test]
    fn test_sources_file_preserves_order() {
        let sources = SourcesFile::parse(
            r#"{"urls": {"Zeta": "https://a/query?f=json", "alpha": "https://b/query?f=geojson"}}"#,
        )
        .unwrap();

        let entries = sources.entries().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(entries[0].0, "Zeta");
        assert_eq!(entries[1].0, "alpha");
    }

    #[test]
    fn test_sources_file_rejects_case_collisions() {
        let result = SourcesFile::parse(r#"{"urls": {"Crashes": "https://a", "crashes": "https://b"}}"#);
        assert!(matches!(result, Err(IngestError::Config(_))));
    }

    #[test]
    fn test_sources_file_rejects_non_string_url() {
        let sources = SourcesFile::parse(r#"{"urls": {"crashes": 42}}"#).unwrap();
        assert!(sources.entries().is_err());
    }

    #[test]
    fn test_sources_file_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        std::fs::write(&path, r#"{"urls": {"roads": "https://a/query?f=json"}}"#).unwrap();

        let sources = SourcesFile::load(&path).unwrap();
        assert_eq!(sources.entries().unwrap()[0].1, "https://a/query?f=json");

        assert!(SourcesFile::load(&dir.path().join("missing.json")).is_err());
    }
}
