//! Service descriptors
//!
//! A [`ServiceDescriptor`] is resolved once per configured source and carries
//! everything later stages need: where to fetch from, which table to replace,
//! which CRS to stamp, and which wire dialect the pages arrive in.

use crate::error::{IngestError, Result};
use hin_common::Crs;
use std::fmt;
use url::Url;

/// Wire encoding of a feature service's records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Flat `attributes` plus Esri geometry (`paths`, `rings`, `x`/`y`)
    EsriJson,
    /// Standard GeoJSON features with `properties` and `geometry`
    GeoJson,
}

impl Dialect {
    /// Services queried with `f=json` answer in EsriJSON; every other format
    /// flag (normally `f=geojson`) is read as GeoJSON.
    pub fn detect(url: &Url) -> Self {
        let esri = url
            .query_pairs()
            .any(|(key, value)| key == "f" && value.eq_ignore_ascii_case("json"));

        if esri {
            Dialect::EsriJson
        } else {
            Dialect::GeoJson
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::EsriJson => write!(f, "esrijson"),
            Dialect::GeoJson => write!(f, "geojson"),
        }
    }
}

/// One ingestion job
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub key: String,
    pub url: Url,
    pub target_schema: String,
    pub target_crs: Crs,
    pub dialect: Dialect,
}

impl ServiceDescriptor {
    pub fn new(key: &str, url: &str, target_schema: &str, target_crs: Crs) -> Result<Self> {
        if key.trim().is_empty() {
            return Err(IngestError::Config("service key cannot be empty".to_string()));
        }

        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(IngestError::Config(format!(
                "service '{}' has unsupported scheme '{}'",
                key,
                url.scheme()
            )));
        }

        let dialect = Dialect::detect(&url);

        Ok(Self {
            key: key.to_string(),
            url,
            target_schema: target_schema.to_string(),
            target_crs,
            dialect,
        })
    }

    /// Name of the persisted table
    pub fn table_name(&self) -> String {
        self.key.to_lowercase()
    }

    /// The query endpoint with its query string stripped, used for counting
    pub fn base_url(&self) -> Url {
        let mut base = self.url.clone();
        base.set_query(None);
        base.set_fragment(None);
        base
    }

    /// Service name from an ArcGIS REST path such as
    /// `.../services/Crashes/FeatureServer/0/query`
    pub fn service_name(&self) -> Option<&str> {
        let segments: Vec<&str> = self.url.path_segments()?.collect();
        segments
            .len()
            .checked_sub(4)
            .and_then(|i| segments.get(i))
            .copied()
            .filter(|s| !s.is_empty())
    }

    /// Whether requests to this service must carry a portal token
    pub fn requires_token(&self, auth_host: &str) -> bool {
        !auth_host.is_empty() && self.url.as_str().starts_with(auth_host)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const LRS_URL: &str = "https://arcgis.dvrpc.org/portal/rest/services/Transportation/PA_LRS/FeatureServer/0/query?where=1=1&outFields=*&f=json";
    const CRASH_URL: &str = "https://services.arcgis.com/x/arcgis/rest/services/Crashes/FeatureServer/2/query?where=1%3D1&outFields=*&f=geojson";

    #[test]
    fn test_dialect_detection() {
        let lrs = ServiceDescriptor::new("PA_LRS", LRS_URL, "input", Crs::EPSG_26918).unwrap();
        assert_eq!(lrs.dialect, Dialect::EsriJson);

        let crashes = ServiceDescriptor::new("crashes", CRASH_URL, "input", Crs::EPSG_26918).unwrap();
        assert_eq!(crashes.dialect, Dialect::GeoJson);
    }

    #[test]
    fn test_table_name_is_lower_cased_key() {
        let lrs = ServiceDescriptor::new("PA_LRS", LRS_URL, "input", Crs::EPSG_26918).unwrap();
        assert_eq!(lrs.table_name(), "pa_lrs");
    }

    #[test]
    fn test_base_url_strips_query() {
        let lrs = ServiceDescriptor::new("PA_LRS", LRS_URL, "input", Crs::EPSG_26918).unwrap();
        assert_eq!(
            lrs.base_url().as_str(),
            "https://arcgis.dvrpc.org/portal/rest/services/Transportation/PA_LRS/FeatureServer/0/query"
        );
    }

    #[test]
    fn test_service_name_from_path() {
        let lrs = ServiceDescriptor::new("PA_LRS", LRS_URL, "input", Crs::EPSG_26918).unwrap();
        assert_eq!(lrs.service_name(), Some("PA_LRS"));

        let short = ServiceDescriptor::new("x", "https://host/query", "input", Crs::EPSG_26918).unwrap();
        assert_eq!(short.service_name(), None);
    }

    #[test]
    fn test_requires_token_by_host_prefix() {
        let lrs = ServiceDescriptor::new("PA_LRS", LRS_URL, "input", Crs::EPSG_26918).unwrap();
        let crashes = ServiceDescriptor::new("crashes", CRASH_URL, "input", Crs::EPSG_26918).unwrap();

        assert!(lrs.requires_token("https://arcgis.dvrpc.org"));
        assert!(!crashes.requires_token("https://arcgis.dvrpc.org"));
        assert!(!lrs.requires_token(""));
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(ServiceDescriptor::new("a", "not a url", "input", Crs::EPSG_26918).is_err());
        assert!(ServiceDescriptor::new("a", "ftp://host/query", "input", Crs::EPSG_26918).is_err());
        assert!(ServiceDescriptor::new(" ", CRASH_URL, "input", Crs::EPSG_26918).is_err());
    }
}
