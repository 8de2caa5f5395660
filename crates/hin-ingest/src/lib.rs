//! HIN Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads ArcGIS-style feature services into PostGIS tables.
//!
//! Each configured source becomes a [`ServiceDescriptor`]. The [`Ingestor`]
//! counts its records, fetches every page, normalizes EsriJSON or GeoJSON
//! geometry into one record shape, filters out unusable geometry and replaces
//! the target table, falling back to a plain attribute table when no geometry
//! can be stored.
//!
//! # Example
//!
//! ```no_run
//! use hin_ingest::{IngestConfig, Ingestor, PostgisWriter, ServiceDescriptor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let pool = hin_ingest::db::create_pool(&config.database).await?;
//!
//!     let descriptor = ServiceDescriptor::new(
//!         "crash_pa",
//!         "https://example.org/arcgis/rest/services/Crash/FeatureServer/0/query?where=1=1&outFields=*&f=geojson",
//!         &config.run.target_schema,
//!         config.run.target_crs,
//!     )?;
//!
//!     let ingestor = Ingestor::from_config(&config, Arc::new(PostgisWriter::new(pool)))?;
//!     ingestor.run(&[descriptor]).await.log_summary();
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod geometry;
pub mod http;
pub mod normalizer;
pub mod pipeline;
pub mod report;
pub mod service;
pub mod sink;
pub mod validity;

pub use config::{IngestConfig, SourcesFile};
pub use error::{IngestError, Result};
pub use pipeline::Ingestor;
pub use report::{RunReport, ServiceOutcome, ServiceStatus};
pub use service::{Dialect, ServiceDescriptor};
pub use sink::{PersistenceSink, PostgisWriter, TableWriter};
