//! HIN Ingest - feature service to PostGIS loader

use anyhow::{Context, Result};
use clap::Parser;
use hin_common::logging::{init_logging, LogConfig, LogLevel};
use hin_common::Crs;
use hin_ingest::{db, IngestConfig, Ingestor, PostgisWriter, ServiceDescriptor, SourcesFile};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "hin-ingest")]
#[command(author, version, about = "Load ArcGIS feature services into PostGIS")]
struct Cli {
    /// Sources file of the form {"urls": {"key": "url"}}
    #[arg(short, long)]
    sources: Option<PathBuf>,

    /// Target schema for every table
    #[arg(long)]
    schema: Option<String>,

    /// CRS stamped on geometry columns, e.g. EPSG:26918
    #[arg(long)]
    crs: Option<Crs>,

    /// Only ingest these service keys (repeatable)
    #[arg(long = "only", value_name = "KEY")]
    only: Vec<String>,

    /// Services processed at once
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let started = Instant::now();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("hin-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env().context("Failed to load configuration")?;
    if let Some(sources) = cli.sources {
        config.run.sources_path = sources;
    }
    if let Some(schema) = cli.schema {
        config.run.target_schema = schema;
    }
    if let Some(crs) = cli.crs {
        config.run.target_crs = crs;
    }
    if let Some(concurrency) = cli.concurrency {
        config.run.max_concurrent_services = concurrency;
    }
    config.validate()?;

    let sources = SourcesFile::load(&config.run.sources_path).with_context(|| {
        format!("Failed to read sources file {}", config.run.sources_path.display())
    })?;

    let mut descriptors = Vec::with_capacity(sources.len());
    for (key, url) in sources.entries()? {
        if !cli.only.is_empty() && !cli.only.iter().any(|k| k.eq_ignore_ascii_case(&key)) {
            continue;
        }
        match ServiceDescriptor::new(&key, &url, &config.run.target_schema, config.run.target_crs) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => error!(service = %key, error = %e, "Ignoring unusable source"),
        }
    }

    if descriptors.is_empty() {
        warn!(path = %config.run.sources_path.display(), "No services to ingest");
        return Ok(());
    }

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    let postgis = db::check_postgis(&pool).await.context("PostGIS is not available")?;
    info!(postgis = %postgis, schema = %config.run.target_schema, crs = %config.run.target_crs, "Connected");

    let ingestor = Ingestor::from_config(&config, Arc::new(PostgisWriter::new(pool)))?;
    let report = ingestor.run(&descriptors).await;
    report.log_summary();

    info!(elapsed_secs = started.elapsed().as_secs_f64(), "Ingestion complete");
    Ok(())
}
