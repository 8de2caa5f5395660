//! Ingestion pipeline
//!
//! Drives one service at a time through count, paginated fetch, per-page
//! normalization, assembly, validity filtering and persistence. Services are
//! independent: a failure is recorded against its service and the run moves
//! on.

use crate::assembler::RecordAssembler;
use crate::auth::TokenBroker;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::fetcher::PaginatedFetcher;
use crate::http::HttpClient;
use crate::normalizer::GeometryNormalizer;
use crate::report::{RunReport, ServiceOutcome, ServiceStatus};
use crate::service::ServiceDescriptor;
use crate::sink::{PersistenceSink, TableWriter};
use crate::validity;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct Ingestor {
    fetcher: PaginatedFetcher,
    broker: Option<TokenBroker>,
    sink: PersistenceSink,
    max_concurrent_services: usize,
}

impl Ingestor {
    pub fn new(
        http: HttpClient,
        broker: Option<TokenBroker>,
        writer: Arc<dyn TableWriter>,
        max_concurrent_services: usize,
    ) -> Self {
        Self {
            fetcher: PaginatedFetcher::new(http),
            broker,
            sink: PersistenceSink::new(writer),
            max_concurrent_services: max_concurrent_services.max(1),
        }
    }

    /// Wire up HTTP, the optional token broker and `writer` from config
    pub fn from_config(config: &IngestConfig, writer: Arc<dyn TableWriter>) -> Result<Self> {
        let http = HttpClient::new(&config.http)?;
        let broker = config
            .portal
            .as_ref()
            .map(|portal| TokenBroker::new(http.clone(), portal))
            .transpose()?;

        Ok(Self::new(http, broker, writer, config.run.max_concurrent_services))
    }

    /// Token for `descriptor`, if its host needs one
    ///
    /// Issuance failures are logged and the request goes out without a
    /// token; the service then reports the refusal itself.
    async fn token_for(&self, descriptor: &ServiceDescriptor) -> Option<String> {
        let broker = self.broker.as_ref().filter(|b| b.applies_to(descriptor))?;

        match broker.token().await {
            Ok(token) => Some(token.value),
            Err(e) => {
                warn!(service = %descriptor.key, error = %e, "Continuing without portal token");
                None
            },
        }
    }

    /// Run one service end to end
    pub async fn ingest_service(&self, descriptor: &ServiceDescriptor) -> Result<ServiceStatus> {
        let token = self.token_for(descriptor).await;
        let plan = self.fetcher.plan(descriptor, token.as_deref()).await?;

        info!(
            service = %descriptor.key,
            layer = descriptor.service_name().unwrap_or("-"),
            dialect = %descriptor.dialect,
            count = plan.count,
            pages = plan.pages,
            "Fetching service"
        );

        let normalizer = GeometryNormalizer::new(descriptor.dialect, descriptor.target_crs);
        let mut assembler = RecordAssembler::new(descriptor.target_crs);

        for index in 0..plan.pages {
            let token = self.token_for(descriptor).await;
            let Some(page) = self.fetcher.fetch_page(descriptor, index, token.as_deref()).await? else {
                assembler.skip_page();
                continue;
            };

            match normalizer.normalize(&page) {
                Ok(normalized) => assembler.push_page(normalized)?,
                Err(e) => {
                    warn!(service = %descriptor.key, offset = page.offset, error = %e, "Skipping page");
                    assembler.skip_page();
                },
            }
        }

        let collection = assembler.finish();
        if collection.is_empty() {
            info!(service = %descriptor.key, "No records returned, nothing to persist");
            return Ok(ServiceStatus::Empty);
        }

        let filtered = validity::classify(collection);
        let dropped = filtered.dropped;
        let outcome = self.sink.write(&filtered, descriptor).await?;

        Ok(ServiceStatus::Loaded {
            rows: outcome.rows,
            spatial: outcome.spatial(),
            dropped,
        })
    }

    /// Run one service and fold any error into its outcome
    pub async fn run_service(&self, descriptor: &ServiceDescriptor) -> ServiceOutcome {
        let started = Instant::now();

        let status = match self.ingest_service(descriptor).await {
            Ok(status) => status,
            Err(e @ (IngestError::Service(_) | IngestError::Auth(_))) => {
                warn!(service = %descriptor.key, error = %e, "Service skipped");
                ServiceStatus::Skipped { reason: e.to_string() }
            },
            Err(e) => {
                warn!(service = %descriptor.key, error = %e, "Service failed");
                ServiceStatus::Failed { error: e.to_string() }
            },
        };

        ServiceOutcome {
            key: descriptor.key.clone(),
            status,
            elapsed: started.elapsed(),
        }
    }

    /// Run every descriptor, up to `max_concurrent_services` at once
    ///
    /// Outcomes are reported in descriptor order.
    pub async fn run(&self, descriptors: &[ServiceDescriptor]) -> RunReport {
        info!(
            services = descriptors.len(),
            concurrency = self.max_concurrent_services,
            "Starting ingestion run"
        );

        let outcomes: Vec<ServiceOutcome> = stream::iter(descriptors)
            .map(|descriptor| self.run_service(descriptor))
            .buffered(self.max_concurrent_services)
            .collect()
            .await;

        RunReport { outcomes }
    }
}
