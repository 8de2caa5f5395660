//! Paginated fetcher
//!
//! Feature services cap every response at a fixed record count. The fetcher
//! asks for the total first, then walks the offsets in ascending order.

use crate::error::{IngestError, Result};
use crate::http::HttpClient;
use crate::service::ServiceDescriptor;
use serde_json::Value;
use tracing::{debug, warn};

/// Service-side per-request record cap
pub const PAGE_SIZE: u64 = 2000;

/// Number of pages needed to cover `count` records
pub fn page_count(count: u64) -> u64 {
    count.div_ceil(PAGE_SIZE)
}

/// Result of the count query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    pub count: u64,
    pub pages: u64,
}

impl PagePlan {
    pub fn new(count: u64) -> Self {
        Self {
            count,
            pages: page_count(count),
        }
    }

    /// Page offsets in request order
    pub fn offsets(&self) -> impl Iterator<Item = u64> {
        (0..self.pages).map(|i| i * PAGE_SIZE)
    }
}

/// One unparsed page response
#[derive(Debug, Clone)]
pub struct RawPage {
    pub index: u64,
    pub offset: u64,
    pub body: Value,
}

impl RawPage {
    /// The feature list, when the payload has a non-empty one
    pub fn features(&self) -> Option<&[Value]> {
        self.body
            .get("features")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .filter(|features| !features.is_empty())
    }

    /// EsriJSON layer flag such as `hasZ` or `hasM`
    pub fn flag(&self, name: &str) -> bool {
        self.body.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

pub struct PaginatedFetcher {
    http: HttpClient,
}

impl PaginatedFetcher {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Count query against the service's base URL
    ///
    /// An error envelope or a missing/null `count` is a [`IngestError::Service`].
    pub async fn plan(&self, descriptor: &ServiceDescriptor, token: Option<&str>) -> Result<PagePlan> {
        let mut query = vec![
            ("where", "1=1".to_string()),
            ("returnCountOnly", "true".to_string()),
        ];
        if let Some(token) = token {
            query.push(("token", token.to_string()));
        }
        query.push(("f", "json".to_string()));

        let body = self.http.get_json(&descriptor.base_url(), &query).await?;
        let count = parse_count(&body)?;
        let plan = PagePlan::new(count);

        debug!(service = %descriptor.key, count, pages = plan.pages, "Counted features");
        Ok(plan)
    }

    /// Fetch the page starting at `offset`
    ///
    /// Returns `Ok(None)` when the payload carries no feature list, is not
    /// JSON, or was refused with a client error status; such a page is
    /// skipped rather than failing the service.
    pub async fn fetch_page(
        &self,
        descriptor: &ServiceDescriptor,
        index: u64,
        token: Option<&str>,
    ) -> Result<Option<RawPage>> {
        let offset = index * PAGE_SIZE;
        let mut query = vec![
            ("resultOffset", offset.to_string()),
            ("resultRecordCount", PAGE_SIZE.to_string()),
        ];
        if let Some(token) = token {
            query.push(("token", token.to_string()));
        }

        let body = match self.http.get_json(&descriptor.url, &query).await {
            Ok(body) => body,
            Err(e) if e.skips_page() => {
                warn!(service = %descriptor.key, offset, error = %e, "Skipping page");
                return Ok(None);
            },
            Err(e) => return Err(e),
        };
        let page = RawPage { index, offset, body };

        if page.features().is_none() {
            let message = page
                .body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("no features in payload");
            warn!(service = %descriptor.key, offset, reason = message, "Skipping page");
            return Ok(None);
        }

        Ok(Some(page))
    }

    /// Count, then fetch every page in ascending offset order
    pub async fn fetch_all(
        &self,
        descriptor: &ServiceDescriptor,
        token: Option<&str>,
    ) -> Result<Vec<RawPage>> {
        let plan = self.plan(descriptor, token).await?;
        let mut pages = Vec::with_capacity(plan.pages as usize);

        for index in 0..plan.pages {
            if let Some(page) = self.fetch_page(descriptor, index, token).await? {
                pages.push(page);
            }
        }

        Ok(pages)
    }
}

fn parse_count(body: &Value) -> Result<u64> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unspecified error");
        return Err(IngestError::Service(message.to_string()));
    }

    match body.get("count") {
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            IngestError::Service(format!("count {} is not a non-negative integer", n))
        }),
        _ => Err(IngestError::Service(
            "count missing from response; service may not exist or format has changed".to_string(),
        )),
    }
}
