//! Per-run outcome bookkeeping

use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// What happened to one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    Loaded {
        rows: u64,
        /// Whether the table got a geometry column
        spatial: bool,
        /// Records dropped for missing or empty geometry
        dropped: usize,
    },
    /// The service returned no records; nothing was written
    Empty,
    /// The service refused the request (error envelope, missing count)
    Skipped { reason: String },
    Failed { error: String },
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Loaded { rows, spatial: true, dropped } => {
                write!(f, "loaded {} rows with geometry ({} dropped)", rows, dropped)
            },
            ServiceStatus::Loaded { rows, spatial: false, .. } => {
                write!(f, "loaded {} rows without geometry", rows)
            },
            ServiceStatus::Empty => write!(f, "empty"),
            ServiceStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
            ServiceStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceOutcome {
    pub key: String,
    pub status: ServiceStatus,
    pub elapsed: Duration,
}

impl ServiceOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self.status, ServiceStatus::Loaded { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<ServiceOutcome>,
}

impl RunReport {
    pub fn push(&mut self, outcome: ServiceOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn loaded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_loaded()).count()
    }

    pub fn empty(&self) -> usize {
        self.count(|s| matches!(s, ServiceStatus::Empty))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ServiceStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ServiceStatus::Failed { .. }))
    }

    pub fn total_rows(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                ServiceStatus::Loaded { rows, .. } => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, key: &str) -> Option<&ServiceOutcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }

    fn count(&self, predicate: impl Fn(&ServiceStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }

    /// One line per service, then the totals
    pub fn log_summary(&self) {
        for outcome in &self.outcomes {
            let elapsed_ms = outcome.elapsed.as_millis() as u64;
            match &outcome.status {
                ServiceStatus::Failed { .. } => {
                    error!(service = %outcome.key, elapsed_ms, "✗ {}", outcome.status)
                },
                ServiceStatus::Skipped { .. } | ServiceStatus::Empty => {
                    warn!(service = %outcome.key, elapsed_ms, "{}", outcome.status)
                },
                ServiceStatus::Loaded { .. } => {
                    info!(service = %outcome.key, elapsed_ms, "✓ {}", outcome.status)
                },
            }
        }

        info!(
            services = self.outcomes.len(),
            loaded = self.loaded(),
            empty = self.empty(),
            skipped = self.skipped(),
            failed = self.failed(),
            rows = self.total_rows(),
            "Ingestion run completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(key: &str, status: ServiceStatus) -> ServiceOutcome {
        ServiceOutcome {
            key: key.to_string(),
            status,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_counts() {
        let mut report = RunReport::default();
        report.push(outcome("a", ServiceStatus::Loaded { rows: 10, spatial: true, dropped: 1 }));
        report.push(outcome("b", ServiceStatus::Loaded { rows: 5, spatial: false, dropped: 0 }));
        report.push(outcome("c", ServiceStatus::Empty));
        report.push(outcome("d", ServiceStatus::Skipped { reason: "Token Required".to_string() }));
        report.push(outcome("e", ServiceStatus::Failed { error: "boom".to_string() }));

        assert_eq!(report.loaded(), 2);
        assert_eq!(report.empty(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.total_rows(), 15);
        assert!(report.outcome("d").is_some());
        assert!(report.outcome("z").is_none());
    }

    #[test]
    fn test_status_display() {
        let status = ServiceStatus::Loaded { rows: 3, spatial: true, dropped: 2 };
        assert_eq!(status.to_string(), "loaded 3 rows with geometry (2 dropped)");
        assert_eq!(
            ServiceStatus::Skipped { reason: "Invalid URL".to_string() }.to_string(),
            "skipped: Invalid URL"
        );
    }
}
