use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::ExecutionMode;
use crate::types::FailureKind;

/// Per-run counters. Every run owns its registry.
pub struct PipelineMetrics {
    pub records_dispatched: IntCounter,
    pub records_enriched: IntCounter,
    pub records_failed: IntCounterVec,
    pub lookup_retries: IntCounter,
    pub lookup_latency: Histogram,
    pub workers_active: IntGauge,
    pub registry: Registry,
}

impl PipelineMetrics {
    pub fn new() -> crate::Result<Arc<Self>> {
        let registry = Registry::new();

        let records_dispatched = IntCounter::new(
            "records_dispatched_total",
            "Total number of data rows dispatched to the job queue",
        )?;

        let records_enriched = IntCounter::new(
            "records_enriched_total",
            "Total number of records enriched by a successful lookup",
        )?;

        let records_failed = IntCounterVec::new(
            Opts::new("records_failed_total", "Total number of records with a terminal failure"),
            &["kind"],
        )?;

        let lookup_retries = IntCounter::new(
            "lookup_retries_total",
            "Total number of lookup retries after transient failures",
        )?;

        let lookup_latency = Histogram::with_opts(HistogramOpts::new(
            "lookup_latency_seconds",
            "Latency of a single remote lookup call",
        ))?;

        let workers_active = IntGauge::new("workers_active", "Number of running workers")?;

        registry.register(Box::new(records_dispatched.clone()))?;
        registry.register(Box::new(records_enriched.clone()))?;
        registry.register(Box::new(records_failed.clone()))?;
        registry.register(Box::new(lookup_retries.clone()))?;
        registry.register(Box::new(lookup_latency.clone()))?;
        registry.register(Box::new(workers_active.clone()))?;

        Ok(Arc::new(Self {
            records_dispatched,
            records_enriched,
            records_failed,
            lookup_retries,
            lookup_latency,
            workers_active,
            registry,
        }))
    }

    pub fn record_failure(&self, kind: FailureKind) {
        self.records_failed.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn failures(&self, kind: FailureKind) -> u64 {
        self.records_failed.with_label_values(&[kind.as_str()]).get()
    }

    /// Prometheus text exposition of the registry.
    pub fn render(&self) -> crate::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// What a finished run reports.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub mode: ExecutionMode,
    pub workers: usize,
    pub dispatched: u64,
    pub enriched: u64,
    pub failed: HashMap<FailureKind, u64>,
    pub retries: u64,
    pub rows_written: u64,
}

impl RunSummary {
    pub fn total_failed(&self) -> u64 {
        self.failed.values().sum()
    }

    pub fn completed(&self) -> u64 {
        self.enriched + self.total_failed()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} processed {} records ({} enriched, {} failed, {} retries), wrote {} rows in {:.2?}",
            self.run_id,
            self.completed(),
            self.enriched,
            self.total_failed(),
            self.retries,
            self.rows_written,
            self.elapsed
        )?;

        let mut kinds: Vec<_> = self.failed.iter().filter(|(_, count)| **count > 0).collect();
        kinds.sort_by_key(|(kind, _)| kind.as_str());
        for (kind, count) in kinds {
            write!(f, "; {}={}", kind, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_is_per_instance() {
        let first = PipelineMetrics::new().unwrap();
        let second = PipelineMetrics::new().unwrap();

        first.records_dispatched.inc();
        first.record_failure(FailureKind::NotFound);
        first.record_failure(FailureKind::NotFound);

        assert_eq!(first.records_dispatched.get(), 1);
        assert_eq!(second.records_dispatched.get(), 0);
        assert_eq!(first.failures(FailureKind::NotFound), 2);
        assert_eq!(first.failures(FailureKind::Transient), 0);

        let text = first.render().unwrap();
        assert!(text.contains("records_dispatched_total 1"));
        assert!(text.contains("kind=\"not_found\""));
    }

    #[test]
    fn test_summary_display() {
        let mut failed = HashMap::new();
        failed.insert(FailureKind::NotFound, 2);
        failed.insert(FailureKind::Transient, 0);

        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed: Duration::from_millis(1500),
            mode: ExecutionMode::Concurrent,
            workers: 4,
            dispatched: 10,
            enriched: 8,
            failed,
            retries: 3,
            rows_written: 10,
        };

        assert_eq!(summary.completed(), 10);
        let line = summary.to_string();
        assert!(line.contains("processed 10 records"));
        assert!(line.contains("not_found=2"));
        assert!(!line.contains("transient="));
    }
}
