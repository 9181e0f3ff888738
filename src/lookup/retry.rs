use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::config::{ColumnConfig, RetryConfig, RetryPolicy};
use crate::lookup::client::ReverseGeocoder;
use crate::lookup::error::LookupError;
use crate::metrics::PipelineMetrics;
use crate::types::{GeoQuery, Job, Outcome};

/// Turns a job into a terminal [`Outcome`]: extracts the query, calls the
/// geocoder and applies the retry policy to transient failures.
///
/// Never returns an error; every failure path yields `Outcome::Failed`.
#[derive(Clone)]
pub struct Resolver {
    geocoder: Arc<dyn ReverseGeocoder>,
    retry: RetryConfig,
    columns: ColumnConfig,
    metrics: Arc<PipelineMetrics>,
}

impl Resolver {
    pub fn new(
        geocoder: Arc<dyn ReverseGeocoder>,
        retry: RetryConfig,
        columns: ColumnConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            geocoder,
            retry,
            columns,
            metrics,
        }
    }

    pub fn columns(&self) -> &ColumnConfig {
        &self.columns
    }

    pub async fn resolve(&self, job: &Job) -> Outcome {
        let query = match GeoQuery::from_record(&job.record, &self.columns) {
            Ok(query) => query,
            Err(kind) => {
                let code = GeoQuery::code_of(&job.record, &self.columns);
                warn!(
                    "Row {} (code {:?}) has no usable coordinates, skipping lookup",
                    job.index, code
                );
                return Outcome::failed(job.index, kind, code, 0);
            }
        };

        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let call_start = Instant::now();
            let call = self.geocoder.reverse(&query);
            let result = match self.remaining_budget(started.elapsed()) {
                Some(remaining) => timeout(remaining, call)
                    .await
                    .unwrap_or(Err(LookupError::Timeout)),
                None => call.await,
            };
            self.metrics
                .lookup_latency
                .observe(call_start.elapsed().as_secs_f64());

            let error = match result {
                Ok(record) => {
                    debug!("Row {} enriched after {} attempt(s)", job.index, attempts);
                    return Outcome::Enriched {
                        index: job.index,
                        record,
                        attempts,
                    };
                }
                Err(error) => error,
            };

            let kind = error.kind();
            if kind.is_retryable() {
                if let Some(delay) = self.retry_delay(attempts, started.elapsed()) {
                    warn!(
                        "Row {} lookup failed (attempt {}), retrying in {}ms: {}",
                        job.index,
                        attempts,
                        delay.as_millis(),
                        error
                    );
                    self.metrics.lookup_retries.inc();
                    sleep(delay).await;
                    continue;
                }
            }

            warn!(
                "Row {} (code {:?}) failed permanently after {} attempt(s) [{}]: {}",
                job.index, query.code, attempts, kind, error
            );
            return Outcome::failed(job.index, kind, query.code, attempts);
        }
    }

    /// Time left for a record under the unbounded policy; `None` when the
    /// policy has no wall-clock budget.
    fn remaining_budget(&self, elapsed: Duration) -> Option<Duration> {
        match self.retry.policy {
            RetryPolicy::Bounded { .. } => None,
            RetryPolicy::Unbounded { max_elapsed_ms } => {
                Some(Duration::from_millis(max_elapsed_ms).saturating_sub(elapsed))
            }
        }
    }

    /// Delay before the next attempt, or `None` once the policy is exhausted.
    fn retry_delay(&self, attempts: u32, elapsed: Duration) -> Option<Duration> {
        let retries_done = attempts.saturating_sub(1);
        let delay = self.retry.backoff.delay(retries_done);

        match self.retry.policy {
            RetryPolicy::Bounded { max_retries } => (retries_done < max_retries).then_some(delay),
            RetryPolicy::Unbounded { max_elapsed_ms } => {
                let budget = Duration::from_millis(max_elapsed_ms);
                (elapsed + delay < budget).then_some(delay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryBackoffStrategy;
    use crate::lookup::error::LookupError;
    use crate::lookup::mock::MockGeocoder;
    use crate::types::{EnrichedRecord, FailureKind, RawRecord};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retry(policy: RetryPolicy) -> RetryConfig {
        RetryConfig {
            policy,
            backoff: RetryBackoffStrategy::Fixed { delay_ms: 1 },
        }
    }

    fn job(fields: &[&str]) -> Job {
        Job {
            index: 7,
            record: fields.iter().copied().collect::<RawRecord>(),
        }
    }

    fn resolver(geocoder: Arc<MockGeocoder>, policy: RetryPolicy) -> (Resolver, Arc<PipelineMetrics>) {
        let metrics = PipelineMetrics::new().unwrap();
        let resolver = Resolver::new(geocoder, retry(policy), ColumnConfig::default(), metrics.clone());
        (resolver, metrics)
    }

    fn fixed() -> EnrichedRecord {
        EnrichedRecord {
            province: "Jawa Barat".to_string(),
            city: "Bandung".to_string(),
            district: "Coblong".to_string(),
            sub_district: "Dago".to_string(),
            postal_code: "40135".to_string(),
            code: None,
        }
    }

    #[tokio::test]
    async fn test_success_carries_code() {
        let geocoder = Arc::new(MockGeocoder::fixed(fixed()));
        let (resolver, _) = resolver(geocoder.clone(), RetryPolicy::Bounded { max_retries: 3 });

        let outcome = resolver.resolve(&job(&["-6.9", "107.6", "002"])).await;
        match outcome {
            Outcome::Enriched { index, record, attempts } => {
                assert_eq!(index, 7);
                assert_eq!(attempts, 1);
                assert_eq!(record.code.as_deref(), Some("002"));
                assert_eq!(record.city, "Bandung");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test]
    async fn test_bounded_retry_gives_up() {
        let geocoder = Arc::new(MockGeocoder::new(|_| Err(LookupError::ServerError { status: 503 })));
        let (resolver, metrics) = resolver(geocoder.clone(), RetryPolicy::Bounded { max_retries: 2 });

        let outcome = resolver.resolve(&job(&["-6.9", "107.6", "002"])).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Transient));
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(geocoder.calls(), 3);
        assert_eq!(metrics.lookup_retries.get(), 2);

        if let Outcome::Failed { placeholder, .. } = outcome {
            assert!(placeholder.is_empty());
            assert_eq!(placeholder.code.as_deref(), Some("002"));
        }
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let failures = Arc::new(AtomicU32::new(2));
        let remaining = failures.clone();
        let geocoder = Arc::new(MockGeocoder::new(move |_| {
            if remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(LookupError::Timeout)
            } else {
                Ok(fixed())
            }
        }));
        let (resolver, metrics) = resolver(geocoder.clone(), RetryPolicy::Bounded { max_retries: 3 });

        let outcome = resolver.resolve(&job(&["-6.9", "107.6", "002"])).await;
        assert!(outcome.is_enriched());
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(metrics.lookup_retries.get(), 2);
    }

    #[tokio::test]
    async fn test_terminal_failures_are_not_retried() {
        for error in [
            LookupError::NoFeature,
            LookupError::Malformed("bad".to_string()),
            LookupError::Rejected { status: 401 },
        ] {
            let expected = error.kind();
            let geocoder = Arc::new(MockGeocoder::new(move |_| Err(error.clone())));
            let (resolver, metrics) = resolver(geocoder.clone(), RetryPolicy::Bounded { max_retries: 5 });

            let outcome = resolver.resolve(&job(&["-6.2", "106.8", "001"])).await;
            assert_eq!(outcome.failure_kind(), Some(expected));
            assert_eq!(geocoder.calls(), 1);
            assert_eq!(metrics.lookup_retries.get(), 0);
        }
    }

    #[tokio::test]
    async fn test_unbounded_retry_respects_budget() {
        let geocoder = Arc::new(MockGeocoder::new(|_| Err(LookupError::Request("refused".to_string()))));
        let (resolver, _) = resolver(geocoder.clone(), RetryPolicy::Unbounded { max_elapsed_ms: 50 });

        let started = std::time::Instant::now();
        let outcome = resolver.resolve(&job(&["-6.2", "106.8", "001"])).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Transient));
        assert!(geocoder.calls() > 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unbounded_budget_cuts_off_a_slow_call() {
        let geocoder = Arc::new(
            MockGeocoder::fixed(EnrichedRecord::default()).with_latency(Duration::from_secs(5)),
        );
        let (resolver, _) = resolver(geocoder.clone(), RetryPolicy::Unbounded { max_elapsed_ms: 50 });

        let started = std::time::Instant::now();
        let outcome = resolver.resolve(&job(&["-6.2", "106.8", "001"])).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::Transient));
        assert_eq!(outcome.attempts(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(geocoder.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_invalid_row_skips_lookup() {
        let geocoder = Arc::new(MockGeocoder::fixed(fixed()));
        let (resolver, _) = resolver(geocoder.clone(), RetryPolicy::Bounded { max_retries: 3 });

        let outcome = resolver.resolve(&job(&["", "106.8", "003"])).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::InvalidInput));
        assert_eq!(outcome.attempts(), 0);
        assert_eq!(geocoder.calls(), 0);
    }
}
