use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::FailurePolicy;
use crate::metrics::PipelineMetrics;
use crate::types::{EnrichedRecord, FailureKind, Outcome};

/// Append-only set of output entries, keyed by input row index.
#[derive(Debug, Default)]
pub struct ResultSet {
    entries: Vec<(u64, EnrichedRecord)>,
}

impl ResultSet {
    fn push(&mut self, index: u64, record: EnrichedRecord) {
        self.entries.push((index, record));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u64, EnrichedRecord)> {
        self.entries.iter()
    }

    /// Restores input order.
    pub fn sort_by_index(&mut self) {
        self.entries.sort_by_key(|(index, _)| *index);
    }

    pub fn into_records(self) -> Vec<EnrichedRecord> {
        self.entries.into_iter().map(|(_, record)| record).collect()
    }
}

/// Terminal counts and results of a run, owned by the collector until the
/// last outcome has been received.
#[derive(Debug, Default)]
pub struct Collected {
    pub results: ResultSet,
    pub completed: u64,
    pub enriched: u64,
    pub failed: HashMap<FailureKind, u64>,
    pub retries: u64,
}

/// Sole writer of the [`ResultSet`].
///
/// Workers send outcomes through a channel only this collector reads; the
/// channel closes once every worker has dropped its sender, so draining it
/// to the end means every worker has terminated.
pub struct ResultCollector {
    policy: FailurePolicy,
    metrics: Arc<PipelineMetrics>,
    collected: Collected,
}

impl ResultCollector {
    pub fn new(policy: FailurePolicy, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            policy,
            metrics,
            collected: Collected::default(),
        }
    }

    pub fn completed(&self) -> u64 {
        self.collected.completed
    }

    pub fn record(&mut self, outcome: Outcome) {
        let collected = &mut self.collected;
        collected.completed += 1;
        collected.retries += u64::from(outcome.attempts().saturating_sub(1));

        match outcome {
            Outcome::Enriched { index, record, .. } => {
                collected.enriched += 1;
                self.metrics.records_enriched.inc();
                collected.results.push(index, record);
            }
            Outcome::Failed {
                index,
                kind,
                placeholder,
                ..
            } => {
                *collected.failed.entry(kind).or_default() += 1;
                self.metrics.record_failure(kind);
                if self.policy == FailurePolicy::Placeholder {
                    collected.results.push(index, placeholder);
                }
            }
        }
    }

    /// Drains `outcomes` until every sender is gone.
    pub async fn run(mut self, mut outcomes: mpsc::Receiver<Outcome>) -> Collected {
        while let Some(outcome) = outcomes.recv().await {
            self.record(outcome);
        }
        debug!("Result channel closed after {} outcomes", self.collected.completed);
        self.finish()
    }

    pub fn finish(self) -> Collected {
        self.collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enriched(index: u64, code: &str) -> Outcome {
        Outcome::Enriched {
            index,
            record: EnrichedRecord {
                city: "Bandung".to_string(),
                code: Some(code.to_string()),
                ..EnrichedRecord::default()
            },
            attempts: 1,
        }
    }

    #[test]
    fn test_placeholder_policy_keeps_failed_rows() {
        let mut collector = ResultCollector::new(FailurePolicy::Placeholder, PipelineMetrics::new().unwrap());
        collector.record(enriched(1, "b"));
        collector.record(Outcome::failed(0, FailureKind::NotFound, Some("a".to_string()), 1));

        let mut collected = collector.finish();
        assert_eq!(collected.completed, 2);
        assert_eq!(collected.enriched, 1);
        assert_eq!(collected.failed[&FailureKind::NotFound], 1);
        assert_eq!(collected.results.len(), 2);

        collected.results.sort_by_index();
        let records = collected.results.into_records();
        assert!(records[0].is_empty());
        assert_eq!(records[0].code.as_deref(), Some("a"));
        assert_eq!(records[1].code.as_deref(), Some("b"));
    }

    #[test]
    fn test_skip_policy_drops_failed_rows() {
        let mut collector = ResultCollector::new(FailurePolicy::Skip, PipelineMetrics::new().unwrap());
        collector.record(enriched(0, "a"));
        collector.record(Outcome::failed(1, FailureKind::Transient, None, 4));

        let collected = collector.finish();
        assert_eq!(collected.completed, 2);
        assert_eq!(collected.retries, 3);
        assert_eq!(collected.results.len(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_until_all_senders_drop() {
        let collector = ResultCollector::new(FailurePolicy::Placeholder, PipelineMetrics::new().unwrap());
        let (tx, rx) = mpsc::channel(4);

        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    for i in 0..25u64 {
                        tx.send(enriched(p * 25 + i, "x")).await.unwrap();
                    }
                })
            })
            .collect();
        drop(tx);

        let collected = collector.run(rx).await;
        for producer in producers {
            producer.await.unwrap();
        }
        assert_eq!(collected.completed, 100);
        assert_eq!(collected.results.len(), 100);
    }
}
