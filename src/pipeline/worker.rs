use async_channel::Receiver;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::GeoEnrichError;
use crate::lookup::Resolver;
use crate::metrics::PipelineMetrics;
use crate::types::{FailureKind, GeoQuery, Job, Outcome};

/// Per-worker totals returned when a worker exits.
#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub processed: u64,
    pub panics: u64,
}

/// Fixed set of symmetric workers pulling from one job queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<WorkerReport>>,
}

struct Worker {
    id: usize,
    jobs: Receiver<Job>,
    resolver: Resolver,
    outcomes: mpsc::Sender<Outcome>,
    metrics: Arc<PipelineMetrics>,
    progress_interval: u64,
}

impl WorkerPool {
    /// Starts `workers` tasks. Each holds a clone of `outcomes`; the result
    /// channel closes when the last worker exits.
    pub fn spawn(
        workers: usize,
        jobs: Receiver<Job>,
        resolver: Resolver,
        outcomes: mpsc::Sender<Outcome>,
        metrics: Arc<PipelineMetrics>,
        progress_interval: u64,
    ) -> Self {
        let handles = (0..workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    jobs: jobs.clone(),
                    resolver: resolver.clone(),
                    outcomes: outcomes.clone(),
                    metrics: metrics.clone(),
                    progress_interval: progress_interval.max(1),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self { handles }
    }

    /// Number of spawned workers.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Waits for every worker to exit.
    pub async fn join(self) -> crate::Result<Vec<WorkerReport>> {
        let mut reports = Vec::with_capacity(self.handles.len());
        let mut failures = Vec::new();

        for result in join_all(self.handles).await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("Worker task failed: {}", e);
                    failures.push(e.to_string());
                }
            }
        }

        if !failures.is_empty() {
            return Err(GeoEnrichError::Pipeline(format!(
                "{} worker(s) terminated unexpectedly: {}",
                failures.len(),
                failures.join("; ")
            )));
        }

        Ok(reports)
    }
}

impl Worker {
    async fn run(self) -> WorkerReport {
        self.metrics.workers_active.inc();
        debug!("Worker {} started", self.id);

        let mut report = WorkerReport {
            worker_id: self.id,
            ..WorkerReport::default()
        };

        while let Ok(job) = self.jobs.recv().await {
            let (outcome, panicked) = resolve_isolated(&self.resolver, &job).await;
            if panicked {
                report.panics += 1;
            }

            if self.outcomes.send(outcome).await.is_err() {
                error!("Worker {} lost the result channel, stopping", self.id);
                break;
            }

            report.processed += 1;
            if report.processed % self.progress_interval == 0 {
                info!("Worker {} processed {} records", self.id, report.processed);
            }
        }

        self.metrics.workers_active.dec();
        debug!("Worker {} exiting after {} records", self.id, report.processed);
        report
    }
}

/// Resolves one job, turning a panic inside the lookup into a terminal
/// failure for that job alone. The flag is set when a panic was caught.
pub(crate) async fn resolve_isolated(resolver: &Resolver, job: &Job) -> (Outcome, bool) {
    match AssertUnwindSafe(resolver.resolve(job)).catch_unwind().await {
        Ok(outcome) => (outcome, false),
        Err(payload) => {
            error!(
                "Lookup panicked on row {}: {}",
                job.index,
                panic_message(payload.as_ref())
            );
            let code = GeoQuery::code_of(&job.record, resolver.columns());
            (Outcome::failed(job.index, FailureKind::MalformedResponse, code, 0), true)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic message".to_string()
    }
}
