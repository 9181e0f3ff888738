//! Run orchestration: wires source, job queue, workers, collector and sink
//! together and decides when the run is complete.

use chrono::Utc;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, ExecutionMode};
use crate::error::GeoEnrichError;
use crate::lookup::{HttpGeocoder, Resolver, ReverseGeocoder};
use crate::metrics::{PipelineMetrics, RunSummary};
use crate::pipeline::collector::{Collected, ResultCollector};
use crate::pipeline::queue::{dispatch, job_queue};
use crate::pipeline::sink::CsvSink;
use crate::pipeline::source::RecordSource;
use crate::pipeline::worker::{resolve_isolated, WorkerPool};
use crate::types::RawRecord;

/// One configurable enrichment pipeline, sequential or concurrent.
pub struct Pipeline {
    config: Config,
    geocoder: Arc<dyn ReverseGeocoder>,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(config: Config, geocoder: Arc<dyn ReverseGeocoder>) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            geocoder,
            metrics: PipelineMetrics::new()?,
        })
    }

    /// Pipeline backed by the HTTP reverse geocoder described in `config.lookup`.
    pub fn from_config(config: Config) -> crate::Result<Self> {
        let geocoder = Arc::new(HttpGeocoder::new(&config.lookup)?);
        Self::new(config, geocoder)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Reads `config.input_path`, enriches every row and writes
    /// `config.output_path`. Both files are opened before any lookup; the
    /// output only replaces an existing file once the whole run succeeded.
    pub async fn run(&self) -> crate::Result<RunSummary> {
        let source = RecordSource::open(&self.config.input_path)?;
        let sink = CsvSink::create(&self.config.output_path, self.config.columns.code.is_some())?;
        let (summary, output) = self.run_with(source, sink).await?;
        output.commit()?;
        Ok(summary)
    }

    /// Runs over an arbitrary record source and sink. The sink is invoked
    /// once, after every dispatched job has reached a terminal outcome.
    pub async fn run_with<I, W>(&self, source: I, sink: CsvSink<W>) -> crate::Result<(RunSummary, W)>
    where
        I: Iterator<Item = crate::Result<RawRecord>> + Send + 'static,
        W: Write,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let pipeline = &self.config.pipeline;

        let workers = match pipeline.mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Concurrent => pipeline.workers,
        };
        info!(
            "Starting run {} in {:?} mode: {} worker(s), queue capacity {}",
            run_id,
            pipeline.mode,
            workers,
            self.queue_capacity()
        );

        let (dispatched, mut collected) = match pipeline.mode {
            ExecutionMode::Sequential => self.run_sequential(source).await?,
            ExecutionMode::Concurrent => self.run_concurrent(source).await?,
        };

        if collected.completed != dispatched {
            return Err(GeoEnrichError::Pipeline(format!(
                "{} jobs dispatched but {} reached a terminal outcome",
                dispatched, collected.completed
            )));
        }

        if collected.results.is_empty() && dispatched > 0 {
            warn!("None of the {} dispatched rows produced an output row", dispatched);
        }

        if pipeline.preserve_order {
            collected.results.sort_by_index();
        }

        let (writer, rows_written) = sink.write(&collected.results)?;

        let summary = RunSummary {
            run_id,
            started_at,
            elapsed: start.elapsed(),
            mode: pipeline.mode,
            workers,
            dispatched,
            enriched: collected.enriched,
            failed: collected.failed,
            retries: collected.retries,
            rows_written,
        };
        info!("{}", summary);

        Ok((summary, writer))
    }

    fn queue_capacity(&self) -> usize {
        match self.config.pipeline.mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Concurrent => self.config.pipeline.queue_capacity(),
        }
    }

    fn resolver(&self) -> Resolver {
        Resolver::new(
            self.geocoder.clone(),
            self.config.retry.clone(),
            self.config.columns.clone(),
            self.metrics.clone(),
        )
    }

    fn collector(&self) -> ResultCollector {
        ResultCollector::new(self.config.pipeline.failure_policy, self.metrics.clone())
    }

    async fn run_concurrent<I>(&self, source: I) -> crate::Result<(u64, Collected)>
    where
        I: Iterator<Item = crate::Result<RawRecord>> + Send + 'static,
    {
        let pipeline = &self.config.pipeline;
        let (jobs_tx, jobs_rx) = job_queue(self.queue_capacity());
        let (outcomes_tx, outcomes_rx) = mpsc::channel(pipeline.workers);

        let pool = WorkerPool::spawn(
            pipeline.workers,
            jobs_rx,
            self.resolver(),
            outcomes_tx,
            self.metrics.clone(),
            pipeline.progress_interval,
        );
        debug!("Spawned {} workers", pool.size());
        let collector = tokio::spawn(self.collector().run(outcomes_rx));

        let metrics = self.metrics.clone();
        let dispatcher = tokio::task::spawn_blocking(move || dispatch(source, jobs_tx, metrics));

        // Workers drain whatever was dispatched even when the source failed.
        let dispatched = dispatcher.await;
        let reports = pool.join().await;
        let collected = collector
            .await
            .map_err(|e| GeoEnrichError::Pipeline(format!("result collector failed: {}", e)))?;

        let dispatched = dispatched
            .map_err(|e| GeoEnrichError::Pipeline(format!("record dispatcher failed: {}", e)))?
            .inspect_err(|e| error!("Aborting run: {}", e))?;

        let reports = reports?;
        let panics: u64 = reports.iter().map(|r| r.panics).sum();
        if panics > 0 {
            error!("{} lookup(s) panicked and were recorded as failures", panics);
        }

        Ok((dispatched, collected))
    }

    async fn run_sequential<I>(&self, source: I) -> crate::Result<(u64, Collected)>
    where
        I: Iterator<Item = crate::Result<RawRecord>> + Send + 'static,
    {
        let (jobs_tx, jobs_rx) = job_queue(self.queue_capacity());
        let metrics = self.metrics.clone();
        let dispatcher = tokio::task::spawn_blocking(move || dispatch(source, jobs_tx, metrics));

        let resolver = self.resolver();
        let mut collector = self.collector();
        let progress_interval = self.config.pipeline.progress_interval.max(1);

        self.metrics.workers_active.inc();
        while let Ok(job) = jobs_rx.recv().await {
            let (outcome, _) = resolve_isolated(&resolver, &job).await;
            collector.record(outcome);

            if collector.completed() % progress_interval == 0 {
                info!("Processed {} records", collector.completed());
            }
        }
        self.metrics.workers_active.dec();

        let dispatched = dispatcher
            .await
            .map_err(|e| GeoEnrichError::Pipeline(format!("record dispatcher failed: {}", e)))?
            .inspect_err(|e| error!("Aborting run: {}", e))?;

        Ok((dispatched, collector.finish()))
    }
}
