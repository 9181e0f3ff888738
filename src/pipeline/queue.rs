use async_channel::{Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::GeoEnrichError;
use crate::metrics::PipelineMetrics;
use crate::types::{Job, RawRecord};

/// Bounded FIFO between the record source and the workers.
///
/// Any number of workers may pull from the receiver. The queue closes when
/// the sender side is dropped; receivers then drain what is left and see
/// `recv()` fail.
pub fn job_queue(capacity: usize) -> (Sender<Job>, Receiver<Job>) {
    async_channel::bounded(capacity.max(1))
}

/// Feeds every record from `source` into the job queue, tagging each with
/// its data-row index. Blocks while the queue is full.
///
/// Runs on a blocking thread. Returns the number of dispatched jobs; the
/// queue is closed on return either way.
pub fn dispatch<I>(source: I, jobs: Sender<Job>, metrics: Arc<PipelineMetrics>) -> crate::Result<u64>
where
    I: Iterator<Item = crate::Result<RawRecord>>,
{
    let mut dispatched: u64 = 0;

    for record in source {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                jobs.close();
                return Err(e);
            }
        };

        let job = Job {
            index: dispatched,
            record,
        };

        jobs.send_blocking(job).map_err(|_| {
            GeoEnrichError::Pipeline(format!(
                "job queue closed with no workers left after {} dispatched jobs",
                dispatched
            ))
        })?;

        dispatched += 1;
        metrics.records_dispatched.inc();
        if dispatched % 1_000 == 0 {
            debug!("Dispatched {} jobs", dispatched);
        }
    }

    jobs.close();
    info!("Input exhausted after {} records, job queue closed", dispatched);
    Ok(dispatched)
}
