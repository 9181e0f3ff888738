//! Bounded concurrent enrichment pipeline.
//!
//! ```text
//! RecordSource ─▶ job queue (bounded) ─▶ WorkerPool (N) ─▶ ResultCollector ─▶ CsvSink
//! ```
//!
//! The source runs on a blocking thread and stalls when the job queue is
//! full. Workers send every outcome to a single collector through a channel;
//! the channel closes only after the last worker exits, which is the signal
//! that the sink may run.

pub mod collector;
pub mod orchestrator;
pub mod queue;
pub mod sink;
pub mod source;
pub mod worker;

pub use collector::{Collected, ResultCollector, ResultSet};
pub use orchestrator::Pipeline;
pub use queue::{dispatch, job_queue};
pub use sink::CsvSink;
pub use source::RecordSource;
pub use worker::{WorkerPool, WorkerReport};
