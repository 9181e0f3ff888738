use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GeoEnrichError>;

/// Run-level errors. Anything in here aborts the whole run; per-record
/// failures are `lookup::LookupError` and never reach this type.
#[derive(Error, Debug)]
pub enum GeoEnrichError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot open input file {path}: {source}")]
    InputOpen {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Cannot create output file {path}: {source}")]
    OutputCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input read error at row {row}: {message}")]
    InputRead { row: u64, message: String },

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
