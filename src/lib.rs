pub mod config;
pub mod error;
pub mod lookup;
pub mod metrics;
pub mod panic_handler;
pub mod pipeline;
pub mod types;

pub use config::Config;
pub use error::{GeoEnrichError, Result};
pub use pipeline::Pipeline;
