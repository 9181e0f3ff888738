use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::GeoEnrichError;

/// Prefix for layered environment overrides, e.g. `GEOENRICH_PIPELINE__WORKERS=16`.
pub const ENV_PREFIX: &str = "GEOENRICH";

/// Flat variables understood for compatibility with existing `.env` files.
pub const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("CSV_PATH", "input_path"),
    ("CSV_EXPORT_PATH", "output_path"),
    ("WORKER", "pipeline.workers"),
    ("MAPBOX_URL", "lookup.base_url"),
    ("MAPBOX_TOKEN", "lookup.access_token"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub pipeline: PipelineConfig,
    pub columns: ColumnConfig,
    pub lookup: LookupConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: ExecutionMode,
    /// Number of concurrent workers (concurrent mode only)
    pub workers: usize,
    /// Job queue capacity; defaults to the worker count
    pub queue_capacity: Option<usize>,
    /// Re-sort results by input row before writing
    pub preserve_order: bool,
    pub failure_policy: FailurePolicy,
    /// Each worker logs progress after this many records
    pub progress_interval: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    #[serde(rename = "sequential")]
    Sequential,
    #[serde(rename = "concurrent")]
    Concurrent,
}

/// What a terminal per-record failure contributes to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Emit a row with empty administrative fields, keeping the pass-through code
    #[serde(rename = "placeholder")]
    Placeholder,
    /// Leave the row out of the output
    #[serde(rename = "skip")]
    Skip,
}

/// Zero-based positions of the fields a row contributes to a lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub latitude: usize,
    pub longitude: usize,
    /// Pass-through identifier column; `None` drops the `Code` output column
    pub code: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Base URL the coordinates are appended to, e.g.
    /// `https://api.mapbox.com/geocoding/v5/mapbox.places/`
    pub base_url: String,
    pub access_token: String,
    /// Optional `types=` filter
    pub type_filter: Option<String>,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub policy: RetryPolicy,
    pub backoff: RetryBackoffStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// Retry transient failures up to `max_retries` times, then give up
    #[serde(rename = "bounded")]
    Bounded { max_retries: u32 },
    /// Retry transient failures until success or until `max_elapsed_ms` has
    /// passed for the record. An in-flight call is cut off when the budget
    /// runs out. Can livelock against a dead endpoint for the whole budget of
    /// every record.
    #[serde(rename = "unbounded")]
    Unbounded { max_elapsed_ms: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RetryBackoffStrategy {
    #[serde(rename = "linear")]
    Linear { increment_ms: u64 },
    #[serde(rename = "exponential")]
    Exponential { base_ms: u64, max_ms: u64 },
    #[serde(rename = "fixed")]
    Fixed { delay_ms: u64 },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("input.csv"),
            output_path: PathBuf::from("output.csv"),
            pipeline: PipelineConfig::default(),
            columns: ColumnConfig::default(),
            lookup: LookupConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Concurrent,
            workers: 8,
            queue_capacity: None,
            preserve_order: true,
            failure_policy: FailurePolicy::Placeholder,
            progress_interval: 100,
        }
    }
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            latitude: 0,
            longitude: 1,
            code: Some(2),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mapbox.com/geocoding/v5/mapbox.places/".to_string(),
            access_token: String::new(),
            type_filter: Some("poi".to_string()),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::Bounded { max_retries: 3 },
            backoff: RetryBackoffStrategy::Exponential {
                base_ms: 200,
                max_ms: 5_000,
            },
        }
    }
}

impl PipelineConfig {
    /// Effective job queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.workers).max(1)
    }
}

impl LookupConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl RetryBackoffStrategy {
    /// Delay before retry number `attempt` (0 for the first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            RetryBackoffStrategy::Linear { increment_ms } => {
                Duration::from_millis(increment_ms.saturating_mul(attempt as u64 + 1))
            }
            RetryBackoffStrategy::Exponential { base_ms, max_ms } => {
                let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor).min(*max_ms))
            }
            RetryBackoffStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| GeoEnrichError::InvalidConfig(e.to_string()))?;
        Ok(config)
    }

    /// Layers defaults, an optional TOML file and the process environment.
    /// The result is not validated; callers apply their own overrides first.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Same as [`Config::load`] with an explicit set of environment variables.
    pub fn load_with_env(
        path: Option<&Path>,
        vars: config::Map<String, String>,
    ) -> crate::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars.clone())),
        );

        for (env_key, config_key) in LEGACY_ENV_KEYS {
            builder = builder.set_override_option(*config_key, vars.get(*env_key).cloned())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.input_path.as_os_str().is_empty() {
            return Err(GeoEnrichError::InvalidConfig(
                "input_path cannot be empty".to_string(),
            ));
        }

        if self.output_path.as_os_str().is_empty() {
            return Err(GeoEnrichError::InvalidConfig(
                "output_path cannot be empty".to_string(),
            ));
        }

        if self.pipeline.workers == 0 {
            return Err(GeoEnrichError::InvalidConfig(
                "pipeline.workers must be greater than 0".to_string(),
            ));
        }

        if let Some(capacity) = self.pipeline.queue_capacity {
            if capacity < self.pipeline.workers {
                return Err(GeoEnrichError::InvalidConfig(format!(
                    "pipeline.queue_capacity ({}) must be at least pipeline.workers ({})",
                    capacity, self.pipeline.workers
                )));
            }
        }

        if self.pipeline.progress_interval == 0 {
            return Err(GeoEnrichError::InvalidConfig(
                "pipeline.progress_interval must be greater than 0".to_string(),
            ));
        }

        if self.columns.latitude == self.columns.longitude {
            return Err(GeoEnrichError::InvalidConfig(
                "columns.latitude and columns.longitude must differ".to_string(),
            ));
        }

        if self.lookup.base_url.is_empty() {
            return Err(GeoEnrichError::InvalidConfig(
                "lookup.base_url cannot be empty".to_string(),
            ));
        }

        if self.lookup.request_timeout_ms == 0 {
            return Err(GeoEnrichError::InvalidConfig(
                "lookup.request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        match self.retry.policy {
            RetryPolicy::Unbounded { max_elapsed_ms: 0 } => {
                return Err(GeoEnrichError::InvalidConfig(
                    "retry.policy.unbounded.max_elapsed_ms must be greater than 0".to_string(),
                ));
            }
            RetryPolicy::Unbounded { max_elapsed_ms } => {
                warn!(
                    "Unbounded retry selected: a persistently failing endpoint can hold each record for up to {}ms",
                    max_elapsed_ms
                );
            }
            RetryPolicy::Bounded { .. } => {}
        }

        Ok(())
    }
}
