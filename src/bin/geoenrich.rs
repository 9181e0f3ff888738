//! GeoEnrich CLI - reverse-geocodes every row of a coordinate CSV.
//!
//! Configuration is layered: built-in defaults, an optional TOML file,
//! `GEOENRICH_*` variables, the legacy `CSV_PATH`/`CSV_EXPORT_PATH`/`WORKER`/
//! `MAPBOX_URL`/`MAPBOX_TOKEN` variables, and finally the flags below.

use anyhow::Context;
use clap::Parser;
use geoenrich::config::{Config, ExecutionMode};
use geoenrich::Pipeline;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "geoenrich")]
#[command(about = "Enrich coordinate rows with administrative location fields")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input CSV (first row is a header)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output CSV
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Process rows one at a time without a worker pool
    #[arg(long)]
    sequential: bool,

    /// Omit the pass-through code column
    #[arg(long)]
    no_code: bool,

    /// Write rows in completion order instead of input order
    #[arg(long)]
    unordered: bool,

    /// Print Prometheus metrics for the run on exit
    #[arg(long)]
    print_metrics: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(input) = &self.input {
            config.input_path = input.clone();
        }
        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if self.sequential {
            config.pipeline.mode = ExecutionMode::Sequential;
        }
        if self.no_code {
            config.columns.code = None;
        }
        if self.unordered {
            config.pipeline.preserve_order = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    geoenrich::panic_handler::install_panic_hook();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        "Enriching {} into {}",
        config.input_path.display(),
        config.output_path.display()
    );

    let pipeline = Pipeline::from_config(config).context("Failed to build pipeline")?;
    let summary = pipeline.run().await.context("Enrichment run failed")?;

    println!("{}", summary);
    println!("done in {:.2?}", summary.elapsed);

    if cli.print_metrics {
        eprintln!("{}", pipeline.metrics().render()?);
    }

    Ok(())
}
