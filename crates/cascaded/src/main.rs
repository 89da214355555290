//! cascaded: the Cascade export daemon.
//!
//! Loads a collector config, starts the export engine over an in-process
//! registry, and reports a few process gauges until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! cascaded run --config /etc/cascade/cascade.toml
//! cascaded run --config cascade.toml --endpoint 10.0.0.1:4317,10.0.0.2:4317 --interval 10
//! cascaded config --config cascade.toml
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use cascade_core::CollectorConfig;
use cascade_export::{ExportEngine, MetricReporter};
use cascade_metrics::RecordOptions;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

const NO_ATTRIBUTES: &[&str] = &[];

#[derive(Parser)]
#[command(name = "cascaded", about = "Cascade metrics export daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export process metrics until interrupted.
    Run {
        /// Path to cascade.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Comma-separated collector endpoints; overrides the config.
        #[arg(long)]
        endpoint: Option<String>,

        /// Export interval in seconds; overrides the config.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Print the resolved configuration as JSON.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,cascade=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            endpoint,
            interval,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(endpoint) = endpoint {
                config.endpoint = endpoint;
            }
            if let Some(interval) = interval {
                config.interval_secs = interval;
            }
            config.validate()?;
            run(config).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CollectorConfig> {
    match path {
        Some(path) => Ok(CollectorConfig::from_file(path)?),
        None => Ok(CollectorConfig::default()),
    }
}

async fn run(config: CollectorConfig) -> anyhow::Result<()> {
    info!(
        service = %config.service,
        endpoint = %config.endpoint,
        interval = config.interval_secs,
        "cascade daemon starting"
    );

    let reporter = MetricReporter::start_with(ExportEngine::builder(config))?;
    register_process_gauges(&reporter);
    info!(
        local = %reporter.engine().local_endpoint(),
        "export engine running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let report = reporter.shutdown().await;
    if report.is_success() {
        info!("cascade daemon stopped");
    } else {
        warn!(?report, "cascade daemon stopped without a clean final flush");
    }
    Ok(())
}

fn register_process_gauges(reporter: &MetricReporter) {
    let registry = reporter.registry();
    let started = Instant::now();

    registry.register_gauge(
        "process",
        "process.uptime",
        RecordOptions::new()
            .unit("s")
            .description("Seconds since the daemon started"),
        move |observer| observer.observe(started.elapsed().as_secs_f64(), NO_ATTRIBUTES),
    );

    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    registry.register_gauge(
        "process",
        "process.cpu.count",
        RecordOptions::new().description("Logical CPUs available to the process"),
        move |observer| observer.observe(cpus as f64, NO_ATTRIBUTES),
    );
}
