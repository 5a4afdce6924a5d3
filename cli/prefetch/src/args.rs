//! CLI argument definitions for bf-prefetch.

use bf_prefetch::ExecutionMode;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

pub use bf_cli_common::LogLevel;

/// Drive a prefetching batch pipeline.
///
/// Builds a producer and a compute step from the built-in registries, runs
/// the requested number of steps with the next batch prefetched in the
/// background, and reports where time went.
///
/// ## Examples
///
/// Default synthetic pipeline, 100 steps:
///   bf-prefetch
///
/// Slow producer, show how much latency prefetching hides:
///   bf-prefetch --fill-delay-ms 20 --step sleep --compute-delay-ms 25 --progress
///
/// Accelerator staging from a config file:
///   bf-prefetch -c run.json --mode accelerator --json
#[derive(Parser, Debug)]
#[command(name = "bf-prefetch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// JSON run configuration; flags override values from the file
    #[arg(short = 'c', long, env = "BF_CONFIG")]
    pub config: Option<PathBuf>,

    // === Pipeline ===
    /// Pipeline name (used in logs and the worker thread name)
    #[arg(long)]
    pub name: Option<String>,

    /// Number of pooled batches (must be >= 2)
    #[arg(short = 'n', long, value_parser = parse_pool_size)]
    pub pool_size: Option<usize>,

    /// Execution mode
    #[arg(short = 'm', long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Shutdown timeout in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub shutdown_timeout: Option<u64>,

    /// Give up when no batch is ready within this many milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub wait_timeout_ms: Option<u64>,

    // === Producer ===
    /// Producer type
    #[arg(short = 'p', long)]
    pub producer: Option<String>,

    /// Records per batch (must be >= 1)
    #[arg(short = 'b', long, value_parser = parse_positive_usize)]
    pub batch_size: Option<usize>,

    /// Channels per record (must be >= 1)
    #[arg(long, value_parser = parse_positive_usize)]
    pub channels: Option<usize>,

    /// Record height (must be >= 1)
    #[arg(long, value_parser = parse_positive_usize)]
    pub height: Option<usize>,

    /// Record width (must be >= 1)
    #[arg(long, value_parser = parse_positive_usize)]
    pub width: Option<usize>,

    /// Emit labels with every batch
    #[arg(long)]
    pub labels: bool,

    /// Simulated producer latency per batch in milliseconds
    #[arg(long)]
    pub fill_delay_ms: Option<u64>,

    /// Make the producer fail after this many batches
    #[arg(long)]
    pub fail_after: Option<u64>,

    /// Seed for synthetic data
    #[arg(long)]
    pub seed: Option<u64>,

    // === Consumer ===
    /// Compute step type
    #[arg(short = 's', long)]
    pub step: Option<String>,

    /// Simulated compute latency per step in milliseconds
    #[arg(long)]
    pub compute_delay_ms: Option<u64>,

    /// Number of steps to run
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub steps: Option<u64>,

    // === Output ===
    /// List registered producers and steps, then exit
    #[arg(long)]
    pub list: bool,

    /// Print the final statistics snapshot as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Show periodic progress on stderr
    #[arg(long)]
    pub progress: bool,

    /// Progress interval in seconds
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    pub progress_interval: u64,

    /// Log level
    #[arg(short = 'l', long, value_enum, default_value = "info", env = "BF_LOG_LEVEL")]
    pub log_level: LogLevel,
}

/// Execution mode argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Consume batches from host memory
    Host,
    /// Stage batches to accelerator memory before publication
    Accelerator,
}

impl From<ModeArg> for ExecutionMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Host => ExecutionMode::Host,
            ModeArg::Accelerator => ExecutionMode::Accelerator,
        }
    }
}

/// Parse a positive usize (>= 1).
fn parse_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if value == 0 {
        return Err("value must be at least 1".to_string());
    }
    Ok(value)
}

/// Parse a pool size (>= 2).
fn parse_pool_size(s: &str) -> Result<usize, String> {
    let value = parse_positive_usize(s)?;
    if value < bf_prefetch::MIN_POOL_SIZE {
        return Err(format!(
            "pool size must be at least {}",
            bf_prefetch::MIN_POOL_SIZE
        ));
    }
    Ok(value)
}
