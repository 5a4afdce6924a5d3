//! Pipeline execution for bf-prefetch.

use crate::args::Cli;
use crate::progress::ProgressReporter;
use anyhow::{anyhow, Context, Result};
use bf_prefetch::producer::{builtin_producers, ProducerConfig};
use bf_prefetch::step::{builtin_steps, StepConfig};
use bf_prefetch::{
    staging_for, ExecutionMode, PrefetchConfig, PrefetchingStage, StatsSnapshot, WorkerSummary,
};
use bf_traits::ComputeStep;
use bf_types::{Device, HostMirrorDevice};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default number of steps per run.
pub const DEFAULT_STEPS: u64 = 100;

/// Everything needed to run one pipeline, as read from `--config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Prefetch pipeline settings
    #[serde(default)]
    pub prefetch: PrefetchConfig,

    /// Producer type and settings
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Compute step type and settings
    #[serde(default)]
    pub step: StepConfig,

    /// Number of steps to run
    #[serde(default = "default_steps")]
    pub steps: u64,
}

fn default_steps() -> u64 {
    DEFAULT_STEPS
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            prefetch: PrefetchConfig::default(),
            producer: ProducerConfig::default(),
            step: StepConfig::default(),
            steps: default_steps(),
        }
    }
}

impl RunConfig {
    /// Read a JSON run configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Apply command-line overrides.
    pub fn apply_args(&mut self, args: &Cli) {
        if let Some(name) = &args.name {
            self.prefetch.name = name.clone();
        }
        if let Some(pool_size) = args.pool_size {
            self.prefetch.pool_size = pool_size;
        }
        if let Some(mode) = args.mode {
            self.prefetch.execution_mode = mode.into();
        }
        if let Some(secs) = args.shutdown_timeout {
            self.prefetch.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = args.wait_timeout_ms {
            self.prefetch.wait_timeout = Some(Duration::from_millis(ms));
        }

        if let Some(kind) = &args.producer {
            self.producer.kind = kind.clone();
        }
        if let Some(batch_size) = args.batch_size {
            self.producer.batch_size = batch_size;
        }
        if let Some(channels) = args.channels {
            self.producer.channels = channels;
        }
        if let Some(height) = args.height {
            self.producer.height = height;
        }
        if let Some(width) = args.width {
            self.producer.width = width;
        }
        if args.labels {
            self.producer.labels = true;
        }
        if let Some(ms) = args.fill_delay_ms {
            self.producer.fill_delay_ms = ms;
        }
        if let Some(fills) = args.fail_after {
            self.producer.fail_after = Some(fills);
        }
        if let Some(seed) = args.seed {
            self.producer.seed = seed;
        }

        if let Some(kind) = &args.step {
            self.step.kind = kind.clone();
        }
        if let Some(ms) = args.compute_delay_ms {
            self.step.delay_ms = ms;
            // A delay on its own means the sleep step
            if args.step.is_none() && self.step.kind == "checksum" {
                self.step.kind = "sleep".to_string();
            }
        }
        if let Some(steps) = args.steps {
            self.steps = steps;
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pipeline: String,
    pub mode: ExecutionMode,
    pub producer: String,
    pub step: String,
    pub steps: u64,
    /// Sum of step outputs
    pub checksum: f64,
    /// Elements read by the steps
    pub elements: u64,
    pub elapsed: Duration,
    pub summary: WorkerSummary,
    pub stats: StatsSnapshot,
}

/// Build and run the pipeline described by `args`.
pub fn execute(args: &Cli) -> Result<RunReport> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    config.apply_args(args);
    config
        .prefetch
        .validate()
        .map_err(|e| anyhow!("invalid prefetch configuration: {e}"))?;

    let producers = builtin_producers()?;
    let steps = builtin_steps()?;

    let producer = producers
        .create(&config.producer.kind, &config.producer)
        .context("failed to create producer")?;
    let mut step = steps
        .create(&config.step.kind, &config.step)
        .context("failed to create compute step")?;

    let mode = config.prefetch.execution_mode;
    let device: Option<Arc<dyn Device>> = match mode {
        ExecutionMode::Host => None,
        ExecutionMode::Accelerator => Some(Arc::new(HostMirrorDevice::default())),
    };
    let staging = staging_for(mode, device)?;

    info!(
        pipeline = %config.prefetch.name,
        producer = %config.producer.kind,
        step = %config.step.kind,
        pool_size = config.prefetch.pool_size,
        mode = %mode,
        steps = config.steps,
        "Starting run"
    );

    let mut stage = PrefetchingStage::new(config.prefetch.clone(), producer, staging)
        .context("failed to build prefetching stage")?;
    stage.start().context("failed to start prefetching")?;

    let mut progress = ProgressReporter::new(args.progress, args.progress_interval);
    progress.start(stage.stats_handle());

    let started = Instant::now();
    let consumed = consume(&mut stage, &mut *step, config.steps);
    let elapsed = started.elapsed();

    progress.stop(&stage.stats());
    let stopped = stage.stop();

    let (checksum, elements) = match consumed {
        Ok(totals) => totals,
        Err(e) => {
            if let Err(original) = &stopped {
                warn!(error = %original, "Prefetch worker stopped with error");
            }
            return Err(e);
        }
    };
    let summary = stopped.context("failed to stop prefetch worker")?;

    Ok(RunReport {
        pipeline: config.prefetch.name,
        mode,
        producer: config.producer.kind,
        step: config.step.kind,
        steps: config.steps,
        checksum,
        elements,
        elapsed,
        summary,
        stats: stage.stats(),
    })
}

/// Run `steps` compute steps, returning the checksum and element total.
fn consume(
    stage: &mut PrefetchingStage,
    step: &mut dyn ComputeStep,
    steps: u64,
) -> Result<(f64, u64)> {
    let mut checksum = 0.0;
    let mut elements = 0u64;

    for i in 1..=steps {
        let batch = stage
            .advance()
            .with_context(|| format!("failed to claim batch for step {i}"))?;
        let output = step
            .step(batch)
            .with_context(|| format!("compute step {} failed at step {i}", step.name()))?;

        debug!(
            step = i,
            sequence = batch.sequence(),
            value = output.value,
            "Step complete"
        );
        checksum += output.value;
        elements += output.elements as u64;
    }
    Ok((checksum, elements))
}

/// Print the registered producers and steps.
pub fn list_components() -> Result<()> {
    let producers = builtin_producers()?;
    let steps = builtin_steps()?;
    println!("producers: {}", producers.keys().join(", "));
    println!("steps:     {}", steps.keys().join(", "));
    Ok(())
}
