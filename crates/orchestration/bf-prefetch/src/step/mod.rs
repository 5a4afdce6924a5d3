//! Built-in compute steps.
//!
//! Steps stand in for the model update that consumes a batch. They read the
//! device view when the batch was staged to an accelerator and the host view
//! otherwise.

use bf_error::{BfError, Result};
use bf_registry::Registry;
use bf_traits::{ComputeStep, StepOutput};
use bf_types::{Batch, Blob};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Registry of step constructors keyed by type name.
pub type StepRegistry = Registry<Box<dyn ComputeStep>, StepConfig>;

/// Configuration shared by the built-in steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Registered step type (default: "checksum").
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Simulated compute latency per step, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_kind() -> String {
    "checksum".to_string()
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            delay_ms: 0,
        }
    }
}

impl StepConfig {
    /// Set the step type.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Set the simulated latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }
}

/// Contents of `blob` as the consumer should read them.
fn visible(blob: &Blob) -> &[f32] {
    blob.device_view().unwrap_or_else(|| blob.host())
}

/// Sums every data element.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChecksumStep;

impl ChecksumStep {
    /// Checksum of one batch.
    pub fn checksum(batch: &Batch) -> StepOutput {
        let data = visible(batch.data());
        StepOutput {
            value: data.iter().map(|v| f64::from(*v)).sum(),
            elements: data.len(),
        }
    }
}

impl ComputeStep for ChecksumStep {
    fn name(&self) -> &str {
        "checksum"
    }

    fn step(&mut self, batch: &Batch) -> Result<StepOutput> {
        Ok(Self::checksum(batch))
    }
}

/// Sleeps for a fixed time, then computes the checksum.
#[derive(Debug, Clone, Copy)]
pub struct SleepStep {
    delay: Duration,
}

impl SleepStep {
    /// Create a step that takes at least `delay`.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ComputeStep for SleepStep {
    fn name(&self) -> &str {
        "sleep"
    }

    fn step(&mut self, batch: &Batch) -> Result<StepOutput> {
        std::thread::sleep(self.delay);
        Ok(ChecksumStep::checksum(batch))
    }
}

/// Registry with every built-in step.
pub fn builtin_steps() -> Result<StepRegistry> {
    let mut registry = StepRegistry::new("step");
    registry.register("checksum", |_: &StepConfig| {
        Ok(Box::new(ChecksumStep) as Box<dyn ComputeStep>)
    })?;
    registry.register("sleep", |config: &StepConfig| {
        if config.delay_ms == 0 {
            return Err(BfError::config("sleep step requires a non-zero delay_ms"));
        }
        Ok(Box::new(SleepStep::new(Duration::from_millis(config.delay_ms))) as Box<dyn ComputeStep>)
    })?;
    Ok(registry)
}
