//! Built-in batch producers.
//!
//! - [`SyntheticProducer`] (`synthetic`) - Deterministic pattern data for
//!   benchmarks and fault drills
//! - [`CounterProducer`] (`counter`) - Every element and the batch dimension
//!   follow the fill counter

mod counter;
mod synthetic;

pub use counter::CounterProducer;
pub use synthetic::SyntheticProducer;

use bf_error::{BfError, Result};
use bf_registry::Registry;
use bf_traits::BatchProducer;
use bf_types::Blob;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Registry of producer constructors keyed by type name.
pub type ProducerRegistry = Registry<Box<dyn BatchProducer>, ProducerConfig>;

/// Configuration shared by the built-in producers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Registered producer type (default: "synthetic").
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Records per batch (default: 32).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Channels per record (default: 3).
    #[serde(default = "default_channels")]
    pub channels: usize,

    /// Record height (default: 32).
    #[serde(default = "default_extent")]
    pub height: usize,

    /// Record width (default: 32).
    #[serde(default = "default_extent")]
    pub width: usize,

    /// Emit a label per record.
    #[serde(default)]
    pub labels: bool,

    /// Simulated decode latency per batch, in milliseconds.
    #[serde(default)]
    pub fill_delay_ms: u64,

    /// Fail every fill after this many successful ones.
    #[serde(default)]
    pub fail_after: Option<u64>,

    /// Seed for the synthetic pattern.
    #[serde(default)]
    pub seed: u64,
}

fn default_kind() -> String {
    "synthetic".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_channels() -> usize {
    3
}

fn default_extent() -> usize {
    32
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            batch_size: default_batch_size(),
            channels: default_channels(),
            height: default_extent(),
            width: default_extent(),
            labels: false,
            fill_delay_ms: 0,
            fail_after: None,
            seed: 0,
        }
    }
}

impl ProducerConfig {
    /// Set the producer type.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set channels, height and width of each record.
    pub fn with_shape(mut self, channels: usize, height: usize, width: usize) -> Self {
        self.channels = channels;
        self.height = height;
        self.width = width;
        self
    }

    /// Enable or disable labels.
    pub fn with_labels(mut self, labels: bool) -> Self {
        self.labels = labels;
        self
    }

    /// Set the simulated per-batch latency.
    pub fn with_fill_delay(mut self, delay: Duration) -> Self {
        self.fill_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Fail after `fills` successful fills.
    pub fn with_fail_after(mut self, fills: u64) -> Self {
        self.fail_after = Some(fills);
        self
    }

    /// Set the pattern seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Per-batch latency.
    pub fn fill_delay(&self) -> Duration {
        Duration::from_millis(self.fill_delay_ms)
    }

    /// `[batch, channels, height, width]`.
    pub fn data_shape(&self) -> [usize; 4] {
        [self.batch_size, self.channels, self.height, self.width]
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_empty() {
            return Err(BfError::config("producer kind must not be empty"));
        }
        if self.data_shape().contains(&0) {
            return Err(BfError::config(format!(
                "producer shape must be non-zero, got {:?}",
                self.data_shape()
            )));
        }
        let bytes = Blob::element_count(&self.data_shape())
            .and_then(|count| count.checked_mul(std::mem::size_of::<f32>()));
        if bytes.is_none() {
            return Err(BfError::config(format!(
                "producer shape {:?} is too large",
                self.data_shape()
            )));
        }
        Ok(())
    }
}

/// Registry with every built-in producer.
pub fn builtin_producers() -> Result<ProducerRegistry> {
    let mut registry = ProducerRegistry::new("producer");
    registry.register("synthetic", |config: &ProducerConfig| {
        config.validate()?;
        Ok(Box::new(SyntheticProducer::new(config)) as Box<dyn BatchProducer>)
    })?;
    registry.register("counter", |config: &ProducerConfig| {
        config.validate()?;
        Ok(Box::new(CounterProducer::new(config)) as Box<dyn BatchProducer>)
    })?;
    Ok(registry)
}
