//! Deterministic synthetic producer.

use super::ProducerConfig;
use bf_error::{ProducerError, Result};
use bf_traits::BatchProducer;
use bf_types::Batch;
use tracing::trace;

/// Period of the generated pattern.
const PATTERN_PERIOD: u64 = 1021;

/// Number of distinct label classes.
const LABEL_CLASSES: u64 = 10;

/// Fills batches with a pattern derived from the seed, the batch sequence and
/// the element index, so any consumer can recompute what it should see.
#[derive(Debug, Clone)]
pub struct SyntheticProducer {
    config: ProducerConfig,
    fills: u64,
}

impl SyntheticProducer {
    /// Create a producer from its configuration.
    pub fn new(config: &ProducerConfig) -> Self {
        Self {
            config: config.clone(),
            fills: 0,
        }
    }

    /// Value of element `index` in the batch with `sequence`.
    pub fn value_at(seed: u64, sequence: u64, index: usize) -> f32 {
        let raw = seed
            .wrapping_add(sequence.wrapping_mul(7919))
            .wrapping_add(index as u64)
            % PATTERN_PERIOD;
        raw as f32 / PATTERN_PERIOD as f32
    }

    /// Label of record `record` in the batch with `sequence`.
    pub fn label_at(seed: u64, sequence: u64, record: usize) -> f32 {
        (seed.wrapping_add(sequence).wrapping_add(record as u64) % LABEL_CLASSES) as f32
    }

    /// Successful fills so far.
    pub fn fills(&self) -> u64 {
        self.fills
    }
}

impl BatchProducer for SyntheticProducer {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn output_labels(&self) -> bool {
        self.config.labels
    }

    fn prepare(&mut self, batch: &mut Batch) -> Result<()> {
        let (data, label) = batch.buffers_mut();
        data.try_reshape(&self.config.data_shape())?;
        if let Some(label) = label {
            label.try_reshape(&[self.config.batch_size])?;
        }
        Ok(())
    }

    fn fill(&mut self, batch: &mut Batch) -> Result<()> {
        if let Some(limit) = self.config.fail_after {
            if self.fills >= limit {
                return Err(ProducerError::Exhausted(format!(
                    "synthetic source exhausted after {} batches",
                    limit
                ))
                .into());
            }
        }

        let delay = self.config.fill_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let seed = self.config.seed;
        let sequence = batch.sequence();
        self.prepare(batch)?;

        let (data, label) = batch.buffers_mut();
        for (i, value) in data.ensure_host_resident().iter_mut().enumerate() {
            *value = Self::value_at(seed, sequence, i);
        }
        if let Some(label) = label {
            for (record, value) in label.ensure_host_resident().iter_mut().enumerate() {
                *value = Self::label_at(seed, sequence, record);
            }
        }

        self.fills += 1;
        trace!(sequence, fills = self.fills, "Synthetic batch filled");
        Ok(())
    }
}
