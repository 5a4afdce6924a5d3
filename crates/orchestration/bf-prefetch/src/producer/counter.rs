//! Producer whose output follows the fill counter.

use super::ProducerConfig;
use bf_error::{ProducerError, Result};
use bf_traits::BatchProducer;
use bf_types::Batch;

/// Fills the batch with sequence `n` as `[n, C, H, W]` with every element
/// equal to `n`, and `n` labels equal to `n`.
///
/// The batch dimension changes on every fill, which exercises reshape on
/// pooled buffers.
#[derive(Debug, Clone)]
pub struct CounterProducer {
    config: ProducerConfig,
    fills: u64,
}

impl CounterProducer {
    /// Create a producer from its configuration. Only the record shape,
    /// labels, delay and fail-after settings are used.
    pub fn new(config: &ProducerConfig) -> Self {
        Self {
            config: config.clone(),
            fills: 0,
        }
    }

    /// Shape of the batch with `sequence`.
    pub fn shape_for(&self, sequence: u64) -> [usize; 4] {
        [
            sequence.max(1) as usize,
            self.config.channels,
            self.config.height,
            self.config.width,
        ]
    }
}

impl BatchProducer for CounterProducer {
    fn name(&self) -> &str {
        "counter"
    }

    fn output_labels(&self) -> bool {
        self.config.labels
    }

    fn prepare(&mut self, batch: &mut Batch) -> Result<()> {
        let shape = self.shape_for(1);
        let (data, label) = batch.buffers_mut();
        data.try_reshape(&shape)?;
        if let Some(label) = label {
            label.try_reshape(&[1])?;
        }
        Ok(())
    }

    fn fill(&mut self, batch: &mut Batch) -> Result<()> {
        if let Some(limit) = self.config.fail_after {
            if self.fills >= limit {
                return Err(ProducerError::Failed(format!(
                    "counter producer failed on fill {}",
                    self.fills + 1
                ))
                .into());
            }
        }

        let delay = self.config.fill_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let sequence = batch.sequence();
        let shape = self.shape_for(sequence);
        let (data, label) = batch.buffers_mut();
        data.try_reshape(&shape)?;
        data.ensure_host_resident().fill(sequence as f32);
        if let Some(label) = label {
            label.try_reshape(&[shape[0]])?;
            label.ensure_host_resident().fill(sequence as f32);
        }

        self.fills += 1;
        Ok(())
    }
}
