//! Batch producer trait.

use bf_error::Result;
use bf_types::Batch;

/// Fills pooled batches with training data.
///
/// Implementations read, decode and augment one batch worth of records per
/// call. The prefetch worker owns the producer and calls it from its own
/// thread, so implementations need `Send` but not `Sync`.
///
/// # Contract
///
/// [`fill`](BatchProducer::fill) must either fully populate (and reshape)
/// the batch's buffers or return an error. The batch is not visible to any
/// other thread until `fill` returns, so partial writes are never observed.
/// Errors are fatal to the pipeline; retrying is the producer's own business.
pub trait BatchProducer: Send {
    /// Returns the name of this producer for logging.
    fn name(&self) -> &str {
        "producer"
    }

    /// Whether batches carry a label buffer.
    fn output_labels(&self) -> bool {
        false
    }

    /// Shapes a pooled batch before the pipeline starts.
    ///
    /// Called once per pooled batch from the setup thread, before buffers are
    /// warmed up, so the warm-up allocates the sizes the first fills need.
    fn prepare(&mut self, _batch: &mut Batch) -> Result<()> {
        Ok(())
    }

    /// Fills `batch` in place.
    ///
    /// # Arguments
    ///
    /// * `batch` - Batch exclusively owned by the caller; its shape may change
    ///
    /// # Returns
    ///
    /// `Ok(())` once the host buffers hold a complete batch
    fn fill(&mut self, batch: &mut Batch) -> Result<()>;
}

impl<P: BatchProducer + ?Sized> BatchProducer for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn output_labels(&self) -> bool {
        (**self).output_labels()
    }

    fn prepare(&mut self, batch: &mut Batch) -> Result<()> {
        (**self).prepare(batch)
    }

    fn fill(&mut self, batch: &mut Batch) -> Result<()> {
        (**self).fill(batch)
    }
}
