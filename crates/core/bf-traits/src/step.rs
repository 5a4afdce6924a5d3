//! Compute step trait for batch consumers.

use bf_error::Result;
use bf_types::Batch;

/// Output of one compute step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepOutput {
    /// Scalar produced by the step (a loss, a checksum)
    pub value: f64,

    /// Number of elements the step read
    pub elements: usize,
}

/// Consumes one ready batch per call.
///
/// Stands in for the forward/backward pass of a compute graph. The batch is
/// borrowed for the duration of the call only; it is recycled into the
/// prefetch pool on the next advance.
pub trait ComputeStep: Send {
    /// Returns the name of this step for logging.
    fn name(&self) -> &str {
        "step"
    }

    /// Runs the step over `batch`.
    fn step(&mut self, batch: &Batch) -> Result<StepOutput>;
}

impl<S: ComputeStep + ?Sized> ComputeStep for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn step(&mut self, batch: &Batch) -> Result<StepOutput> {
        (**self).step(batch)
    }
}
