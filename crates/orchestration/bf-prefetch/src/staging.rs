//! Staging strategies applied to filled batches before publication.

use crate::config::ExecutionMode;
use bf_error::{BfError, Result};
use bf_types::{Batch, Blob, Device, TransferStream};
use std::sync::Arc;
use tracing::debug;

/// Moves a filled batch to where the consumer reads it.
///
/// A strategy is owned by the prefetch worker once the pipeline starts.
/// [`warm_up`](Staging::warm_up) runs earlier, on the setup thread, for every
/// pooled batch.
pub trait Staging: Send {
    /// Execution mode this strategy implements.
    fn mode(&self) -> ExecutionMode;

    /// Allocate every buffer a batch needs before any fill happens.
    fn warm_up(&self, batch: &mut Batch) -> Result<()>;

    /// Make a freshly filled batch visible where the consumer reads it.
    ///
    /// Must not return before the batch is fully staged.
    fn stage(&mut self, batch: &mut Batch) -> Result<()>;

    /// Release per-worker resources. Called once when the worker exits.
    fn release(&mut self) {}
}

/// Host-only staging: batches are consumed from host memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostStaging;

impl Staging for HostStaging {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Host
    }

    fn warm_up(&self, batch: &mut Batch) -> Result<()> {
        let (data, label) = batch.buffers_mut();
        data.ensure_host_resident();
        if let Some(label) = label {
            label.ensure_host_resident();
        }
        Ok(())
    }

    fn stage(&mut self, _batch: &mut Batch) -> Result<()> {
        Ok(())
    }
}

/// Host plus accelerator staging.
///
/// Copies data and labels on a non-blocking stream owned by the worker, then
/// synchronizes that stream, so a published batch is already resident on the
/// device.
#[derive(Debug)]
pub struct DeviceStaging {
    device: Arc<dyn Device>,

    /// Created lazily on the worker thread by the first `stage`.
    stream: Option<TransferStream>,
}

impl DeviceStaging {
    /// Create a staging strategy for `device`.
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            stream: None,
        }
    }

    /// Device batches are staged to.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Id of the worker's transfer stream, once created.
    pub fn stream_id(&self) -> Option<u64> {
        self.stream.as_ref().map(TransferStream::id)
    }
}

impl Staging for DeviceStaging {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Accelerator
    }

    fn warm_up(&self, batch: &mut Batch) -> Result<()> {
        let device = self.device.as_ref();
        let (data, label) = batch.buffers_mut();
        data.ensure_host_resident();
        data.ensure_device_resident(device)?;
        if let Some(label) = label {
            label.ensure_host_resident();
            label.ensure_device_resident(device)?;
        }
        Ok(())
    }

    fn stage(&mut self, batch: &mut Batch) -> Result<()> {
        // The stream stays in `self.stream` while in use, so `Drop` still
        // destroys it if staging unwinds.
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                let stream = self.device.create_stream()?;
                debug!(
                    device = self.device.name(),
                    stream = stream.id(),
                    "Created transfer stream"
                );
                self.stream.insert(stream)
            }
        };

        stage_batch(self.device.as_ref(), stream, batch)
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!(
                device = self.device.name(),
                stream = stream.id(),
                "Destroying transfer stream"
            );
            self.device.destroy_stream(stream);
        }
    }
}

impl Drop for DeviceStaging {
    fn drop(&mut self) {
        self.release();
    }
}

fn stage_batch(device: &dyn Device, stream: &mut TransferStream, batch: &mut Batch) -> Result<()> {
    let (data, label) = batch.buffers_mut();
    stage_blob(device, stream, data)?;
    if let Some(label) = label {
        stage_blob(device, stream, label)?;
    }
    device.synchronize(stream)
}

fn stage_blob(device: &dyn Device, stream: &mut TransferStream, blob: &mut Blob) -> Result<()> {
    // Producers that wrote through the device view leave nothing to copy.
    if blob.residency() == bf_types::Residency::AtDevice {
        return Ok(());
    }
    blob.stage_to_device(device, stream)
}

/// Build the staging strategy for `mode`.
///
/// Accelerator mode needs a device.
pub fn staging_for(mode: ExecutionMode, device: Option<Arc<dyn Device>>) -> Result<Box<dyn Staging>> {
    match (mode, device) {
        (ExecutionMode::Host, _) => Ok(Box::new(HostStaging)),
        (ExecutionMode::Accelerator, Some(device)) => Ok(Box::new(DeviceStaging::new(device))),
        (ExecutionMode::Accelerator, None) => Err(BfError::config(
            "accelerator execution mode requires a device",
        )),
    }
}
