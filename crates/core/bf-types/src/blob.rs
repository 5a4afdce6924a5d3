//! Resizable host buffer with an optional device mirror.

use crate::device::{Device, DeviceBuffer, TransferStream};
use bf_error::{ProducerError, Result, TransferError};
use tracing::trace;

/// Where the authoritative copy of a [`Blob`]'s contents lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Nothing has been allocated yet
    Uninitialized,
    /// Host copy is current; the device mirror (if any) is stale
    AtHost,
    /// Device copy is current; the host copy is stale
    AtDevice,
    /// Host and device copies hold the same contents
    Synced,
}

/// A multi-dimensional `f32` buffer.
///
/// Storage grows to the largest element count ever requested and is never
/// shrunk, so reshaping to an equal or smaller shape does not reallocate.
/// Allocation is lazy: nothing is allocated until the buffer is first
/// touched through [`ensure_host_resident`](Blob::ensure_host_resident),
/// [`ensure_device_resident`](Blob::ensure_device_resident) or
/// [`stage_to_device`](Blob::stage_to_device).
#[derive(Debug, Clone)]
pub struct Blob {
    shape: Vec<usize>,
    count: usize,
    capacity: usize,
    host: Vec<f32>,
    device: Option<DeviceBuffer>,
    residency: Residency,
}

impl Default for Blob {
    fn default() -> Self {
        Self::new()
    }
}

impl Blob {
    /// Creates an empty, unallocated blob.
    pub fn new() -> Self {
        Self {
            shape: Vec::new(),
            count: 0,
            capacity: 0,
            host: Vec::new(),
            device: None,
            residency: Residency::Uninitialized,
        }
    }

    /// Creates an unallocated blob with the given shape.
    pub fn with_shape(shape: &[usize]) -> Self {
        let mut blob = Self::new();
        blob.reshape(shape);
        blob
    }

    /// Number of elements in `shape`, or `None` if it does not fit in `usize`.
    pub fn element_count(shape: &[usize]) -> Option<usize> {
        shape
            .iter()
            .try_fold(1usize, |count, dim| count.checked_mul(*dim))
    }

    /// Changes the logical shape.
    ///
    /// Growing past the current capacity discards the contents of both
    /// copies; otherwise storage and contents are kept.
    ///
    /// # Panics
    ///
    /// Panics if the element count of `shape` overflows `usize`. Use
    /// [`try_reshape`](Blob::try_reshape) for shapes from untrusted input.
    pub fn reshape(&mut self, shape: &[usize]) {
        if let Err(e) = self.try_reshape(shape) {
            panic!("{e}");
        }
    }

    /// Changes the logical shape, refusing shapes whose element count
    /// overflows. The blob is left untouched on error.
    pub fn try_reshape(&mut self, shape: &[usize]) -> Result<()> {
        let count = Self::element_count(shape)
            .filter(|count| count.checked_mul(std::mem::size_of::<f32>()).is_some())
            .ok_or_else(|| ProducerError::Shape(format!("shape {shape:?} overflows the element count")))?;
        self.set_shape(shape, count);
        Ok(())
    }

    fn set_shape(&mut self, shape: &[usize], count: usize) {
        self.shape.clear();
        self.shape.extend_from_slice(shape);
        self.count = count;

        if count > self.capacity {
            trace!(from = self.capacity, to = count, "Growing blob storage");
            self.capacity = count;
            if !self.host.is_empty() {
                self.host.resize(count, 0.0);
                self.residency = Residency::AtHost;
            } else {
                self.residency = Residency::Uninitialized;
            }
            self.device = None;
        }
    }

    /// Reshapes to match another blob.
    pub fn reshape_like(&mut self, other: &Blob) {
        self.reshape(&other.shape);
    }

    /// Logical shape.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements in the logical shape.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of elements storage has been sized for.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current residency.
    #[inline]
    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Whether host storage has been allocated.
    #[inline]
    pub fn is_host_allocated(&self) -> bool {
        self.capacity == 0 || self.host.len() >= self.capacity
    }

    /// Whether a device mirror large enough for the capacity exists.
    #[inline]
    pub fn is_device_allocated(&self) -> bool {
        self.device
            .as_ref()
            .is_some_and(|d| d.len() >= self.capacity)
    }

    /// Host view of the logical contents.
    ///
    /// Empty while the host storage is unallocated. Stale while the blob is
    /// [`Residency::AtDevice`].
    pub fn host(&self) -> &[f32] {
        let len = self.count.min(self.host.len());
        &self.host[..len]
    }

    /// Device view of the logical contents, if the device copy is current.
    pub fn device_view(&self) -> Option<&[f32]> {
        match (self.residency, &self.device) {
            (Residency::AtDevice | Residency::Synced, Some(device)) => {
                Some(&device.as_slice()[..self.count])
            }
            _ => None,
        }
    }

    /// Makes the host copy current and returns it for writing.
    ///
    /// Allocates host storage on first touch and copies back from the device
    /// mirror when the device copy is the current one. Leaves the blob
    /// [`Residency::AtHost`], so the next staging copies again.
    pub fn ensure_host_resident(&mut self) -> &mut [f32] {
        if self.host.len() < self.capacity {
            self.host.resize(self.capacity, 0.0);
        }
        if self.residency == Residency::AtDevice {
            if let Some(device) = &self.device {
                self.host[..self.count].copy_from_slice(&device.as_slice()[..self.count]);
            }
        }
        self.residency = Residency::AtHost;
        &mut self.host[..self.count]
    }

    /// Makes the device copy current and returns it for writing.
    pub fn ensure_device_resident(&mut self, device: &dyn Device) -> Result<&mut [f32]> {
        self.ensure_device_capacity(device)?;
        let mirror = self
            .device
            .as_mut()
            .ok_or_else(|| TransferError::Allocation("device mirror missing".to_string()))?;

        if self.residency == Residency::AtHost {
            mirror.as_mut_slice()[..self.count].copy_from_slice(&self.host[..self.count]);
        }
        self.residency = Residency::AtDevice;
        Ok(&mut mirror.as_mut_slice()[..self.count])
    }

    /// Submits an asynchronous host to device copy on `stream`.
    ///
    /// The device view is only valid once the caller has synchronized the
    /// stream. Requires the host copy to be current.
    pub fn stage_to_device(
        &mut self,
        device: &dyn Device,
        stream: &mut TransferStream,
    ) -> Result<()> {
        match self.residency {
            Residency::Synced => return Ok(()),
            Residency::AtDevice => {
                return Err(TransferError::Copy(
                    "cannot stage a blob whose device copy is current".to_string(),
                )
                .into());
            }
            Residency::Uninitialized => {
                self.ensure_host_resident();
            }
            Residency::AtHost => {}
        }

        self.ensure_device_capacity(device)?;
        let mirror = self
            .device
            .as_mut()
            .ok_or_else(|| TransferError::Allocation("device mirror missing".to_string()))?;
        device.copy_to_device(stream, &self.host[..self.count], mirror)?;
        self.residency = Residency::Synced;
        Ok(())
    }

    /// Size in bytes of the logical contents.
    pub fn size_bytes(&self) -> usize {
        self.count * std::mem::size_of::<f32>()
    }

    fn ensure_device_capacity(&mut self, device: &dyn Device) -> Result<()> {
        if !self.is_device_allocated() {
            self.device = Some(device.allocate(self.capacity)?);
        }
        Ok(())
    }
}
