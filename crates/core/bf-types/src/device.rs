//! Accelerator device abstraction and transfer streams.

use bf_error::{Result, TransferError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Device-resident storage backing a [`Blob`](crate::Blob) mirror.
#[derive(Debug, Default, Clone)]
pub struct DeviceBuffer {
    data: Vec<f32>,
}

impl DeviceBuffer {
    /// Creates a zero-filled buffer of `len` elements.
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    /// Number of elements the buffer can hold.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read access to the device contents.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Write access to the device contents.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// An ordered queue of device operations.
///
/// Streams are owned by exactly one thread. Copies submitted on a stream are
/// only guaranteed complete after [`Device::synchronize`] returns.
#[derive(Debug)]
pub struct TransferStream {
    id: u64,
    non_blocking: bool,
    submitted: u64,
    completed: u64,
}

impl TransferStream {
    /// Create a stream handle. Called by [`Device`] implementations.
    pub fn new(id: u64, non_blocking: bool) -> Self {
        Self {
            id,
            non_blocking,
            submitted: 0,
            completed: 0,
        }
    }

    /// Stream identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the stream does not synchronize with the default stream.
    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking
    }

    /// Total operations submitted on this stream.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Total operations known to be complete.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Operations submitted but not yet synchronized.
    pub fn pending(&self) -> u64 {
        self.submitted - self.completed
    }

    /// Record a newly submitted operation.
    pub fn record_submit(&mut self) {
        self.submitted += 1;
    }

    /// Record that every submitted operation has completed.
    pub fn record_complete_all(&mut self) {
        self.completed = self.submitted;
    }
}

/// Accelerator runtime seam.
///
/// The prefetch core only allocates mirrors, opens one stream per worker,
/// submits host to device copies and waits for their completion.
pub trait Device: Send + Sync + std::fmt::Debug {
    /// Device name for logging.
    fn name(&self) -> &str;

    /// Allocates device memory for `len` elements.
    fn allocate(&self, len: usize) -> Result<DeviceBuffer>;

    /// Creates a non-blocking transfer stream.
    fn create_stream(&self) -> Result<TransferStream>;

    /// Submits an asynchronous copy of `src` into the front of `dst`.
    fn copy_to_device(
        &self,
        stream: &mut TransferStream,
        src: &[f32],
        dst: &mut DeviceBuffer,
    ) -> Result<()>;

    /// Blocks until every operation submitted on `stream` has completed.
    fn synchronize(&self, stream: &mut TransferStream) -> Result<()>;

    /// Releases a stream.
    fn destroy_stream(&self, _stream: TransferStream) {}
}

/// Device whose memory is an ordinary host allocation.
///
/// Used for accelerator mode when no real runtime is linked in; the mirror is
/// a separate allocation, so staging still moves bytes and keeps host and
/// device views independent.
#[derive(Debug)]
pub struct HostMirrorDevice {
    name: String,
    next_stream: AtomicU64,
    allocations: AtomicU64,
    bytes_allocated: AtomicU64,
}

impl Default for HostMirrorDevice {
    fn default() -> Self {
        Self::new("host-mirror:0")
    }
}

impl HostMirrorDevice {
    /// Create a device with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_stream: AtomicU64::new(1),
            allocations: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
        }
    }

    /// Number of device allocations performed so far.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Total bytes allocated so far.
    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated.load(Ordering::Relaxed)
    }
}

impl Device for HostMirrorDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn allocate(&self, len: usize) -> Result<DeviceBuffer> {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated
            .fetch_add((len * std::mem::size_of::<f32>()) as u64, Ordering::Relaxed);
        Ok(DeviceBuffer::zeroed(len))
    }

    fn create_stream(&self) -> Result<TransferStream> {
        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        Ok(TransferStream::new(id, true))
    }

    fn copy_to_device(
        &self,
        stream: &mut TransferStream,
        src: &[f32],
        dst: &mut DeviceBuffer,
    ) -> Result<()> {
        if dst.len() < src.len() {
            return Err(TransferError::Copy(format!(
                "destination holds {} elements, source has {}",
                dst.len(),
                src.len()
            ))
            .into());
        }
        dst.as_mut_slice()[..src.len()].copy_from_slice(src);
        stream.record_submit();
        Ok(())
    }

    fn synchronize(&self, stream: &mut TransferStream) -> Result<()> {
        stream.record_complete_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_counters() {
        let mut stream = TransferStream::new(7, true);
        assert_eq!(stream.id(), 7);
        assert!(stream.is_non_blocking());

        stream.record_submit();
        stream.record_submit();
        assert_eq!(stream.pending(), 2);

        stream.record_complete_all();
        assert_eq!(stream.pending(), 0);
        assert_eq!(stream.completed(), 2);
    }

    #[test]
    fn test_host_mirror_copy_and_sync() {
        let device = HostMirrorDevice::default();
        let mut stream = device.create_stream().unwrap();
        let mut dst = device.allocate(4).unwrap();

        device
            .copy_to_device(&mut stream, &[1.0, 2.0, 3.0], &mut dst)
            .unwrap();
        assert_eq!(stream.pending(), 1);
        device.synchronize(&mut stream).unwrap();

        assert_eq!(stream.pending(), 0);
        assert_eq!(dst.as_slice(), &[1.0, 2.0, 3.0, 0.0]);
        assert_eq!(device.allocations(), 1);
        assert_eq!(device.bytes_allocated(), 16);
    }

    #[test]
    fn test_host_mirror_rejects_short_destination() {
        let device = HostMirrorDevice::default();
        let mut stream = device.create_stream().unwrap();
        let mut dst = device.allocate(1).unwrap();

        let result = device.copy_to_device(&mut stream, &[1.0, 2.0], &mut dst);
        assert!(matches!(
            result,
            Err(bf_error::BfError::Transfer(TransferError::Copy(_)))
        ));
    }

    #[test]
    fn test_streams_get_distinct_ids() {
        let device = HostMirrorDevice::new("mirror:1");
        let a = device.create_stream().unwrap();
        let b = device.create_stream().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(device.name(), "mirror:1");
    }
}
