//! Common utilities for integration tests.
//!
//! Deterministic producers and devices that record what the pipeline does
//! to them, plus a polling helper for conditions reached asynchronously.

use bf_error::{BfError, Result, TransferError};
use bf_traits::BatchProducer;
use bf_types::{Batch, Device, DeviceBuffer, HostMirrorDevice, TransferStream};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Counters a [`CountingProducer`] shares with the test.
#[derive(Debug, Default)]
pub struct ProducerProbe {
    /// Calls to `fill`, including failed ones
    pub fills: AtomicU64,
    /// Set when the producer is dropped
    pub dropped: AtomicBool,
}

impl ProducerProbe {
    pub fn fills(&self) -> u64 {
        self.fills.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// What a [`CountingProducer`] does on a given fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Return a producer error
    Error,
    /// Panic inside `fill`
    Panic,
}

/// Fills `[len]` elements with the batch sequence number.
#[derive(Debug)]
pub struct CountingProducer {
    probe: Arc<ProducerProbe>,
    len: usize,
    labels: bool,
    delay: Duration,
    fault: Option<(u64, Fault)>,
}

impl CountingProducer {
    pub fn new(len: usize) -> (Self, Arc<ProducerProbe>) {
        let probe = Arc::new(ProducerProbe::default());
        let producer = Self {
            probe: Arc::clone(&probe),
            len,
            labels: false,
            delay: Duration::ZERO,
            fault: None,
        };
        (producer, probe)
    }

    pub fn with_labels(mut self) -> Self {
        self.labels = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the `fill`-th call (1-based) and every call after it.
    pub fn failing_on(mut self, fill: u64, fault: Fault) -> Self {
        self.fault = Some((fill, fault));
        self
    }
}

impl BatchProducer for CountingProducer {
    fn name(&self) -> &str {
        "counting"
    }

    fn output_labels(&self) -> bool {
        self.labels
    }

    fn prepare(&mut self, batch: &mut Batch) -> Result<()> {
        let (data, label) = batch.buffers_mut();
        data.reshape(&[self.len]);
        if let Some(label) = label {
            label.reshape(&[1]);
        }
        Ok(())
    }

    fn fill(&mut self, batch: &mut Batch) -> Result<()> {
        let fill = self.probe.fills.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        match self.fault {
            Some((at, Fault::Error)) if fill >= at => {
                return Err(BfError::producer(format!("record {fill} is corrupt")));
            }
            Some((at, Fault::Panic)) if fill >= at => panic!("decoder bug on fill {fill}"),
            _ => {}
        }

        let value = batch.sequence() as f32;
        self.prepare(batch)?;
        let (data, label) = batch.buffers_mut();
        data.ensure_host_resident().fill(value);
        if let Some(label) = label {
            label.ensure_host_resident()[0] = value;
        }
        Ok(())
    }
}

impl Drop for CountingProducer {
    fn drop(&mut self) {
        self.probe.dropped.store(true, Ordering::SeqCst);
    }
}

/// Device that records which threads touch it and can fail copies.
#[derive(Debug)]
pub struct RecordingDevice {
    inner: HostMirrorDevice,
    allocating_threads: Mutex<Vec<ThreadId>>,
    stream_threads: Mutex<Vec<Option<String>>>,
    copies: AtomicU64,
    destroyed_streams: AtomicU64,
    /// Fail the n-th copy (1-based) and every copy after it
    fail_copy_from: Option<u64>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            inner: HostMirrorDevice::new("recording:0"),
            allocating_threads: Mutex::new(Vec::new()),
            stream_threads: Mutex::new(Vec::new()),
            copies: AtomicU64::new(0),
            destroyed_streams: AtomicU64::new(0),
            fail_copy_from: None,
        }
    }

    pub fn failing_copy_from(mut self, copy: u64) -> Self {
        self.fail_copy_from = Some(copy);
        self
    }

    /// Threads that called `allocate`, one entry per call.
    pub fn allocating_threads(&self) -> Vec<ThreadId> {
        self.allocating_threads.lock().clone()
    }

    /// Names of the threads that created streams.
    pub fn stream_threads(&self) -> Vec<Option<String>> {
        self.stream_threads.lock().clone()
    }

    pub fn destroyed_streams(&self) -> u64 {
        self.destroyed_streams.load(Ordering::SeqCst)
    }
}

impl Device for RecordingDevice {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn allocate(&self, len: usize) -> Result<DeviceBuffer> {
        self.allocating_threads.lock().push(thread::current().id());
        self.inner.allocate(len)
    }

    fn create_stream(&self) -> Result<TransferStream> {
        self.stream_threads
            .lock()
            .push(thread::current().name().map(str::to_string));
        self.inner.create_stream()
    }

    fn copy_to_device(
        &self,
        stream: &mut TransferStream,
        src: &[f32],
        dst: &mut DeviceBuffer,
    ) -> Result<()> {
        let copy = self.copies.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_copy_from.is_some_and(|from| copy >= from) {
            return Err(TransferError::Copy(format!("device lost during copy {copy}")).into());
        }
        self.inner.copy_to_device(stream, src, dst)
    }

    fn synchronize(&self, stream: &mut TransferStream) -> Result<()> {
        self.inner.synchronize(stream)
    }

    fn destroy_stream(&self, stream: TransferStream) {
        self.destroyed_streams.fetch_add(1, Ordering::SeqCst);
        self.inner.destroy_stream(stream);
    }
}
