//! Statistics for prefetch pipelines.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size on most modern CPUs (64 bytes).
const CACHE_LINE_SIZE: usize = 64;

/// A cache-line-padded atomic counter to prevent false sharing.
///
/// The worker and the consumer update disjoint counters concurrently; each
/// counter gets its own cache line so those updates do not contend.
#[repr(C, align(64))]
#[derive(Debug)]
struct PaddedAtomicU64 {
    value: AtomicU64,
    _padding: [u8; CACHE_LINE_SIZE - std::mem::size_of::<AtomicU64>()],
}

impl Default for PaddedAtomicU64 {
    fn default() -> Self {
        Self {
            value: AtomicU64::new(0),
            _padding: [0; CACHE_LINE_SIZE - std::mem::size_of::<AtomicU64>()],
        }
    }
}

impl PaddedAtomicU64 {
    #[inline]
    fn load(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }
}

/// Counters shared by the prefetch worker and the consumer.
#[derive(Debug, Default)]
pub struct PrefetchStats {
    /// When the pipeline was built
    started_at: Option<DateTime<Utc>>,

    /// When the first batch was published
    first_batch_at: Mutex<Option<DateTime<Utc>>>,

    // Worker-side counters
    /// Batches filled and published to the ready-list
    batches_produced: PaddedAtomicU64,

    /// Bytes of batch contents published
    bytes_produced: PaddedAtomicU64,

    /// Times the worker found the free-list empty
    producer_waits: PaddedAtomicU64,

    /// Time spent in the producer, in microseconds
    fill_time_us: PaddedAtomicU64,

    /// Time spent staging, in microseconds
    stage_time_us: PaddedAtomicU64,

    // Consumer-side counters
    /// Batches claimed by the consumer
    batches_consumed: PaddedAtomicU64,

    /// Times the consumer found the ready-list empty
    consumer_waits: PaddedAtomicU64,

    /// Time the consumer spent blocked, in microseconds
    consumer_wait_us: PaddedAtomicU64,
}

impl PrefetchStats {
    /// Create a new stats tracker with the current time as start time.
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Record a published batch.
    pub fn record_produced(&self, bytes: u64, fill: std::time::Duration, stage: std::time::Duration) {
        {
            let mut first = self.first_batch_at.lock();
            if first.is_none() {
                *first = Some(Utc::now());
            }
        }

        self.batches_produced.add(1);
        self.bytes_produced.add(bytes);
        self.fill_time_us.add(fill.as_micros() as u64);
        self.stage_time_us.add(stage.as_micros() as u64);
    }

    /// Record the worker blocking on an empty free-list.
    pub fn record_producer_wait(&self) {
        self.producer_waits.add(1);
    }

    /// Record a batch claimed by the consumer.
    pub fn record_consumed(&self) {
        self.batches_consumed.add(1);
    }

    /// Record the consumer blocking on an empty ready-list.
    pub fn record_consumer_wait(&self, waited: std::time::Duration) {
        self.consumer_waits.add(1);
        self.consumer_wait_us.add(waited.as_micros() as u64);
    }

    /// Get the number of batches produced.
    pub fn batches_produced(&self) -> u64 {
        self.batches_produced.load()
    }

    /// Get the number of batches consumed.
    pub fn batches_consumed(&self) -> u64 {
        self.batches_consumed.load()
    }

    /// Get the number of producer waits.
    pub fn producer_waits(&self) -> u64 {
        self.producer_waits.load()
    }

    /// Get the number of consumer waits.
    pub fn consumer_waits(&self) -> u64 {
        self.consumer_waits.load()
    }

    /// Create a snapshot of the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            captured_at: Some(Utc::now()),
            first_batch_at: *self.first_batch_at.lock(),
            batches_produced: self.batches_produced.load(),
            batches_consumed: self.batches_consumed.load(),
            bytes_produced: self.bytes_produced.load(),
            producer_waits: self.producer_waits.load(),
            consumer_waits: self.consumer_waits.load(),
            fill_time_us: self.fill_time_us.load(),
            stage_time_us: self.stage_time_us.load(),
            consumer_wait_us: self.consumer_wait_us.load(),
        }
    }
}

/// A serializable snapshot of prefetch statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub started_at: Option<DateTime<Utc>>,
    pub captured_at: Option<DateTime<Utc>>,
    /// When the first batch was published
    pub first_batch_at: Option<DateTime<Utc>>,
    pub batches_produced: u64,
    pub batches_consumed: u64,
    pub bytes_produced: u64,
    pub producer_waits: u64,
    pub consumer_waits: u64,
    pub fill_time_us: u64,
    pub stage_time_us: u64,
    pub consumer_wait_us: u64,
}

impl StatsSnapshot {
    /// Time from pipeline construction to this snapshot.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.captured_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Time from the first published batch to this snapshot.
    ///
    /// Excludes setup and warm-up.
    pub fn active_duration(&self) -> Option<Duration> {
        match (self.first_batch_at, self.captured_at) {
            (Some(first), Some(end)) => Some(end - first),
            _ => None,
        }
    }

    /// Consumed batches per second over the active duration.
    pub fn batches_per_second(&self) -> Option<f64> {
        self.active_duration().map(|d| {
            let secs = d.num_milliseconds() as f64 / 1000.0;
            if secs > 0.0 {
                self.batches_consumed as f64 / secs
            } else {
                0.0
            }
        })
    }

    /// Mean producer time per batch, in milliseconds.
    pub fn mean_fill_ms(&self) -> Option<f64> {
        (self.batches_produced > 0)
            .then(|| self.fill_time_us as f64 / self.batches_produced as f64 / 1000.0)
    }

    /// Mean staging time per batch, in milliseconds.
    pub fn mean_stage_ms(&self) -> Option<f64> {
        (self.batches_produced > 0)
            .then(|| self.stage_time_us as f64 / self.batches_produced as f64 / 1000.0)
    }

    /// Fraction of claimed batches that were not ready when requested.
    ///
    /// Close to zero when prefetching hides the producer latency.
    pub fn consumer_wait_ratio(&self) -> f64 {
        if self.batches_consumed == 0 {
            0.0
        } else {
            self.consumer_waits as f64 / self.batches_consumed as f64
        }
    }
}
