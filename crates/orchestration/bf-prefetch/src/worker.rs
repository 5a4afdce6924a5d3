//! Prefetch worker thread.
//!
//! The worker takes batches from the free-list, fills them through the
//! producer, stages them and publishes them on the ready-list. It owns the
//! producer and the staging strategy for as long as it runs.

use crate::lifecycle::Lifecycle;
use crate::queue::ExchangeQueue;
use crate::staging::Staging;
use crate::stats::PrefetchStats;
use bf_error::{BfError, FailureStage, Result};
use bf_traits::BatchProducer;
use bf_types::Batch;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, trace};

/// Fatal worker failure, recorded once and reported to every later consumer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    /// Stage the worker failed in
    pub stage: FailureStage,
    /// Rendered message of the original error
    pub message: String,
}

impl WorkerFailure {
    /// Error returned to the consumer for this failure.
    pub fn to_error(&self) -> BfError {
        BfError::WorkerFailed {
            stage: self.stage,
            message: self.message.clone(),
        }
    }
}

/// Totals reported by a worker when it exits cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Batches published to the ready-list
    pub batches_produced: u64,
    /// Batches filled after a stop request and returned to the free-list
    pub batches_discarded: u64,
}

/// State shared between a prefetching stage and its worker.
#[derive(Debug)]
pub(crate) struct Shared {
    /// Pipeline name for logging
    pub(crate) name: String,

    /// Batches waiting to be filled
    pub(crate) free: ExchangeQueue<Box<Batch>>,

    /// Filled batches waiting for the consumer
    pub(crate) ready: ExchangeQueue<Box<Batch>>,

    pub(crate) lifecycle: Lifecycle,

    pub(crate) stats: Arc<PrefetchStats>,

    /// First fatal failure, if any
    failure: Mutex<Option<WorkerFailure>>,
}

impl Shared {
    pub(crate) fn new(name: impl Into<String>, pool_size: usize) -> Self {
        Self {
            name: name.into(),
            free: ExchangeQueue::with_capacity("free", pool_size),
            ready: ExchangeQueue::with_capacity("ready", pool_size),
            lifecycle: Lifecycle::new(),
            stats: Arc::new(PrefetchStats::new()),
            failure: Mutex::new(None),
        }
    }

    /// Record a fatal failure. Only the first one is kept.
    pub(crate) fn record_failure(&self, stage: FailureStage, message: impl Into<String>) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(WorkerFailure {
                stage,
                message: message.into(),
            });
        }
    }

    pub(crate) fn failure(&self) -> Option<WorkerFailure> {
        self.failure.lock().clone()
    }
}

/// Spawn the worker thread for `shared`.
///
/// The lifecycle must already be `Running`.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    producer: Box<dyn BatchProducer>,
    staging: Box<dyn Staging>,
) -> Result<JoinHandle<Result<WorkerSummary>>> {
    let thread_name = format!("bf-prefetch-{}", shared.name);
    let worker = PrefetchWorker {
        shared,
        producer,
        staging,
        sequence: 0,
        stage: FailureStage::Produce,
        in_flight: None,
        summary: WorkerSummary::default(),
    };

    thread::Builder::new()
        .name(thread_name)
        .spawn(move || ExitGuard(worker).run())
        .map_err(|e| BfError::Other(anyhow::Error::new(e).context("failed to spawn prefetch worker")))
}

struct PrefetchWorker {
    shared: Arc<Shared>,
    producer: Box<dyn BatchProducer>,
    staging: Box<dyn Staging>,

    /// Sequence number of the last filled batch
    sequence: u64,

    /// Stage the worker is currently in
    stage: FailureStage,

    /// Batch taken from the free-list and not yet published
    in_flight: Option<Box<Batch>>,

    summary: WorkerSummary,
}

/// Owns the worker for the life of its thread.
///
/// On every exit path, a panic included, it hands the in-flight batch back
/// to the free-list before marking the worker stopped.
struct ExitGuard(PrefetchWorker);

impl ExitGuard {
    fn run(mut self) -> Result<WorkerSummary> {
        self.0.run()
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let worker = &mut self.0;
        if thread::panicking() {
            error!(
                pipeline = %worker.shared.name,
                stage = %worker.stage,
                sequence = worker.sequence,
                "Prefetch worker panicked"
            );
            worker
                .shared
                .record_failure(worker.stage, "prefetch worker panicked");
        }
        if let Some(batch) = worker.in_flight.take() {
            worker.shared.free.push(batch);
        }
        worker.shared.ready.close();
        worker.shared.lifecycle.mark_stopped();
    }
}

impl PrefetchWorker {
    fn run(&mut self) -> Result<WorkerSummary> {
        info!(
            pipeline = %self.shared.name,
            producer = self.producer.name(),
            mode = %self.staging.mode(),
            "Prefetch worker started"
        );

        let result = self.fill_loop();
        let failed_stage = self.stage;
        self.stage = FailureStage::Shutdown;
        self.staging.release();

        match result {
            Ok(()) => {
                info!(
                    pipeline = %self.shared.name,
                    produced = self.summary.batches_produced,
                    discarded = self.summary.batches_discarded,
                    "Prefetch worker stopped"
                );
                Ok(self.summary)
            }
            Err(e) => {
                error!(
                    pipeline = %self.shared.name,
                    stage = %failed_stage,
                    sequence = self.sequence,
                    error = %e,
                    "Prefetch worker failed"
                );
                // Recorded before the guard closes the ready-list, so the
                // consumer never sees closure without the failure.
                self.shared.record_failure(failed_stage, e.to_string());
                Err(e)
            }
        }
    }

    fn fill_loop(&mut self) -> Result<()> {
        while !self.shared.lifecycle.must_stop() {
            let Some(batch) = self.next_free() else {
                debug!(pipeline = %self.shared.name, "Free list closed, prefetch worker exiting");
                break;
            };
            let batch = self.in_flight.insert(batch);

            self.sequence += 1;
            batch.set_sequence(self.sequence);

            self.stage = FailureStage::Produce;
            let fill_started = Instant::now();
            self.producer.fill(batch)?;
            let fill_time = fill_started.elapsed();

            self.stage = FailureStage::Transfer;
            let stage_started = Instant::now();
            self.staging.stage(batch)?;
            let stage_time = stage_started.elapsed();

            let bytes = batch.size_bytes() as u64;
            let Some(batch) = self.in_flight.take() else {
                break;
            };

            if self.shared.lifecycle.must_stop() {
                debug!(
                    pipeline = %self.shared.name,
                    sequence = self.sequence,
                    "Discarding batch filled after stop request"
                );
                self.summary.batches_discarded += 1;
                self.shared.free.push(batch);
                break;
            }

            self.shared.stats.record_produced(bytes, fill_time, stage_time);
            trace!(
                pipeline = %self.shared.name,
                sequence = self.sequence,
                bytes,
                "Batch ready"
            );
            self.shared.ready.push(batch);
            self.summary.batches_produced += 1;
        }
        Ok(())
    }

    /// Next batch to fill, or `None` once the free-list is closed.
    fn next_free(&self) -> Option<Box<Batch>> {
        if let Some(batch) = self.shared.free.try_pop() {
            return Some(batch);
        }

        self.shared.stats.record_producer_wait();
        trace!(pipeline = %self.shared.name, "Free list empty, waiting for consumer");
        self.shared.free.pop().ok()
    }
}
