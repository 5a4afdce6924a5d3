//! Prefetching stage: the consumer side of a prefetch pipeline.

use crate::config::PrefetchConfig;
use crate::lifecycle::WorkerState;
use crate::queue::QueueClosed;
use crate::staging::Staging;
use crate::stats::{PrefetchStats, StatsSnapshot};
use crate::worker::{self, Shared, WorkerFailure, WorkerSummary};
use bf_error::{BfError, Result};
use bf_traits::BatchProducer;
use bf_types::Batch;
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Where the pooled batches are at one instant.
///
/// `free + ready + in_use + filling == pool_size`. The free and ready counts
/// are read one after the other, so a census taken while the worker is
/// moving a batch can attribute it to `filling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolCensus {
    pub pool_size: usize,
    /// Waiting on the free-list
    pub free: usize,
    /// Published and not yet claimed
    pub ready: usize,
    /// Held by the consumer
    pub in_use: usize,
    /// Owned by the worker
    pub filling: usize,
}

/// Double-buffered batch source.
///
/// Owns a fixed pool of batches and one worker thread that keeps filling
/// them in the background. Each [`advance`](PrefetchingStage::advance)
/// recycles the batch the consumer held and claims the next ready one, so
/// while a compute step reads one batch the worker is already filling the
/// next.
///
/// # Example
///
/// ```
/// use bf_prefetch::{HostStaging, PrefetchConfig, PrefetchingStage};
/// use bf_prefetch::producer::{CounterProducer, ProducerConfig};
///
/// let producer = CounterProducer::new(&ProducerConfig::default().with_shape(1, 1, 1));
/// let mut stage = PrefetchingStage::new(
///     PrefetchConfig::new().with_pool_size(3),
///     Box::new(producer),
///     Box::new(HostStaging),
/// )
/// .unwrap();
///
/// stage.start().unwrap();
/// let batch = stage.advance().unwrap();
/// assert_eq!(batch.sequence(), 1);
/// stage.stop().unwrap();
/// ```
pub struct PrefetchingStage {
    config: PrefetchConfig,

    /// Queues, lifecycle, stats and failure shared with the worker.
    shared: Arc<Shared>,

    /// Producer and staging strategy, until `start` hands them to the worker.
    pending: Option<(Box<dyn BatchProducer>, Box<dyn Staging>)>,

    /// Worker thread, while running.
    handle: Option<JoinHandle<Result<WorkerSummary>>>,

    /// Batch claimed by the last successful `advance`.
    current: Option<Box<Batch>>,

    /// Set once `stop` has been called.
    stopped: bool,
}

impl PrefetchingStage {
    /// Build a stage and its batch pool. Does not start the worker.
    ///
    /// Batches carry a label buffer when the producer emits labels.
    pub fn new(
        config: PrefetchConfig,
        producer: Box<dyn BatchProducer>,
        staging: Box<dyn Staging>,
    ) -> Result<Self> {
        config.validate().map_err(BfError::Config)?;
        if staging.mode() != config.execution_mode {
            return Err(BfError::config(format!(
                "staging strategy runs in {} mode but the pipeline is configured for {}",
                staging.mode(),
                config.execution_mode
            )));
        }

        let output_labels = producer.output_labels();
        let shared = Arc::new(Shared::new(config.name.clone(), config.pool_size));
        for _ in 0..config.pool_size {
            shared.free.push(Box::new(Batch::new(output_labels)));
        }

        debug!(
            pipeline = %config.name,
            pool_size = config.pool_size,
            labels = output_labels,
            producer = producer.name(),
            "Built prefetch pool"
        );

        Ok(Self {
            config,
            shared,
            pending: Some((producer, staging)),
            handle: None,
            current: None,
            stopped: false,
        })
    }

    /// Warm up every pooled batch on the calling thread, then start the worker.
    ///
    /// Fails if the stage was already started or stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.stopped {
            return Err(BfError::config("prefetching stage was stopped"));
        }
        let (mut producer, staging) = self
            .pending
            .take()
            .ok_or_else(|| BfError::config("prefetching stage already started"))?;

        info!(
            pipeline = %self.config.name,
            pool_size = self.config.pool_size,
            mode = %self.config.execution_mode,
            "Initializing prefetch"
        );

        let mut warmed = Vec::with_capacity(self.config.pool_size);
        let mut warm_up = || -> Result<()> {
            while let Some(mut batch) = self.shared.free.try_pop() {
                let result = producer
                    .prepare(&mut batch)
                    .and_then(|()| staging.warm_up(&mut batch));
                warmed.push(batch);
                result?;
            }
            Ok(())
        };
        let warm_up_result = warm_up();
        for batch in warmed {
            self.shared.free.push(batch);
        }
        if let Err(e) = warm_up_result {
            self.pending = Some((producer, staging));
            return Err(e);
        }

        self.shared.lifecycle.start()?;
        match worker::spawn(Arc::clone(&self.shared), producer, staging) {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                self.shared.lifecycle.mark_stopped();
                return Err(e);
            }
        }

        info!(pipeline = %self.config.name, "Prefetch initialized");
        Ok(())
    }

    /// Recycle the current batch and claim the next ready one.
    ///
    /// Blocks while the worker is behind, bounded by the configured wait
    /// timeout if there is one. Once the worker has failed, batches it
    /// already published are still handed out; after that every call
    /// returns [`BfError::WorkerFailed`]. After [`stop`](Self::stop) every
    /// call returns [`BfError::Cancelled`].
    pub fn advance(&mut self) -> Result<&Batch> {
        if self.stopped {
            return Err(BfError::Cancelled);
        }
        if self.pending.is_some() {
            return Err(BfError::config("prefetching stage not started"));
        }

        if let Some(previous) = self.current.take() {
            trace!(
                pipeline = %self.config.name,
                sequence = previous.sequence(),
                "Recycling batch"
            );
            self.shared.free.push(previous);
        }

        let batch = match self.shared.ready.try_pop() {
            Some(batch) => batch,
            None => self.wait_for_ready()?,
        };

        self.shared.stats.record_consumed();
        trace!(
            pipeline = %self.config.name,
            sequence = batch.sequence(),
            "Claimed batch"
        );
        Ok(&**self.current.insert(batch))
    }

    fn wait_for_ready(&self) -> Result<Box<Batch>> {
        if self.shared.ready.is_closed() {
            return self.shared.ready.try_pop().ok_or_else(|| self.closed_error());
        }

        debug!(pipeline = %self.config.name, "Waiting for data");
        let started = Instant::now();
        let popped = match self.config.wait_timeout {
            Some(timeout) => self
                .shared
                .ready
                .pop_timeout(timeout)
                .map(|batch| batch.ok_or(BfError::Timeout(timeout))),
            None => self.shared.ready.pop().map(Ok),
        };
        self.shared.stats.record_consumer_wait(started.elapsed());

        match popped {
            Ok(batch) => batch,
            Err(QueueClosed(_)) => Err(self.closed_error()),
        }
    }

    fn closed_error(&self) -> BfError {
        match self.shared.failure() {
            Some(failure) => failure.to_error(),
            None => BfError::Cancelled,
        }
    }

    /// Batch claimed by the last successful [`advance`](Self::advance).
    pub fn current(&self) -> Option<&Batch> {
        self.current.as_deref()
    }

    /// Worker lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.shared.lifecycle.state()
    }

    /// Whether the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Live counters, for reporting from another thread.
    pub fn stats_handle(&self) -> Arc<PrefetchStats> {
        Arc::clone(&self.shared.stats)
    }

    /// Fatal worker failure, if one was recorded.
    pub fn failure(&self) -> Option<WorkerFailure> {
        self.shared.failure()
    }

    /// Count where the pooled batches currently are.
    pub fn census(&self) -> PoolCensus {
        let pool_size = self.config.pool_size;
        let free = self.shared.free.len();
        let ready = self.shared.ready.len();
        let in_use = usize::from(self.current.is_some());
        PoolCensus {
            pool_size,
            free,
            ready,
            in_use,
            filling: pool_size.saturating_sub(free + ready + in_use),
        }
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Wakes a worker blocked on the free-list, waits at most the configured
    /// shutdown timeout and joins the thread. Returns the worker's own
    /// result: its summary, or the original error that stopped it. A worker
    /// that does not stop in time is left detached and
    /// [`BfError::ShutdownTimeout`] is returned.
    pub fn stop(&mut self) -> Result<WorkerSummary> {
        self.stopped = true;
        self.pending = None;

        let previous = self.shared.lifecycle.request_stop();
        let Some(handle) = self.handle.take() else {
            self.shared.free.close();
            self.shared.ready.close();
            return Ok(WorkerSummary::default());
        };

        info!(pipeline = %self.config.name, state = %previous, "Stopping prefetch worker");
        self.shared.free.close();

        let timeout = self.config.shutdown_timeout;
        if !self.shared.lifecycle.wait_stopped(timeout) {
            warn!(
                pipeline = %self.config.name,
                timeout_secs = timeout.as_secs(),
                "Prefetch worker did not stop in time, detaching"
            );
            self.shared.ready.close();
            return Err(BfError::ShutdownTimeout(timeout));
        }

        let result = handle.join().map_err(|_| BfError::WorkerPanicked)?;
        self.shared.ready.close();

        match &result {
            Ok(summary) => info!(
                pipeline = %self.config.name,
                produced = summary.batches_produced,
                consumed = self.shared.stats.batches_consumed(),
                "Prefetch worker stopped"
            ),
            Err(e) => debug!(
                pipeline = %self.config.name,
                error = %e,
                "Prefetch worker stopped with error"
            ),
        }
        result
    }
}

impl Drop for PrefetchingStage {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        if let Err(e) = self.stop() {
            debug!(pipeline = %self.config.name, error = %e, "Prefetch worker error during drop");
        }
    }
}

impl std::fmt::Debug for PrefetchingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchingStage")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("census", &self.census())
            .finish()
    }
}
