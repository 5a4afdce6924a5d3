//! Blocking FIFO used to hand pooled batches between threads.

use bf_error::BfError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::trace;

/// Returned by blocking pops once a queue is closed and drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("exchange queue '{0}' is closed")]
pub struct QueueClosed(pub &'static str);

impl From<QueueClosed> for BfError {
    fn from(_: QueueClosed) -> Self {
        BfError::Cancelled
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded multi-producer FIFO with blocking pop and cooperative close.
///
/// The structure itself never limits its length. In a prefetch pipeline the
/// bound comes from the fixed pool of batches circulating between the free
/// and ready queues.
///
/// Closing a queue wakes every blocked popper. Items pushed before (or after)
/// the close are still handed out; pops only report [`QueueClosed`] once the
/// queue is both closed and empty.
pub struct ExchangeQueue<T> {
    /// Queue name for logging.
    name: &'static str,

    /// Items plus the closed flag, under one lock.
    state: Mutex<QueueState<T>>,

    /// Signalled on push and close.
    available: Condvar,
}

impl<T> ExchangeQueue<T> {
    /// Create an empty queue.
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, 0)
    }

    /// Create an empty queue with room for `capacity` items.
    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Queue name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append an item and wake one waiter. Never blocks.
    pub fn push(&self, item: T) {
        let len = {
            let mut state = self.state.lock();
            state.items.push_back(item);
            state.items.len()
        };
        self.available.notify_one();
        trace!(queue = self.name, len, "Pushed item");
    }

    /// Remove the oldest item, blocking until one is available.
    pub fn pop(&self) -> Result<T, QueueClosed> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.closed {
                return Err(QueueClosed(self.name));
            }
            self.available.wait(&mut state);
        }
    }

    /// Remove the oldest item, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the wait timed out.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueClosed> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(Some(item));
            }
            if state.closed {
                return Err(QueueClosed(self.name));
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return match state.items.pop_front() {
                    Some(item) => Ok(Some(item)),
                    None if state.closed => Err(QueueClosed(self.name)),
                    None => Ok(None),
                };
            }
        }
    }

    /// Remove the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Close the queue and wake every waiter.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.available.notify_all();
        trace!(queue = self.name, "Closed queue");
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no items are queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl<T> std::fmt::Debug for ExchangeQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExchangeQueue")
            .field("name", &self.name)
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}
