//! Worker lifecycle shared by the prefetch worker and its owner.

use bf_error::{BfError, Result};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Lifecycle state of a prefetch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Built but not started
    NotStarted,
    /// Worker thread is filling batches
    Running,
    /// Owner asked the worker to stop; it has not exited yet
    StopRequested,
    /// Worker has exited, or was never started and will not be
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop_requested"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// State machine for one worker, observable from both threads.
///
/// Transitions only move forward:
/// `NotStarted -> Running -> StopRequested -> Stopped`, with
/// `Running -> Stopped` when the worker exits on its own and
/// `NotStarted -> Stopped` when a stop is requested before the start.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<WorkerState>,
    changed: Condvar,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Create a lifecycle in [`WorkerState::NotStarted`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::NotStarted),
            changed: Condvar::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    /// Move to `Running`. Fails unless the worker has never been started.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != WorkerState::NotStarted {
            return Err(BfError::config(format!(
                "worker can only be started once (state: {})",
                *state
            )));
        }
        *state = WorkerState::Running;
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    /// Ask the worker to stop. Returns the state before the request.
    pub fn request_stop(&self) -> WorkerState {
        let mut state = self.state.lock();
        let previous = *state;
        *state = match previous {
            WorkerState::NotStarted => WorkerState::Stopped,
            WorkerState::Running => WorkerState::StopRequested,
            other => other,
        };
        drop(state);
        self.changed.notify_all();
        previous
    }

    /// Whether the worker should leave its loop.
    #[inline]
    pub fn must_stop(&self) -> bool {
        *self.state.lock() != WorkerState::Running
    }

    /// Whether a stop was requested by the owner and the worker is still exiting.
    pub fn is_stop_requested(&self) -> bool {
        *self.state.lock() == WorkerState::StopRequested
    }

    /// Record that the worker has exited.
    pub fn mark_stopped(&self) {
        *self.state.lock() = WorkerState::Stopped;
        self.changed.notify_all();
    }

    /// Wait until the worker is `Stopped`, for at most `timeout`.
    ///
    /// Returns false if the timeout elapsed first.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state != WorkerState::Stopped {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return *state == WorkerState::Stopped;
            }
        }
        true
    }
}
