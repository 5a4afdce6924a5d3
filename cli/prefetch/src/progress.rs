//! Progress reporting for bf-prefetch.

use bf_cli_common::{format_bytes, format_number};
use bf_prefetch::{PrefetchStats, StatsSnapshot};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Periodic progress lines on stderr, written from a background thread.
pub struct ProgressReporter {
    /// Whether progress reporting is enabled
    enabled: bool,
    /// Reporting interval
    interval: Duration,
    /// Shared stop flag
    stop: Arc<AtomicBool>,
    /// Background reporter thread
    handle: Option<JoinHandle<()>>,
    /// Start time
    start_time: Instant,
}

impl ProgressReporter {
    /// Create a new progress reporter.
    pub fn new(enabled: bool, interval_secs: u64) -> Self {
        Self {
            enabled,
            interval: Duration::from_secs(interval_secs),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            start_time: Instant::now(),
        }
    }

    /// Start the background progress reporter.
    pub fn start(&mut self, stats: Arc<PrefetchStats>) {
        if !self.enabled {
            return;
        }

        let stop = Arc::clone(&self.stop);
        let interval = self.interval;
        let start_time = self.start_time;

        let spawned = thread::Builder::new()
            .name("bf-progress".to_string())
            .spawn(move || loop {
                thread::park_timeout(interval);
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let _ = writeln!(
                    io::stderr(),
                    "[Progress] {} ({:.1}s elapsed)",
                    describe(&stats.snapshot()),
                    start_time.elapsed().as_secs_f64()
                );
            });

        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => tracing::warn!(error = %e, "Failed to start progress reporter"),
        }
    }

    /// Stop the progress reporter and print a final line.
    pub fn stop(mut self, stats: &StatsSnapshot) {
        if !self.enabled {
            return;
        }

        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }

        let _ = writeln!(
            io::stderr(),
            "[Progress] Complete: {} ({:.1}s)",
            describe(stats),
            self.start_time.elapsed().as_secs_f64()
        );
    }
}

fn describe(stats: &StatsSnapshot) -> String {
    format!(
        "{} batches produced, {} consumed, {} staged, {} consumer waits",
        format_number(stats.batches_produced),
        format_number(stats.batches_consumed),
        format_bytes(stats.bytes_produced),
        format_number(stats.consumer_waits)
    )
}
