//! Shared utilities for batchflow CLI binaries.
//!
//! Log level selection, logging setup and human-readable formatting of
//! counts, sizes and durations for run summaries.

pub mod args;
pub mod format;
pub mod logging;

pub use args::LogLevel;
pub use format::{format_bytes, format_duration, format_number};
pub use logging::init_logging;
