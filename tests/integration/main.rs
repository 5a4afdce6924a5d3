//! Integration tests for batchflow prefetch pipelines.
//!
//! Every test drives a real worker thread through the public
//! `PrefetchingStage` API with deterministic producers and devices from
//! `common`.
//!
//! ```bash
//! cargo test -p integration-tests
//! ```

mod accelerator_test;
mod common;
mod failure_test;
mod pipeline_test;
mod shutdown_test;
