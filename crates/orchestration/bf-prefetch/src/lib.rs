//! bf-prefetch - Double-buffered batch prefetching for batchflow.
//!
//! A [`PrefetchingStage`] owns a fixed pool of batches and one background
//! worker. The worker fills free batches through a
//! [`BatchProducer`](bf_traits::BatchProducer), stages them with a
//! [`Staging`] strategy and publishes them; the consumer claims them one at a
//! time with [`advance`](PrefetchingStage::advance). Batches move between
//! the two threads through a pair of [`ExchangeQueue`]s, so the number in
//! flight never exceeds the pool size.
//!
//! - Host-only or host plus accelerator staging, chosen once at construction
//! - Warm-up of every pooled buffer on the setup thread before the worker starts
//! - Bounded, cooperative shutdown by lifecycle flag plus queue closure
//! - Sticky failures: once the worker fails, every later `advance` reports it
//!
//! # Example
//!
//! ```
//! use bf_prefetch::producer::{builtin_producers, ProducerConfig};
//! use bf_prefetch::{staging_for, PrefetchConfig, PrefetchingStage};
//!
//! let config = PrefetchConfig::new().with_name("train");
//! let producers = builtin_producers().unwrap();
//! let producer_config = ProducerConfig::default().with_batch_size(4).with_shape(3, 8, 8);
//! let producer = producers.create("synthetic", &producer_config).unwrap();
//! let staging = staging_for(config.execution_mode, None).unwrap();
//!
//! let mut stage = PrefetchingStage::new(config, producer, staging).unwrap();
//! stage.start().unwrap();
//! for _ in 0..3 {
//!     let batch = stage.advance().unwrap();
//!     assert_eq!(batch.data().shape(), &[4, 3, 8, 8]);
//! }
//! stage.stop().unwrap();
//! ```

pub mod config;
pub mod lifecycle;
pub mod producer;
pub mod queue;
pub mod stage;
pub mod staging;
pub mod stats;
pub mod step;
pub mod worker;

pub use config::{ExecutionMode, PrefetchConfig, DEFAULT_POOL_SIZE, MIN_POOL_SIZE};
pub use lifecycle::{Lifecycle, WorkerState};
pub use queue::{ExchangeQueue, QueueClosed};
pub use stage::{PoolCensus, PrefetchingStage};
pub use staging::{staging_for, DeviceStaging, HostStaging, Staging};
pub use stats::{PrefetchStats, StatsSnapshot};
pub use worker::{WorkerFailure, WorkerSummary};
