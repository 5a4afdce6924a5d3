//! Bounded, cooperative shutdown.

use crate::common::{wait_until, CountingProducer};
use bf_error::BfError;
use bf_prefetch::{HostStaging, PrefetchConfig, PrefetchingStage, WorkerState};
use std::time::{Duration, Instant};

fn host_stage(config: PrefetchConfig, producer: CountingProducer) -> PrefetchingStage {
    PrefetchingStage::new(config, Box::new(producer), Box::new(HostStaging)).unwrap()
}

#[test]
fn test_stop_wakes_worker_blocked_on_free_list() {
    let (producer, probe) = CountingProducer::new(2);
    let mut stage = host_stage(PrefetchConfig::new().with_pool_size(2), producer);
    stage.start().unwrap();

    // The consumer never advances, so the worker ends up blocked.
    assert!(wait_until(Duration::from_secs(5), || probe.fills() == 2
        && stage.stats().producer_waits >= 1));

    let started = Instant::now();
    let summary = stage.stop().unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.batches_produced, 2);
    assert_eq!(stage.state(), WorkerState::Stopped);
    assert!(probe.dropped());
}

#[test]
fn test_stop_during_fill_discards_batch() {
    let (producer, probe) = CountingProducer::new(2);
    let producer = producer.with_delay(Duration::from_millis(200));
    let mut stage = host_stage(PrefetchConfig::new().with_pool_size(3), producer);
    stage.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || probe.fills() == 1));
    let summary = stage.stop().unwrap();

    assert_eq!(summary.batches_produced, 0);
    assert_eq!(summary.batches_discarded, 1);
    assert_eq!(stage.census().ready, 0);
}

#[test]
fn test_shutdown_timeout_detaches_stuck_worker() {
    let (producer, _probe) = CountingProducer::new(2);
    let producer = producer.with_delay(Duration::from_millis(1500));
    let config = PrefetchConfig::new()
        .with_pool_size(2)
        .with_shutdown_timeout(Duration::from_millis(100));
    let mut stage = host_stage(config, producer);
    stage.start().unwrap();

    let started = Instant::now();
    match stage.stop() {
        Err(BfError::ShutdownTimeout(timeout)) => assert_eq!(timeout, Duration::from_millis(100)),
        other => panic!("Expected ShutdownTimeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(stage.advance(), Err(BfError::Cancelled)));
}

#[test]
fn test_advance_after_stop_is_cancelled() {
    let (producer, _probe) = CountingProducer::new(2);
    let mut stage = host_stage(PrefetchConfig::new().with_pool_size(2), producer);
    stage.start().unwrap();
    stage.advance().unwrap();
    stage.stop().unwrap();

    assert!(matches!(stage.advance(), Err(BfError::Cancelled)));
    assert!(stage.stop().is_ok());
}

#[test]
fn test_drop_joins_worker() {
    let (producer, probe) = CountingProducer::new(2);
    let mut stage = host_stage(PrefetchConfig::new().with_pool_size(2), producer);
    stage.start().unwrap();
    stage.advance().unwrap();

    drop(stage);
    assert!(probe.dropped());
}

#[test]
fn test_drop_without_start_releases_producer() {
    let (producer, probe) = CountingProducer::new(2);
    let stage = host_stage(PrefetchConfig::new().with_pool_size(2), producer);

    drop(stage);
    assert!(probe.dropped());
    assert_eq!(probe.fills(), 0);
}
