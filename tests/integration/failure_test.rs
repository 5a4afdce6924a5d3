//! Fatal producer and transfer failures.
//!
//! Once the worker fails, batches it already published are still handed
//! out; every later `advance` reports the failure immediately and keeps
//! reporting it. `stop` returns the original error.

use crate::common::{wait_until, CountingProducer, Fault, RecordingDevice};
use bf_error::{BfError, FailureStage};
use bf_prefetch::{
    DeviceStaging, ExecutionMode, HostStaging, PrefetchConfig, PrefetchingStage, WorkerState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn host_stage(pool_size: usize, producer: CountingProducer) -> PrefetchingStage {
    PrefetchingStage::new(
        PrefetchConfig::new().with_pool_size(pool_size),
        Box::new(producer),
        Box::new(HostStaging),
    )
    .unwrap()
}

#[test]
fn test_failure_on_third_fill() {
    let (producer, _probe) = CountingProducer::new(4);
    let mut stage = host_stage(3, producer.failing_on(3, Fault::Error));
    stage.start().unwrap();

    assert_eq!(stage.advance().unwrap().sequence(), 1);
    assert_eq!(stage.advance().unwrap().sequence(), 2);

    for _ in 0..2 {
        match stage.advance() {
            Err(BfError::WorkerFailed { stage, message }) => {
                assert_eq!(stage, FailureStage::Produce);
                assert_eq!(message, "Producer error: record 3 is corrupt");
            }
            other => panic!("Expected WorkerFailed, got {:?}", other.map(|b| b.sequence())),
        }
    }

    let failure = stage.failure().unwrap();
    assert_eq!(failure.stage, FailureStage::Produce);
    assert_eq!(stage.state(), WorkerState::Stopped);

    match stage.stop() {
        Err(BfError::Producer(e)) => assert_eq!(e.to_string(), "record 3 is corrupt"),
        other => panic!("Expected the original producer error, got {:?}", other),
    }
}

#[test]
fn test_published_batches_drain_before_failure() {
    let (producer, _probe) = CountingProducer::new(2);
    let mut stage = host_stage(4, producer.failing_on(4, Fault::Error));
    stage.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || stage.state() == WorkerState::Stopped));

    for expected in 1..=3u64 {
        assert_eq!(stage.advance().unwrap().sequence(), expected);
    }
    assert!(matches!(
        stage.advance(),
        Err(BfError::WorkerFailed {
            stage: FailureStage::Produce,
            ..
        })
    ));
}

#[test]
fn test_failed_pipeline_never_blocks_consumer() {
    let (producer, _probe) = CountingProducer::new(2);
    let mut stage = host_stage(2, producer.failing_on(1, Fault::Error));
    stage.start().unwrap();

    assert!(stage.advance().is_err());

    let started = Instant::now();
    for _ in 0..10 {
        assert!(matches!(stage.advance(), Err(BfError::WorkerFailed { .. })));
    }
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_producer_panic_is_reported() {
    let (producer, probe) = CountingProducer::new(2);
    let mut stage = host_stage(2, producer.failing_on(2, Fault::Panic));
    stage.start().unwrap();

    assert_eq!(stage.advance().unwrap().sequence(), 1);
    match stage.advance() {
        Err(BfError::WorkerFailed { stage, message }) => {
            assert_eq!(stage, FailureStage::Produce);
            assert_eq!(message, "prefetch worker panicked");
        }
        other => panic!("Expected WorkerFailed, got {:?}", other.map(|b| b.sequence())),
    }

    assert!(matches!(stage.stop(), Err(BfError::WorkerPanicked)));
    assert!(probe.dropped());
}

#[test]
fn test_transfer_failure() {
    let device = Arc::new(RecordingDevice::new().failing_copy_from(2));
    let (producer, _probe) = CountingProducer::new(4);
    let mut stage = PrefetchingStage::new(
        PrefetchConfig::new()
            .with_pool_size(2)
            .with_execution_mode(ExecutionMode::Accelerator),
        Box::new(producer),
        Box::new(DeviceStaging::new(device.clone())),
    )
    .unwrap();
    stage.start().unwrap();

    assert_eq!(stage.advance().unwrap().sequence(), 1);
    match stage.advance() {
        Err(BfError::WorkerFailed { stage, message }) => {
            assert_eq!(stage, FailureStage::Transfer);
            assert!(message.contains("device lost during copy 2"));
        }
        other => panic!("Expected WorkerFailed, got {:?}", other.map(|b| b.sequence())),
    }

    assert!(matches!(stage.stop(), Err(BfError::Transfer(_))));
    assert_eq!(device.destroyed_streams(), 1);
}
