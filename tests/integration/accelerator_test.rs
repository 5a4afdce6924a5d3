//! Accelerator staging: warm-up placement, stream ownership and device views.

use crate::common::{CountingProducer, RecordingDevice};
use bf_prefetch::producer::{ProducerConfig, SyntheticProducer};
use bf_prefetch::{DeviceStaging, ExecutionMode, PrefetchConfig, PrefetchingStage};
use bf_traits::BatchProducer;
use bf_types::Residency;
use std::sync::Arc;
use std::thread;

fn accelerator_stage(
    pool_size: usize,
    producer: impl BatchProducer + 'static,
    device: &Arc<RecordingDevice>,
) -> PrefetchingStage {
    PrefetchingStage::new(
        PrefetchConfig::new()
            .with_name("gpu")
            .with_pool_size(pool_size)
            .with_execution_mode(ExecutionMode::Accelerator),
        Box::new(producer),
        Box::new(DeviceStaging::new(device.clone())),
    )
    .unwrap()
}

#[test]
fn test_warm_up_allocates_on_setup_thread() {
    let device = Arc::new(RecordingDevice::new());
    let (producer, _probe) = CountingProducer::new(16);
    let mut stage = accelerator_stage(3, producer.with_labels(), &device);

    stage.start().unwrap();
    let setup_thread = thread::current().id();
    let warmed = device.allocating_threads();
    // One data and one label mirror per pooled batch
    assert_eq!(warmed.len(), 6);
    assert!(warmed.iter().all(|id| *id == setup_thread));

    for _ in 0..10 {
        stage.advance().unwrap();
    }
    stage.stop().unwrap();

    // Shapes never outgrew the warm-up, so the worker never allocated.
    assert_eq!(device.allocating_threads().len(), 6);
}

#[test]
fn test_stream_is_owned_by_worker() {
    let device = Arc::new(RecordingDevice::new());
    let (producer, _probe) = CountingProducer::new(4);
    let mut stage = accelerator_stage(2, producer, &device);
    stage.start().unwrap();

    for _ in 0..5 {
        stage.advance().unwrap();
    }
    stage.stop().unwrap();

    assert_eq!(
        device.stream_threads(),
        vec![Some("bf-prefetch-gpu".to_string())]
    );
    assert_eq!(device.destroyed_streams(), 1);
}

#[test]
fn test_device_view_matches_host() {
    let device = Arc::new(RecordingDevice::new());
    let config = ProducerConfig::default()
        .with_batch_size(2)
        .with_shape(3, 4, 4)
        .with_labels(true)
        .with_seed(7);
    let mut stage = accelerator_stage(3, SyntheticProducer::new(&config), &device);
    stage.start().unwrap();

    for _ in 0..6 {
        let batch = stage.advance().unwrap();
        let data = batch.data();
        assert_eq!(data.residency(), Residency::Synced);
        assert_eq!(data.device_view(), Some(data.host()));

        let sequence = batch.sequence();
        let device_data = data.device_view().unwrap();
        assert_eq!(device_data[5], SyntheticProducer::value_at(7, sequence, 5));

        let label = batch.label().unwrap();
        assert_eq!(label.device_view(), Some(label.host()));
    }

    stage.stop().unwrap();
}
