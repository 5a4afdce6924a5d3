//! Steady-state pipeline behavior: ordering, content, backpressure and the
//! pool census.

use crate::common::{wait_until, CountingProducer};
use bf_error::Result;
use bf_prefetch::producer::{builtin_producers, CounterProducer, ProducerConfig, SyntheticProducer};
use bf_prefetch::{HostStaging, PoolCensus, PrefetchConfig, PrefetchingStage};
use bf_registry::Registry;
use bf_traits::BatchProducer;
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(5);

fn host_stage(pool_size: usize, producer: impl BatchProducer + 'static) -> PrefetchingStage {
    PrefetchingStage::new(
        PrefetchConfig::new().with_pool_size(pool_size),
        Box::new(producer),
        Box::new(HostStaging),
    )
    .unwrap()
}

#[test]
fn test_batches_arrive_in_production_order() {
    let (producer, _probe) = CountingProducer::new(4);
    let mut stage = host_stage(3, producer);
    stage.start().unwrap();

    for expected in 1..=50u64 {
        let batch = stage.advance().unwrap();
        assert_eq!(batch.sequence(), expected);
        assert!(batch.data().host().iter().all(|v| *v == expected as f32));
    }

    stage.stop().unwrap();
}

#[test]
fn test_round_trip_content() {
    let config = ProducerConfig::default()
        .with_batch_size(2)
        .with_shape(3, 4, 4)
        .with_labels(true)
        .with_seed(99);
    let mut stage = host_stage(4, SyntheticProducer::new(&config));
    stage.start().unwrap();

    for _ in 0..10 {
        let batch = stage.advance().unwrap();
        let sequence = batch.sequence();

        assert_eq!(batch.data().shape(), &[2, 3, 4, 4]);
        for (i, value) in batch.data().host().iter().enumerate() {
            assert_eq!(*value, SyntheticProducer::value_at(99, sequence, i));
        }
        let labels = batch.label().unwrap().host();
        assert_eq!(labels[0], SyntheticProducer::label_at(99, sequence, 0));
        assert_eq!(labels[1], SyntheticProducer::label_at(99, sequence, 1));
    }

    stage.stop().unwrap();
}

#[test]
fn test_dynamic_reshape_on_fill() {
    let config = ProducerConfig::default().with_shape(3, 2, 2);
    let mut stage = host_stage(3, CounterProducer::new(&config));
    stage.start().unwrap();

    for _ in 0..4 {
        stage.advance().unwrap();
    }
    let fifth = stage.advance().unwrap();

    assert_eq!(fifth.sequence(), 5);
    assert_eq!(fifth.data().shape(), &[5, 3, 2, 2]);
    assert_eq!(fifth.data().host().len(), 60);
    assert!(fifth.data().host().iter().all(|v| *v == 5.0));

    stage.stop().unwrap();
}

#[test]
fn test_pool_census_while_consumer_holds_a_batch() {
    let (producer, _probe) = CountingProducer::new(8);
    let mut stage = host_stage(4, producer);
    stage.start().unwrap();

    let all_ready = PoolCensus {
        pool_size: 4,
        free: 0,
        ready: 4,
        in_use: 0,
        filling: 0,
    };
    assert!(wait_until(SETTLE, || stage.census() == all_ready));

    stage.advance().unwrap();
    stage.advance().unwrap();

    let steady = PoolCensus {
        pool_size: 4,
        free: 0,
        ready: 3,
        in_use: 1,
        filling: 0,
    };
    assert!(wait_until(SETTLE, || stage.census() == steady));

    let census = stage.census();
    assert_eq!(
        census.free + census.ready + census.in_use + census.filling,
        census.pool_size
    );

    stage.stop().unwrap();
}

fn assert_backpressure(pool_size: usize) {
    let (producer, probe) = CountingProducer::new(2);
    let mut stage = host_stage(pool_size, producer);
    stage.start().unwrap();

    // With no consumer the worker fills the whole pool, then blocks.
    assert!(wait_until(SETTLE, || probe.fills() == pool_size as u64));
    assert!(wait_until(SETTLE, || stage.stats().producer_waits >= 1));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(probe.fills(), pool_size as u64);

    // Each advance after the first recycles one batch, allowing one more fill.
    for advanced in 1..=6u64 {
        stage.advance().unwrap();
        let bound = pool_size as u64 + advanced - 1;
        assert!(wait_until(SETTLE, || probe.fills() == bound));
        std::thread::sleep(Duration::from_millis(10));
        assert!(probe.fills() <= bound, "worker ran ahead of the pool");
    }

    stage.stop().unwrap();
}

#[test]
fn test_backpressure_with_two_batches() {
    assert_backpressure(2);
}

#[test]
fn test_backpressure_with_three_batches() {
    assert_backpressure(3);
}

#[test]
fn test_liveness_with_uneven_latencies() {
    let (producer, probe) = CountingProducer::new(16);
    let producer = producer.with_delay(Duration::from_millis(1));
    let mut stage = host_stage(2, producer);
    stage.start().unwrap();

    for i in 1..=100u64 {
        let batch = stage.advance().unwrap();
        assert_eq!(batch.sequence(), i);
        if i % 7 == 0 {
            std::thread::sleep(Duration::from_millis(3));
        }
    }

    let summary = stage.stop().unwrap();
    assert!(summary.batches_produced >= 100);
    assert!(probe.fills() >= 100);
    assert_eq!(stage.stats().batches_consumed, 100);
}

#[test]
fn test_prefetch_hides_producer_latency() {
    let (producer, _probe) = CountingProducer::new(4);
    let producer = producer.with_delay(Duration::from_millis(5));
    let mut stage = host_stage(4, producer);
    stage.start().unwrap();

    // Let the pool fill, then consume slower than the producer.
    assert!(wait_until(SETTLE, || stage.census().ready == 4));
    for _ in 0..10 {
        stage.advance().unwrap();
        std::thread::sleep(Duration::from_millis(15));
    }

    let stats = stage.stats();
    assert_eq!(stats.batches_consumed, 10);
    assert!(stats.consumer_waits <= 2);

    stage.stop().unwrap();
}

#[test]
fn test_owner_held_registry_with_fake_producer() {
    let mut producers: Registry<Box<dyn BatchProducer>, usize> = Registry::new("producer");
    producers
        .register("counting", |len: &usize| -> Result<Box<dyn BatchProducer>> {
            Ok(Box::new(CountingProducer::new(*len).0))
        })
        .unwrap();

    let producer = producers.create("counting", &3).unwrap();
    let mut stage = PrefetchingStage::new(
        PrefetchConfig::new().with_pool_size(2),
        producer,
        Box::new(HostStaging),
    )
    .unwrap();
    stage.start().unwrap();

    assert_eq!(stage.advance().unwrap().data().count(), 3);
    stage.stop().unwrap();

    let builtin = builtin_producers().unwrap();
    assert!(!builtin.contains("counting"));
}
