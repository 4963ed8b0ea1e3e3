//! Concurrent publishers

#![allow(clippy::unwrap_used)] // Tests can unwrap

use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use txpipe_runtime::{CpuConsumption, PipeConfig, PipeProcessor, ProcessorHandler, ProducerMode};
use txpipe_testing::RecordingStage;

fn producer_of(value: u64) -> u64 {
    value >> 32
}

fn run(producers: u64, per_producer: u64, capacity: usize) -> Vec<u64> {
    let recorder = Arc::new(RecordingStage::new("recorder"));
    let processor = Arc::new(PipeProcessor::new(
        PipeConfig::default()
            .with_capacity(capacity)
            .with_producer(ProducerMode::Multi)
            .with_cpu_consumption(CpuConsumption::High),
    ));
    processor.pipe([Arc::clone(&recorder) as Arc<dyn ProcessorHandler>]);
    processor.start().unwrap();

    let handles: Vec<_> = (0..producers)
        .map(|producer| {
            let processor = Arc::clone(&processor);
            thread::spawn(move || {
                for index in 0..per_producer {
                    let value = (producer << 32) | index;
                    let _ = processor.process(vec![Box::new(value)]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    processor.sync().unwrap();

    let sequences = recorder.sequences();
    let expected_slots = i64::try_from(producers * per_producer).unwrap();
    assert_eq!(sequences, (0..=expected_slots).collect::<Vec<i64>>());
    recorder.values()
}

#[test]
fn every_command_is_seen_exactly_once() {
    let mut values = run(4, 500, 64);
    assert_eq!(values.len(), 2_000);
    values.sort_unstable();
    values.dedup();
    assert_eq!(values.len(), 2_000);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn each_producer_keeps_its_own_order(
        producers in 1_u64..5,
        per_producer in 1_u64..200,
        capacity_bits in 2_u32..7,
    ) {
        let values = run(producers, per_producer, 1 << capacity_bits);
        for producer in 0..producers {
            let own: Vec<u64> = values
                .iter()
                .copied()
                .filter(|value| producer_of(*value) == producer)
                .map(|value| value & 0xFFFF_FFFF)
                .collect();
            prop_assert_eq!(own, (0..per_producer).collect::<Vec<u64>>());
        }
    }
}
