//! Publisher back-pressure under every wait strategy

#![allow(clippy::unwrap_used)] // Tests can unwrap

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use txpipe_runtime::{CpuConsumption, PipeConfig, PipeProcessor, ProcessorHandler};
use txpipe_testing::{GatedStage, RecordingStage};

const CAPACITY: usize = 4;
const PUBLISHED: u64 = 7;

fn assert_publisher_blocks_when_full(cpu: CpuConsumption) {
    let gate = Arc::new(GatedStage::closed());
    let seen = Arc::new(RecordingStage::new("seen"));
    let processor = Arc::new(PipeProcessor::new(
        PipeConfig::default()
            .with_capacity(CAPACITY)
            .with_cpu_consumption(cpu),
    ));
    processor
        .pipe([Arc::clone(&gate) as Arc<dyn ProcessorHandler>])
        .pipe([Arc::clone(&seen) as Arc<dyn ProcessorHandler>]);
    processor.start().unwrap();

    let (published, acks) = mpsc::channel();
    let publisher = {
        let processor = Arc::clone(&processor);
        thread::spawn(move || {
            for value in 0..PUBLISHED {
                let _ = processor.process(vec![Box::new(value)]).unwrap();
                published.send(value).unwrap();
            }
        })
    };

    for expected in 0..CAPACITY as u64 {
        let acked = acks.recv_timeout(Duration::from_secs(5));
        assert_eq!(acked, Ok(expected), "{cpu}: slot {expected} should fit");
    }
    assert!(
        acks.recv_timeout(Duration::from_millis(100)).is_err(),
        "{cpu}: publisher must block while the ring is full"
    );
    assert!(gate.wait_for_entered(1, Duration::from_secs(5)));
    assert_eq!(processor.remaining_capacity(), Some(0));

    gate.open();
    for expected in CAPACITY as u64..PUBLISHED {
        assert_eq!(acks.recv_timeout(Duration::from_secs(5)), Ok(expected));
    }
    publisher.join().unwrap();

    processor.sync().unwrap();
    assert_eq!(seen.values(), (0..PUBLISHED).collect::<Vec<_>>(), "{cpu}");
    processor.shutdown();
}

#[test]
fn blocking_strategy_applies_back_pressure() {
    assert_publisher_blocks_when_full(CpuConsumption::Low);
}

#[test]
fn sleeping_strategy_applies_back_pressure() {
    assert_publisher_blocks_when_full(CpuConsumption::Normal);
}

#[test]
fn yielding_strategy_applies_back_pressure() {
    assert_publisher_blocks_when_full(CpuConsumption::High);
}

#[test]
fn phased_strategy_applies_back_pressure() {
    assert_publisher_blocks_when_full(CpuConsumption::Phased);
}

/// CPU time (utime + stime, in clock ticks) of the thread named `name`.
#[cfg(target_os = "linux")]
fn thread_cpu_ticks(name: &str) -> Option<u64> {
    for task in std::fs::read_dir("/proc/self/task").ok()? {
        let path = task.ok()?.path();
        let comm = std::fs::read_to_string(path.join("comm")).ok()?;
        if comm.trim() != name {
            continue;
        }
        let stat = std::fs::read_to_string(path.join("stat")).ok()?;
        let fields: Vec<&str> = stat.rsplit_once(')')?.1.split_whitespace().collect();
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        return Some(utime + stime);
    }
    None
}

#[cfg(target_os = "linux")]
#[test]
fn first_group_worker_sleeps_while_publisher_waits_for_space() {
    use txpipe_runtime::ProducerMode;

    let gate = Arc::new(GatedStage::closed());
    let processor = Arc::new(PipeProcessor::new(
        PipeConfig::default()
            .with_capacity(CAPACITY)
            .with_cpu_consumption(CpuConsumption::Low)
            .with_producer(ProducerMode::Multi)
            .with_thread_name("lowidle"),
    ));
    processor
        .pipe([txpipe_runtime::stage_fn("decode", |_, _| {})])
        .pipe([Arc::clone(&gate) as Arc<dyn ProcessorHandler>]);
    processor.start().unwrap();

    let (published, acks) = mpsc::channel();
    let publisher = {
        let processor = Arc::clone(&processor);
        thread::spawn(move || {
            for value in 0..=CAPACITY as u64 {
                let _ = processor.process(vec![Box::new(value)]).unwrap();
                published.send(value).unwrap();
            }
        })
    };
    for _ in 0..CAPACITY {
        acks.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    assert!(acks.recv_timeout(Duration::from_millis(100)).is_err());

    let before = thread_cpu_ticks("lowidle-0").unwrap();
    thread::sleep(Duration::from_secs(1));
    let after = thread_cpu_ticks("lowidle-0").unwrap();
    let burned = after - before;
    assert!(burned < 20, "first group worker used {burned} ticks while idle");

    gate.open();
    acks.recv_timeout(Duration::from_secs(5)).unwrap();
    publisher.join().unwrap();
    processor.shutdown();
}
