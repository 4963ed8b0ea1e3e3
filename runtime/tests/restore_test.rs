//! Replay of committed transactions through the stage chain

#![allow(clippy::unwrap_used)] // Tests can unwrap

use std::sync::Arc;
use txpipe_core::{EventMetadata, RestoreableEventBus, Transaction, TransactionCommitInfo};
use txpipe_runtime::{ContextMode, PipeConfig, PipeProcessor, ProcessorHandler, stage_fn};
use txpipe_testing::{CapturingEventBus, RecordingStage, ReplayStage, test_clock};

fn commit(transaction_id: i64, values: &[u64]) -> TransactionCommitInfo {
    let transactions: Vec<Transaction> = values
        .iter()
        .map(|value| Box::new(*value) as Transaction)
        .collect();
    TransactionCommitInfo::new(transaction_id, 1, test_clock().now(), transactions)
}

fn processor_with(stages: Vec<Arc<dyn ProcessorHandler>>) -> PipeProcessor {
    let processor = PipeProcessor::new(PipeConfig::default().with_capacity(32));
    for stage in stages {
        processor.pipe([stage]);
    }
    processor.start().unwrap();
    processor
}

#[test]
fn restored_transactions_reach_the_event_bus_with_restore_metadata() {
    let bus = CapturingEventBus::shared();
    let processor = processor_with(vec![Arc::new(ReplayStage) as Arc<dyn ProcessorHandler>]);

    processor
        .execute_restore(Arc::clone(&bus) as Arc<dyn RestoreableEventBus>, commit(42, &[10, 11]))
        .unwrap();
    processor
        .execute_restore(Arc::clone(&bus) as Arc<dyn RestoreableEventBus>, commit(43, &[12]))
        .unwrap();
    processor.sync().unwrap();

    assert_eq!(bus.transactions(), vec![42, 43]);
    let events = bus.events();
    let values: Vec<Option<u64>> = events.iter().map(|e| e.value).collect();
    let owners: Vec<Option<i64>> = events.iter().map(|e| e.transaction_id).collect();
    assert_eq!(values, vec![Some(10), Some(11), Some(12)]);
    assert_eq!(owners, vec![Some(42), Some(42), Some(43)]);
    assert!(
        events
            .iter()
            .all(|e| e.metadata == EventMetadata::restored(test_clock().now()))
    );
}

#[test]
fn restore_context_carries_commit_details_to_every_stage() {
    let observed = Arc::new(std::sync::Mutex::new(Vec::new()));
    let probe = {
        let observed = Arc::clone(&observed);
        stage_fn("probe", move |context, _| {
            if context.is_restore() {
                observed.lock().unwrap().push((
                    context.transaction_id(),
                    context.transactions().len(),
                    context.event_metadata().map(|m| m.restore),
                    context.expects_result(),
                ));
            }
        })
    };
    let processor = processor_with(vec![probe]);

    processor
        .execute_restore(CapturingEventBus::shared(), commit(7, &[1, 2, 3]))
        .unwrap();
    processor.sync().unwrap();

    assert_eq!(
        *observed.lock().unwrap(),
        vec![(Some(7), 3, Some(true), false)]
    );
}

#[test]
fn replay_interleaves_with_live_work_in_publication_order() {
    let recorder = Arc::new(RecordingStage::new("recorder"));
    let processor = processor_with(vec![
        Arc::new(ReplayStage) as Arc<dyn ProcessorHandler>,
        Arc::clone(&recorder) as Arc<dyn ProcessorHandler>,
    ]);
    let bus = CapturingEventBus::shared();

    let _ = processor.process(vec![Box::new(1_u64)]).unwrap();
    processor
        .execute_restore(Arc::clone(&bus) as Arc<dyn RestoreableEventBus>, commit(5, &[2]))
        .unwrap();
    let _ = processor.process(vec![Box::new(3_u64)]).unwrap();
    processor.sync().unwrap();

    let modes: Vec<ContextMode> = recorder.observations().iter().map(|o| o.mode).collect();
    assert_eq!(
        modes,
        vec![
            ContextMode::Normal,
            ContextMode::Restore,
            ContextMode::Normal,
            ContextMode::Abort
        ]
    );
    assert_eq!(recorder.values(), vec![1, 3]);
    assert_eq!(bus.events().len(), 1);
}

#[test]
fn restore_requires_a_started_processor() {
    let processor = PipeProcessor::new(PipeConfig::default());
    let error = processor
        .execute_restore(CapturingEventBus::shared(), commit(1, &[]))
        .unwrap_err();
    assert!(error.is_invalid_state());
}
