//! # Txpipe Testing
//!
//! Testing utilities for the txpipe transaction pipeline.
//!
//! This crate provides:
//! - Observable stages (`RecordingStage`, `GatedStage`, `FailingStage`, `ReplayStage`)
//! - A capturing `RestoreableEventBus`
//! - Deterministic time (`FixedClock`)
//! - Tracing setup for tests
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use txpipe_runtime::{PipeConfig, PipeProcessor, ProcessorHandler};
//! use txpipe_testing::RecordingStage;
//!
//! # fn main() -> Result<(), txpipe_runtime::ProcessorError> {
//! let recorder = Arc::new(RecordingStage::new("recorder"));
//! let processor = PipeProcessor::new(PipeConfig::default().with_capacity(16));
//! processor.pipe([Arc::clone(&recorder) as Arc<dyn ProcessorHandler>]);
//! processor.start()?;
//!
//! processor.process(vec![Box::new(7_u64)])?.wait();
//! assert_eq!(recorder.values(), vec![7]);
//! # Ok(())
//! # }
//! ```

/// Mock stages, event bus and clock.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use std::sync::{Arc, Condvar, Mutex, PoisonError};
    use std::time::Duration;
    use txpipe_core::{CommandError, Event, EventMetadata, RestoreableEventBus};
    use txpipe_runtime::{ContextMode, ProcessorContext, ProcessorHandler};

    /// What a [`RecordingStage`] saw for one slot
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Observation {
        /// Sequence of the slot
        pub sequence: i64,
        /// Mode when the stage ran
        pub mode: ContextMode,
        /// `u64` commands in the slot, in order
        pub values: Vec<u64>,
        /// Whether the slot was the last of its batch
        pub end_of_batch: bool,
    }

    /// Stage that records every slot it sees.
    ///
    /// Commands that are `u64` are captured by value; everything else only
    /// counts towards the observation.
    #[derive(Debug)]
    pub struct RecordingStage {
        name: String,
        observations: Mutex<Vec<Observation>>,
    }

    impl RecordingStage {
        /// Create an empty recorder
        #[must_use]
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                observations: Mutex::new(Vec::new()),
            }
        }

        /// Every observation, in arrival order
        #[must_use]
        pub fn observations(&self) -> Vec<Observation> {
            self.observations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Sequences in arrival order
        #[must_use]
        pub fn sequences(&self) -> Vec<i64> {
            self.observations().iter().map(|o| o.sequence).collect()
        }

        /// `u64` commands of every non-abort slot, flattened in arrival order
        #[must_use]
        pub fn values(&self) -> Vec<u64> {
            self.observations()
                .into_iter()
                .filter(|o| o.mode != ContextMode::Abort)
                .flat_map(|o| o.values)
                .collect()
        }

        /// Number of slots seen
        #[must_use]
        pub fn len(&self) -> usize {
            self.observations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        /// Whether nothing was seen yet
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl ProcessorHandler for RecordingStage {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle(&self, context: &mut ProcessorContext, end_of_batch: bool) {
            let values = context
                .commands()
                .iter()
                .filter_map(|command| command.downcast_ref::<u64>().copied())
                .collect();
            self.observations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Observation {
                    sequence: context.sequence(),
                    mode: context.mode(),
                    values,
                    end_of_batch,
                });
        }
    }

    #[derive(Debug, Default)]
    struct GateState {
        open: bool,
        entered: usize,
    }

    /// Stage that holds every live slot until its gate is opened.
    ///
    /// Used to fill the ring buffer and observe publisher back-pressure.
    /// Abort-mode slots (sync barriers) pass without waiting.
    #[derive(Debug, Default)]
    pub struct GatedStage {
        state: Mutex<GateState>,
        changed: Condvar,
    }

    impl GatedStage {
        /// Create a stage with a closed gate
        #[must_use]
        pub fn closed() -> Self {
            Self::default()
        }

        /// Let every waiting and future slot through.
        pub fn open(&self) {
            self.state.lock().unwrap_or_else(PoisonError::into_inner).open = true;
            self.changed.notify_all();
        }

        /// Hold slots again from the next one on.
        pub fn close(&self) {
            self.state.lock().unwrap_or_else(PoisonError::into_inner).open = false;
        }

        /// Number of slots that reached the gate
        #[must_use]
        pub fn entered(&self) -> usize {
            self.state.lock().unwrap_or_else(PoisonError::into_inner).entered
        }

        /// Wait until `count` slots reached the gate, or `timeout` elapses.
        ///
        /// Returns whether the count was reached.
        pub fn wait_for_entered(&self, count: usize, timeout: Duration) -> bool {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let (state, _) = self
                .changed
                .wait_timeout_while(state, timeout, |state| state.entered < count)
                .unwrap_or_else(PoisonError::into_inner);
            state.entered >= count
        }
    }

    impl ProcessorHandler for GatedStage {
        fn name(&self) -> &str {
            "gated"
        }

        fn handle(&self, context: &mut ProcessorContext, _end_of_batch: bool) {
            if context.mode() == ContextMode::Abort {
                return;
            }
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.entered += 1;
            self.changed.notify_all();
            let _open = self
                .changed
                .wait_while(state, |state| !state.open)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    type Predicate = Box<dyn Fn(&ProcessorContext) -> bool + Send + Sync>;

    /// Stage that aborts live slots matching a predicate.
    pub struct FailingStage {
        message: String,
        predicate: Predicate,
    }

    impl FailingStage {
        /// Abort every live slot with `message`
        #[must_use]
        pub fn always(message: impl Into<String>) -> Self {
            Self::when(message, |_| true)
        }

        /// Abort live slots for which `predicate` holds
        #[must_use]
        pub fn when<F>(message: impl Into<String>, predicate: F) -> Self
        where
            F: Fn(&ProcessorContext) -> bool + Send + Sync + 'static,
        {
            Self {
                message: message.into(),
                predicate: Box::new(predicate),
            }
        }
    }

    impl std::fmt::Debug for FailingStage {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FailingStage")
                .field("message", &self.message)
                .finish_non_exhaustive()
        }
    }

    impl ProcessorHandler for FailingStage {
        fn name(&self) -> &str {
            "failing"
        }

        fn handle(&self, context: &mut ProcessorContext, _end_of_batch: bool) {
            if context.mode() == ContextMode::Normal && (self.predicate)(context) {
                context.abort(CommandError::Failed(self.message.clone()));
            }
        }
    }

    /// Stage that replays restored transactions into the context's event bus.
    ///
    /// Every `u64` transaction becomes one event. Live and abort slots are ignored.
    #[derive(Debug, Default)]
    pub struct ReplayStage;

    impl ProcessorHandler for ReplayStage {
        fn name(&self) -> &str {
            "replay"
        }

        fn handle(&self, context: &mut ProcessorContext, _end_of_batch: bool) {
            let (Some(bus), Some(transaction_id), Some(metadata)) = (
                context.event_bus(),
                context.transaction_id(),
                context.event_metadata(),
            ) else {
                return;
            };
            bus.current_transaction_id(transaction_id);
            for transaction in context.transactions() {
                if let Some(value) = transaction.downcast_ref::<u64>() {
                    let event: Event = Box::new(*value);
                    bus.publish_event(&event, metadata);
                }
            }
        }
    }

    /// An event seen by [`CapturingEventBus`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CapturedEvent {
        /// Transaction marked current when the event was published
        pub transaction_id: Option<i64>,
        /// Metadata the event was published with
        pub metadata: EventMetadata,
        /// The event, if it was a `u64`
        pub value: Option<u64>,
    }

    #[derive(Debug, Default)]
    struct BusState {
        current: Option<i64>,
        transactions: Vec<i64>,
        events: Vec<CapturedEvent>,
    }

    /// Restoreable event bus that keeps everything published to it.
    #[derive(Debug, Default)]
    pub struct CapturingEventBus {
        state: Mutex<BusState>,
    }

    impl CapturingEventBus {
        /// Create an empty bus behind an `Arc`
        #[must_use]
        pub fn shared() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Transactions marked current, in order
        #[must_use]
        pub fn transactions(&self) -> Vec<i64> {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .transactions
                .clone()
        }

        /// Events published, in order
        #[must_use]
        pub fn events(&self) -> Vec<CapturedEvent> {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .events
                .clone()
        }
    }

    impl RestoreableEventBus for CapturingEventBus {
        fn current_transaction_id(&self, transaction_id: i64) {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.current = Some(transaction_id);
            state.transactions.push(transaction_id);
        }

        fn publish_event(&self, event: &Event, metadata: &EventMetadata) {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let captured = CapturedEvent {
                transaction_id: state.current,
                metadata: *metadata,
                value: event.downcast_ref::<u64>().copied(),
            };
            state.events.push(captured);
        }
    }

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making commit times reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::Utc;
    /// use txpipe_testing::mocks::FixedClock;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// The fixed time
        #[must_use]
        pub const fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Install a test-friendly tracing subscriber, honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub use mocks::{
    CapturedEvent, CapturingEventBus, FailingStage, FixedClock, GatedStage, Observation,
    RecordingStage, ReplayStage, test_clock,
};
