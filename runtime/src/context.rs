//! The reusable unit of pipeline work.
//!
//! One [`ProcessorContext`] lives in every ring buffer slot and is recycled for
//! every sequence that maps onto that slot. The producer resets it and fills it
//! with one of three payloads:
//!
//! - **Normal**: a command batch plus the caller's completion handle
//! - **Abort**: a sync barrier, no commands, only a completion handle
//! - **Restore**: an already committed transaction batch plus the replay event bus
//!
//! Stages read the commands, attach transactions, events and results, or abort
//! the context. The terminal step of the pipeline resolves the completion handle.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use txpipe_core::{
    Command, CommandError, CommandResult, EmptyResult, Event, EventMetadata, RestoreableEventBus,
    Transaction, TransactionCommitInfo,
};

/// What kind of work a context carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Live command batch
    Normal,
    /// Replay of a committed transaction
    Restore,
    /// Sync barrier, or a batch a stage aborted
    Abort,
}

pub(crate) type AnyResult = CommandResult<Box<dyn Any + Send>>;

/// Completion handle for live work.
pub(crate) enum Completion {
    /// `process`: resolved with an [`EmptyResult`]
    Batch(oneshot::Sender<EmptyResult>),
    /// `execute`: resolved with the value a stage attached
    Single(oneshot::Sender<AnyResult>),
}

struct RestoreState {
    transaction_id: i64,
    metadata: EventMetadata,
    event_bus: Arc<dyn RestoreableEventBus>,
}

enum Payload {
    Idle,
    Live(Completion),
    Barrier(oneshot::Sender<EmptyResult>),
    Restore(RestoreState),
}

/// Mutable slot state handed to every stage.
pub struct ProcessorContext {
    sequence: i64,
    commands: Vec<Command>,
    transactions: Vec<Transaction>,
    events: Vec<Event>,
    payload: Payload,
    result: Option<Box<dyn Any + Send>>,
    aborted: bool,
    failure: Option<CommandError>,
}

impl ProcessorContext {
    pub(crate) const fn new() -> Self {
        Self {
            sequence: -1,
            commands: Vec::new(),
            transactions: Vec::new(),
            events: Vec::new(),
            payload: Payload::Idle,
            result: None,
            aborted: false,
            failure: None,
        }
    }

    /// Ring buffer sequence this context was published under
    #[must_use]
    pub const fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Current mode.
    ///
    /// A Normal or Restore context reports [`ContextMode::Abort`] once a stage
    /// aborted it.
    #[must_use]
    pub const fn mode(&self) -> ContextMode {
        if self.aborted {
            return ContextMode::Abort;
        }
        match self.payload {
            Payload::Restore(_) => ContextMode::Restore,
            Payload::Barrier(_) => ContextMode::Abort,
            Payload::Idle | Payload::Live(_) => ContextMode::Normal,
        }
    }

    /// Whether this context is a replay of committed work
    #[must_use]
    pub const fn is_restore(&self) -> bool {
        matches!(self.payload, Payload::Restore(_))
    }

    /// Whether this context is a sync barrier or was aborted by a stage
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Abort the context; later stages see [`ContextMode::Abort`] and the caller's
    /// future resolves with `error`.
    ///
    /// The first abort wins; subsequent errors are ignored.
    pub fn abort(&mut self, error: CommandError) {
        self.aborted = true;
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    /// The error the context was aborted with
    #[must_use]
    pub const fn failure(&self) -> Option<&CommandError> {
        self.failure.as_ref()
    }

    /// Commands submitted by the caller (empty for barriers and replays)
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Mutable access to the submitted commands
    pub fn commands_mut(&mut self) -> &mut Vec<Command> {
        &mut self.commands
    }

    /// Transactions produced by commands, or replayed from the journal
    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Append a transaction produced while executing a command
    pub fn add_transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    /// Mutable access to the transactions
    pub fn transactions_mut(&mut self) -> &mut Vec<Transaction> {
        &mut self.transactions
    }

    /// Events emitted while applying transactions
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Append an emitted event
    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Take all emitted events, leaving the list empty
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Whether the caller is waiting for a typed result (submitted via `execute`)
    #[must_use]
    pub const fn expects_result(&self) -> bool {
        matches!(self.payload, Payload::Live(Completion::Single(_)))
    }

    /// Attach the value the caller's `execute` future resolves with.
    pub fn set_result<R: Any + Send>(&mut self, value: R) {
        self.result = Some(Box::new(value));
    }

    /// Whether a stage already attached a result
    #[must_use]
    pub const fn has_result(&self) -> bool {
        self.result.is_some()
    }

    /// Transaction id being replayed (Restore mode only)
    #[must_use]
    pub const fn transaction_id(&self) -> Option<i64> {
        match &self.payload {
            Payload::Restore(restore) => Some(restore.transaction_id),
            _ => None,
        }
    }

    /// Event metadata for the replayed transaction (Restore mode only)
    #[must_use]
    pub const fn event_metadata(&self) -> Option<&EventMetadata> {
        match &self.payload {
            Payload::Restore(restore) => Some(&restore.metadata),
            _ => None,
        }
    }

    /// Event bus replayed events are published to (Restore mode only)
    #[must_use]
    pub fn event_bus(&self) -> Option<&Arc<dyn RestoreableEventBus>> {
        match &self.payload {
            Payload::Restore(restore) => Some(&restore.event_bus),
            _ => None,
        }
    }

    /// Clear every field so nothing leaks into the next cycle.
    ///
    /// Buffers keep their allocation for reuse.
    pub(crate) fn reset(&mut self, sequence: i64) -> &mut Self {
        self.sequence = sequence;
        self.commands.clear();
        self.transactions.clear();
        self.events.clear();
        self.payload = Payload::Idle;
        self.result = None;
        self.aborted = false;
        self.failure = None;
        self
    }

    pub(crate) fn live(&mut self, commands: Vec<Command>, completion: Completion) {
        self.commands = commands;
        self.payload = Payload::Live(completion);
    }

    pub(crate) fn barrier(&mut self, completion: oneshot::Sender<EmptyResult>) {
        self.aborted = true;
        self.payload = Payload::Barrier(completion);
    }

    pub(crate) fn restore(
        &mut self,
        event_bus: Arc<dyn RestoreableEventBus>,
        commit: TransactionCommitInfo,
    ) {
        let metadata = commit.restore_metadata();
        self.transactions.extend(commit.transaction_commits);
        self.payload = Payload::Restore(RestoreState {
            transaction_id: commit.transaction_id,
            metadata,
            event_bus,
        });
    }

    /// Resolve the caller's completion handle.
    ///
    /// Returns `false` when the caller already dropped its future.
    pub(crate) fn complete(&mut self) -> bool {
        match std::mem::replace(&mut self.payload, Payload::Idle) {
            Payload::Live(Completion::Batch(sender)) => {
                let outcome = self
                    .failure
                    .take()
                    .map_or_else(EmptyResult::success, EmptyResult::failure);
                sender.send(outcome).is_ok()
            },
            Payload::Live(Completion::Single(sender)) => {
                let outcome = match self.failure.take() {
                    Some(error) => CommandResult::failure(error),
                    None => CommandResult::success(self.result.take()),
                };
                sender.send(outcome).is_ok()
            },
            Payload::Barrier(sender) => sender.send(EmptyResult::success()).is_ok(),
            payload @ (Payload::Idle | Payload::Restore(_)) => {
                self.payload = payload;
                true
            },
        }
    }

    /// Release everything the slot holds, including buffer allocations.
    ///
    /// Pending completion handles are dropped, so their futures resolve as
    /// [`CommandError::Dropped`].
    pub(crate) fn destroy(&mut self) {
        self.reset(-1);
        self.commands.shrink_to_fit();
        self.transactions.shrink_to_fit();
        self.events.shrink_to_fit();
    }
}

impl Default for ProcessorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorContext")
            .field("sequence", &self.sequence)
            .field("mode", &self.mode())
            .field("commands", &self.commands.len())
            .field("transactions", &self.transactions.len())
            .field("events", &self.events.len())
            .field("has_result", &self.result.is_some())
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct NullBus;

    impl RestoreableEventBus for NullBus {
        fn current_transaction_id(&self, _transaction_id: i64) {}
        fn publish_event(&self, _event: &Event, _metadata: &EventMetadata) {}
    }

    #[test]
    fn reset_clears_every_field() {
        let (tx, _rx) = oneshot::channel();
        let mut context = ProcessorContext::new();
        context
            .reset(4)
            .live(vec![Box::new(1_u8)], Completion::Single(tx));
        context.add_transaction(Box::new("tx"));
        context.add_event(Box::new("event"));
        context.set_result(7_u32);
        context.abort(CommandError::Failed("nope".to_string()));

        context.reset(5);

        assert_eq!(context.sequence(), 5);
        assert!(context.commands().is_empty());
        assert!(context.transactions().is_empty());
        assert!(context.events().is_empty());
        assert!(!context.has_result());
        assert!(!context.is_aborted());
        assert!(context.failure().is_none());
        assert_eq!(context.mode(), ContextMode::Normal);
        assert!(!context.expects_result());
    }

    #[test]
    fn single_completion_delivers_attached_result() {
        let (tx, mut rx) = oneshot::channel();
        let mut context = ProcessorContext::new();
        context.reset(0).live(vec![Box::new("cmd")], Completion::Single(tx));
        assert!(context.expects_result());

        context.set_result(42_u64);
        assert!(context.complete());

        let outcome = rx.try_recv().unwrap_or_else(|_| CommandResult::failure(CommandError::Dropped));
        assert!(outcome.is_success());
        let value = outcome.into_result().ok().flatten().and_then(|v| v.downcast::<u64>().ok());
        assert_eq!(value.map(|v| *v), Some(42));
    }

    #[test]
    fn aborted_batch_completes_with_failure() {
        let (tx, mut rx) = oneshot::channel();
        let mut context = ProcessorContext::new();
        context.reset(0).live(Vec::new(), Completion::Batch(tx));

        context.abort(CommandError::Failed("first".to_string()));
        context.abort(CommandError::Failed("second".to_string()));
        assert_eq!(context.mode(), ContextMode::Abort);
        assert!(context.complete());

        let outcome = rx.try_recv().unwrap_or_default();
        assert_eq!(
            outcome.error(),
            Some(&CommandError::Failed("first".to_string()))
        );
    }

    #[test]
    fn barrier_is_abort_mode_and_succeeds() {
        let (tx, mut rx) = oneshot::channel();
        let mut context = ProcessorContext::new();
        context.reset(9).barrier(tx);

        assert_eq!(context.mode(), ContextMode::Abort);
        assert!(context.commands().is_empty());
        assert!(context.complete());
        assert_eq!(rx.try_recv().ok(), Some(EmptyResult::success()));
    }

    #[test]
    fn restore_carries_commit_fields_and_no_future() {
        let time = Utc::now();
        let mut context = ProcessorContext::new();
        context.reset(1).restore(
            Arc::new(NullBus),
            TransactionCommitInfo::new(77, 1, time, vec![Box::new(1_i32), Box::new(2_i32)]),
        );

        assert_eq!(context.mode(), ContextMode::Restore);
        assert_eq!(context.transaction_id(), Some(77));
        assert_eq!(context.event_metadata().map(|m| (m.restore, m.time)), Some((true, time)));
        assert!(context.event_bus().is_some());
        assert_eq!(context.transactions().len(), 2);
        assert!(!context.expects_result());

        assert!(context.complete());
        assert_eq!(context.transaction_id(), Some(77));
    }

    #[test]
    fn destroy_drops_pending_completion() {
        let (tx, mut rx) = oneshot::channel::<EmptyResult>();
        let mut context = ProcessorContext::new();
        context.reset(0).live(vec![Box::new(1_u8)], Completion::Batch(tx));

        context.destroy();

        assert!(rx.try_recv().is_err());
        assert_eq!(context.sequence(), -1);
        assert_eq!(context.commands_mut().capacity(), 0);
    }
}
