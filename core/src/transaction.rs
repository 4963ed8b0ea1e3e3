//! Committed transactions and the replay-side event bus.
//!
//! Commands, transactions and events travel through the pipeline as opaque
//! boxed values. Stages downcast them to the concrete domain types they know.
//!
//! During replay (crash recovery or follower catch-up) the pipeline is fed
//! [`TransactionCommitInfo`] values that were already decided and journaled.
//! Stages re-apply them and re-emit events through a [`RestoreableEventBus`],
//! tagging each event with [`EventMetadata`] whose `restore` flag is set.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;

/// Opaque command submitted by a caller.
pub type Command = Box<dyn Any + Send>;

/// Opaque transaction action produced by a command (or replayed from the journal).
pub type Transaction = Box<dyn Any + Send>;

/// Opaque domain event emitted while applying transactions.
pub type Event = Box<dyn Any + Send>;

/// Metadata attached to every event published by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMetadata {
    /// Whether the event is being re-emitted during replay
    pub restore: bool,
    /// Commit time of the transaction that produced the event
    pub time: DateTime<Utc>,
}

impl EventMetadata {
    /// Metadata for an event produced by live command processing.
    #[must_use]
    pub const fn live(time: DateTime<Utc>) -> Self {
        Self {
            restore: false,
            time,
        }
    }

    /// Metadata for an event re-emitted while replaying a committed transaction.
    #[must_use]
    pub const fn restored(time: DateTime<Utc>) -> Self {
        Self {
            restore: true,
            time,
        }
    }
}

/// A transaction batch that was already committed to the journal.
pub struct TransactionCommitInfo {
    /// Position of the transaction in the journal
    pub transaction_id: i64,
    /// Model version the transaction was committed under
    pub version: i64,
    /// Commit time
    pub time: DateTime<Utc>,
    /// The transaction actions, in the order they were decided
    pub transaction_commits: Vec<Transaction>,
}

impl TransactionCommitInfo {
    /// Create commit info for a transaction batch.
    #[must_use]
    pub const fn new(
        transaction_id: i64,
        version: i64,
        time: DateTime<Utc>,
        transaction_commits: Vec<Transaction>,
    ) -> Self {
        Self {
            transaction_id,
            version,
            time,
            transaction_commits,
        }
    }

    /// Event metadata to use when replaying this transaction.
    #[must_use]
    pub const fn restore_metadata(&self) -> EventMetadata {
        EventMetadata::restored(self.time)
    }
}

impl fmt::Debug for TransactionCommitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCommitInfo")
            .field("transaction_id", &self.transaction_id)
            .field("version", &self.version)
            .field("time", &self.time)
            .field("transaction_commits", &self.transaction_commits.len())
            .finish()
    }
}

/// Event bus that replay stages publish into.
///
/// The bus is told which transaction is being replayed before events for it are
/// published, so downstream listeners can skip events they have already seen.
pub trait RestoreableEventBus: Send + Sync {
    /// Mark the transaction whose events are about to be published.
    fn current_transaction_id(&self, transaction_id: i64);

    /// Publish one replayed event.
    fn publish_event(&self, event: &Event, metadata: &EventMetadata);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_metadata_is_flagged_and_keeps_commit_time() {
        let time = Utc::now();
        let info = TransactionCommitInfo::new(7, 1, time, vec![Box::new(1_u32)]);

        let metadata = info.restore_metadata();
        assert!(metadata.restore);
        assert_eq!(metadata.time, time);
        assert!(!EventMetadata::live(time).restore);
    }

    #[test]
    fn debug_reports_commit_count() {
        let info = TransactionCommitInfo::new(
            3,
            1,
            Utc::now(),
            vec![Box::new("a"), Box::new("b")],
        );
        let rendered = format!("{info:?}");
        assert!(rendered.contains("transaction_id: 3"));
        assert!(rendered.contains("transaction_commits: 2"));
    }
}
