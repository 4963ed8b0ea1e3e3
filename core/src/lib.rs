//! # Txpipe Core
//!
//! Core types shared by every stage of the txpipe transaction pipeline.
//!
//! ## Core Concepts
//!
//! - **Entity Repository**: type-indexed store of domain entities keyed by a
//!   global identity, with O(1) point-in-time snapshots for checkpointing
//! - **Command results**: per-command outcome wrappers; domain failures travel
//!   inside them instead of faulting the pipeline
//! - **Committed transactions**: already-journaled batches replayed through the
//!   pipeline for recovery and follower catch-up
//!
//! ## Example
//!
//! ```
//! use txpipe_core::repository::EntityRepository;
//!
//! struct Order { size: u32 }
//!
//! let mut repository = EntityRepository::new();
//! repository.store(10, Order { size: 5 });
//! assert_eq!(repository.entities::<Order>().len(), 1);
//! ```

/// Type-indexed entity store
pub mod repository;

/// Command and batch outcome wrappers
pub mod result;

/// Committed transactions, event metadata and the replay event bus
pub mod transaction;

pub use repository::{EntityId, EntityRepository, RepositorySnapshot};
pub use result::{CommandError, CommandResult, EmptyResult};
pub use transaction::{
    Command, Event, EventMetadata, RestoreableEventBus, Transaction, TransactionCommitInfo,
};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
