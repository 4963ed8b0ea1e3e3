//! Error types for the pipe processor.
//!
//! Only lifecycle and configuration problems surface here, synchronously, at
//! the call site. Per-command outcomes are delivered through
//! [`CommandResult`](txpipe_core::CommandResult) on the caller's future.

use crate::ProcessorState;
use thiserror::Error;

/// Errors returned by [`PipeProcessor`](crate::PipeProcessor) operations
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Operation invoked in the wrong lifecycle phase
    ///
    /// `start` while started, `stop`/`process`/`execute`/`sync` while not
    /// started, `start` with no registered stages, or `start` after shutdown.
    #[error("Cannot {operation} while {state}: {reason}")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// Lifecycle state at the time of the call
        state: ProcessorState,
        /// Human readable explanation
        reason: &'static str,
    },

    /// The processor configuration is unusable
    #[error("Invalid pipe processor configuration: {0}")]
    InvalidConfig(String),

    /// The OS refused to spawn a stage worker thread
    #[error("Failed to spawn stage worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

impl ProcessorError {
    pub(crate) const fn invalid_state(
        operation: &'static str,
        state: ProcessorState,
        reason: &'static str,
    ) -> Self {
        Self::InvalidState {
            operation,
            state,
            reason,
        }
    }

    /// Whether this is a lifecycle violation
    #[must_use]
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message_names_operation_and_state() {
        let error = ProcessorError::invalid_state(
            "execute",
            ProcessorState::Stopped,
            "the pipe processor must be started first",
        );
        assert!(error.is_invalid_state());
        assert_eq!(
            error.to_string(),
            "Cannot execute while stopped: the pipe processor must be started first"
        );
    }

    #[test]
    fn config_error_is_not_a_lifecycle_violation() {
        let error = ProcessorError::InvalidConfig("capacity 3 is not a power of two".to_string());
        assert!(!error.is_invalid_state());
    }
}
