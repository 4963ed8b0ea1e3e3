//! Per-command outcome wrappers.
//!
//! A domain command that fails while a stage is working on it does not fault the
//! pipeline. The failure is captured into the caller's result wrapper and the
//! pipeline moves on to the next slot.
//!
//! # Example
//!
//! ```
//! use txpipe_core::result::{CommandError, CommandResult};
//!
//! let ok: CommandResult<u64> = CommandResult::success(Some(42));
//! assert!(ok.is_success());
//! assert_eq!(ok.result(), Some(&42));
//!
//! let failed: CommandResult<u64> = CommandResult::failure(CommandError::Failed("no funds".into()));
//! assert!(!failed.is_success());
//! assert!(failed.into_result().is_err());
//! ```

use thiserror::Error;

/// Why a command did not complete successfully.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A stage rejected the command (domain validation, business rule, ...).
    #[error("Command failed: {0}")]
    Failed(String),

    /// A stage panicked while processing the slot holding the command.
    #[error("Stage '{stage}' faulted: {message}")]
    StageFault {
        /// Name of the stage that faulted
        stage: String,
        /// Panic payload rendered as text
        message: String,
    },

    /// The pipeline released the request without ever completing it.
    #[error("Request was dropped by the pipeline before completion")]
    Dropped,

    /// A typed `execute` received a result value of a different type.
    #[error("Unexpected result type, expected {expected}")]
    UnexpectedResultType {
        /// Name of the type the caller asked for
        expected: &'static str,
    },
}

/// Outcome of a single command submitted through `execute`.
///
/// Carries a success flag, the optional value the command produced, and the
/// error when it failed. Exactly one of `result`/`error` is meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult<R> {
    result: Option<R>,
    error: Option<CommandError>,
}

impl<R> CommandResult<R> {
    /// Successful outcome, optionally carrying a value.
    #[must_use]
    pub const fn success(result: Option<R>) -> Self {
        Self {
            result,
            error: None,
        }
    }

    /// Failed outcome.
    #[must_use]
    pub const fn failure(error: CommandError) -> Self {
        Self {
            result: None,
            error: Some(error),
        }
    }

    /// Whether the command succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The value produced by the command, if any
    #[must_use]
    pub const fn result(&self) -> Option<&R> {
        self.result.as_ref()
    }

    /// The failure, if the command failed
    #[must_use]
    pub const fn error(&self) -> Option<&CommandError> {
        self.error.as_ref()
    }

    /// Convert into a standard `Result`.
    ///
    /// # Errors
    ///
    /// Returns the captured [`CommandError`] when the command failed.
    pub fn into_result(self) -> Result<Option<R>, CommandError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }

    /// Transform the carried value, keeping the outcome.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(R) -> U) -> CommandResult<U> {
        CommandResult {
            result: self.result.map(f),
            error: self.error,
        }
    }
}

/// Outcome of a batch submitted through `process`, or of a sync barrier.
///
/// Like [`CommandResult`] but without a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyResult {
    error: Option<CommandError>,
}

impl EmptyResult {
    /// Successful outcome
    #[must_use]
    pub const fn success() -> Self {
        Self { error: None }
    }

    /// Failed outcome
    #[must_use]
    pub const fn failure(error: CommandError) -> Self {
        Self { error: Some(error) }
    }

    /// Whether the batch succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The failure, if the batch failed
    #[must_use]
    pub const fn error(&self) -> Option<&CommandError> {
        self.error.as_ref()
    }

    /// Convert into a standard `Result`.
    ///
    /// # Errors
    ///
    /// Returns the captured [`CommandError`] when the batch failed.
    pub fn into_result(self) -> Result<(), CommandError> {
        self.error.map_or(Ok(()), Err)
    }
}

impl Default for EmptyResult {
    fn default() -> Self {
        Self::success()
    }
}
