//! Stage handlers and the ordered stage chain.
//!
//! A stage is anything implementing [`ProcessorHandler`]. Stages are registered
//! in groups through [`PipeProcessor::pipe`](crate::PipeProcessor::pipe); groups
//! run in registration order for every slot, and a slot only becomes visible to
//! a group once the previous group has finished it.
//!
//! # Example
//!
//! ```
//! use txpipe_runtime::handler::{stage_fn, ProcessorHandler};
//!
//! let journal = stage_fn("journal", |context, end_of_batch| {
//!     if !context.is_restore() && end_of_batch {
//!         // flush buffered writes here
//!     }
//! });
//! assert_eq!(journal.name(), "journal");
//! ```

use crate::context::ProcessorContext;
use crate::metrics::PipelineMetrics;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use txpipe_core::CommandError;

/// One processing step applied to every slot.
///
/// Handlers are shared with a dedicated worker thread, hence `&self`; stages
/// that accumulate state across slots own it behind interior mutability.
/// A handler must not block indefinitely, and should flush buffered effects
/// before returning when `end_of_batch` is true.
pub trait ProcessorHandler: Send + Sync {
    /// Stage name used in logs, metrics and fault reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Process one slot.
    fn handle(&self, context: &mut ProcessorContext, end_of_batch: bool);
}

/// A [`ProcessorHandler`] backed by a closure. Built with [`stage_fn`].
pub struct FnHandler<F> {
    name: String,
    handler: F,
}

impl<F> ProcessorHandler for FnHandler<F>
where
    F: Fn(&mut ProcessorContext, bool) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, context: &mut ProcessorContext, end_of_batch: bool) {
        (self.handler)(context, end_of_batch);
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Wrap a closure as a named stage.
pub fn stage_fn<F>(name: impl Into<String>, handler: F) -> Arc<dyn ProcessorHandler>
where
    F: Fn(&mut ProcessorContext, bool) + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        handler,
    })
}

/// Stages registered together by one `pipe` call.
pub(crate) type StageGroup = Vec<Arc<dyn ProcessorHandler>>;

/// The stages one worker runs for every slot, in registration order.
pub(crate) struct GroupRunner {
    stages: StageGroup,
    faults: Arc<AtomicU64>,
}

impl GroupRunner {
    pub(crate) const fn new(stages: StageGroup, faults: Arc<AtomicU64>) -> Self {
        Self { stages, faults }
    }

    /// Run every stage of the group on `context`.
    ///
    /// A panicking stage does not take the worker down: the fault is logged and
    /// counted, the slot is aborted with [`CommandError::StageFault`], and the
    /// remaining stages still see the (now aborted) context.
    pub(crate) fn run(&self, context: &mut ProcessorContext, end_of_batch: bool) {
        for stage in &self.stages {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| stage.handle(context, end_of_batch)));
            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    stage = stage.name(),
                    sequence = context.sequence(),
                    message = %message,
                    "Stage faulted, aborting slot"
                );
                PipelineMetrics::record_stage_fault(stage.name());
                self.faults.fetch_add(1, Ordering::Relaxed);
                context.abort(CommandError::StageFault {
                    stage: stage.name().to_string(),
                    message,
                });
            }
        }
    }

    pub(crate) fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextMode;
    use std::sync::Mutex;

    #[test]
    fn closure_stage_reports_its_name() {
        let stage = stage_fn("publish", |_, _| {});
        assert_eq!(stage.name(), "publish");
    }

    #[test]
    fn default_name_is_type_name() {
        struct Journal;
        impl ProcessorHandler for Journal {
            fn handle(&self, _context: &mut ProcessorContext, _end_of_batch: bool) {}
        }
        assert!(Journal.name().ends_with("Journal"));
    }

    #[test]
    fn runner_invokes_stages_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stages: StageGroup = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                let seen = Arc::clone(&seen);
                stage_fn(name, move |_, end_of_batch| {
                    seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push((name, end_of_batch));
                })
            })
            .collect();
        let runner = GroupRunner::new(stages, Arc::new(AtomicU64::new(0)));

        let mut context = ProcessorContext::new();
        runner.run(&mut context, true);

        let seen = seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        assert_eq!(seen, vec![("a", true), ("b", true), ("c", true)]);
        assert_eq!(runner.names(), vec!["a", "b", "c"]);
    }

    #[test]
    #[allow(clippy::panic)] // Intentional panic to exercise fault handling
    fn panicking_stage_aborts_slot_and_later_stages_still_run() {
        let later_saw_abort = Arc::new(Mutex::new(None));
        let observer = Arc::clone(&later_saw_abort);
        let faults = Arc::new(AtomicU64::new(0));
        let runner = GroupRunner::new(
            vec![
                stage_fn("explode", |_, _| panic!("disk on fire")),
                stage_fn("observe", move |context, _| {
                    *observer.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(context.mode());
                }),
            ],
            Arc::clone(&faults),
        );

        let mut context = ProcessorContext::new();
        runner.run(&mut context, false);

        assert_eq!(faults.load(Ordering::Relaxed), 1);
        assert_eq!(
            context.failure(),
            Some(&CommandError::StageFault {
                stage: "explode".to_string(),
                message: "disk on fire".to_string(),
            })
        );
        assert_eq!(
            *later_saw_abort.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            Some(ContextMode::Abort)
        );
    }
}
