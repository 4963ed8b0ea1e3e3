//! Futures handed back to callers of `process` and `execute`.
//!
//! Both resolve once the slot carrying the request has passed the terminal
//! step of the pipeline. They never fail at the `Future` level: a request the
//! pipeline released without completing resolves as [`CommandError::Dropped`].
//! Callers that need a timeout wrap the future themselves, e.g. with
//! `tokio::time::timeout`.

use crate::context::AnyResult;
use std::any::{Any, type_name};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use txpipe_core::{CommandError, CommandResult, EmptyResult};

/// Completion of a batch submitted with `process` (or of a sync barrier).
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct ProcessFuture {
    receiver: oneshot::Receiver<EmptyResult>,
}

impl ProcessFuture {
    pub(crate) const fn new(receiver: oneshot::Receiver<EmptyResult>) -> Self {
        Self { receiver }
    }

    /// Block the current thread until the batch completes.
    ///
    /// Must not be called from a stage handler: the slot it waits for can only
    /// complete after the handler returns.
    pub fn wait(self) -> EmptyResult {
        futures::executor::block_on(self)
    }
}

impl Future for ProcessFuture {
    type Output = EmptyResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| EmptyResult::failure(CommandError::Dropped)))
    }
}

/// Typed result of a single command submitted with `execute`.
#[must_use = "futures do nothing unless awaited"]
pub struct ExecuteFuture<R> {
    receiver: oneshot::Receiver<AnyResult>,
    _result: PhantomData<fn() -> R>,
}

impl<R: Any> ExecuteFuture<R> {
    pub(crate) const fn new(receiver: oneshot::Receiver<AnyResult>) -> Self {
        Self {
            receiver,
            _result: PhantomData,
        }
    }

    /// Block the current thread until the command completes.
    ///
    /// Must not be called from a stage handler.
    pub fn wait(self) -> CommandResult<R> {
        futures::executor::block_on(self)
    }

    fn downcast(received: Result<AnyResult, oneshot::error::RecvError>) -> CommandResult<R> {
        let Ok(result) = received else {
            return CommandResult::failure(CommandError::Dropped);
        };
        match result.into_result() {
            Err(error) => CommandResult::failure(error),
            Ok(None) => CommandResult::success(None),
            Ok(Some(value)) => match value.downcast::<R>() {
                Ok(value) => CommandResult::success(Some(*value)),
                Err(_) => CommandResult::failure(CommandError::UnexpectedResultType {
                    expected: type_name::<R>(),
                }),
            },
        }
    }
}

impl<R: Any> Future for ExecuteFuture<R> {
    type Output = CommandResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(Self::downcast)
    }
}

impl<R> std::fmt::Debug for ExecuteFuture<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteFuture")
            .field("result", &type_name::<R>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_future_resolves_with_sent_outcome() {
        let (tx, rx) = oneshot::channel();
        let future = ProcessFuture::new(rx);
        let _ = tx.send(EmptyResult::success());
        assert!(future.await.is_success());
    }

    #[tokio::test]
    async fn dropped_sender_resolves_as_dropped() {
        let (tx, rx) = oneshot::channel::<EmptyResult>();
        drop(tx);
        let outcome = ProcessFuture::new(rx).await;
        assert_eq!(outcome.error(), Some(&CommandError::Dropped));

        let (tx, rx) = oneshot::channel::<AnyResult>();
        drop(tx);
        let outcome = ExecuteFuture::<u32>::new(rx).await;
        assert_eq!(outcome.error(), Some(&CommandError::Dropped));
    }

    #[tokio::test]
    async fn execute_future_downcasts_value() {
        let (tx, rx) = oneshot::channel::<AnyResult>();
        let _ = tx.send(CommandResult::success(Some(Box::new(5_u64) as Box<dyn Any + Send>)));
        let outcome = ExecuteFuture::<u64>::new(rx).await;
        assert_eq!(outcome.result(), Some(&5));
    }

    #[test]
    fn process_future_is_pending_until_completed() {
        let (tx, rx) = oneshot::channel();
        let mut future = tokio_test::task::spawn(ProcessFuture::new(rx));
        tokio_test::assert_pending!(future.poll());

        let _ = tx.send(EmptyResult::success());
        assert!(future.is_woken());
        let outcome = tokio_test::assert_ready!(future.poll());
        assert!(outcome.is_success());
    }

    #[test]
    fn execute_future_reports_type_mismatch() {
        let (tx, rx) = oneshot::channel::<AnyResult>();
        let _ = tx.send(CommandResult::success(Some(Box::new("text") as Box<dyn Any + Send>)));
        let outcome = ExecuteFuture::<u64>::new(rx).wait();
        assert_eq!(
            outcome.error(),
            Some(&CommandError::UnexpectedResultType { expected: "u64" })
        );
    }

    #[test]
    fn execute_future_passes_failures_through() {
        let (tx, rx) = oneshot::channel::<AnyResult>();
        let _ = tx.send(CommandResult::failure(CommandError::Failed("invalid".to_string())));
        let outcome = ExecuteFuture::<u64>::new(rx).wait();
        assert!(!outcome.is_success());
    }
}
