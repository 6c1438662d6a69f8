//! Pending operations
//!
//! Every driver, cache and adapter call runs as a task spawned on an explicit
//! tokio [`Handle`]. The caller holds a [`PendingOp`], which resolves exactly
//! once with the task's result and may be cancelled before that.
//! Cancellation aborts the task; blocking backend calls already in flight
//! finish on their own.

use crate::error::{Error, Result};
use crate::types::PersistenceFailure;
use futures::stream::{self, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

/// Handle to an operation running on an executor
#[must_use = "a pending operation does nothing unless awaited or cancelled"]
#[derive(Debug)]
pub struct PendingOp<T> {
    handle: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> PendingOp<T> {
    /// Spawn an async operation on the given executor
    pub fn spawn<F>(executor: &Handle, fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            handle: executor.spawn(fut),
        }
    }

    /// Spawn a blocking operation on the executor's blocking pool
    pub fn spawn_blocking<F>(executor: &Handle, f: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self {
            handle: executor.spawn_blocking(f),
        }
    }
}

impl<T> PendingOp<T> {
    /// Request cancellation; the operation resolves as `CANCELLED` if it had
    /// not finished yet
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Check if the operation has resolved
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// View the operation as a stream yielding its single result
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        stream::once(self)
    }
}

impl<T> PendingOp<Option<T>> {
    /// View an optional result as a stream of zero or one items
    pub fn into_item_stream(self) -> impl Stream<Item = Result<T>> {
        stream::once(self).filter_map(|result| async move { result.transpose() })
    }
}

impl<T> Future for PendingOp<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().handle)
            .poll(cx)
            .map(|joined| joined.unwrap_or_else(|e| Err(join_failure(e))))
    }
}

fn join_failure(e: JoinError) -> Error {
    if e.is_cancelled() {
        Error::operation_failed(PersistenceFailure::Cancelled)
    } else {
        Error::operation_failed_with(PersistenceFailure::Interrupted, e)
    }
}

/// Await an operation, cancelling it if it exceeds `limit`
pub async fn with_timeout<T>(mut op: PendingOp<T>, limit: Option<Duration>) -> Result<T> {
    let Some(limit) = limit else {
        return op.await;
    };
    match tokio::time::timeout(limit, &mut op).await {
        Ok(result) => result,
        Err(_) => {
            op.cancel();
            Err(Error::operation_failed(PersistenceFailure::Timeout))
        }
    }
}

/// Retry and timeout policy for one call
#[derive(Clone, Copy, Debug, Default)]
pub struct Attempts {
    /// Budget for each attempt
    pub timeout: Option<Duration>,
    /// Extra attempts after a retryable failure
    pub retries: u32,
    /// Give up after the first timed-out attempt
    ///
    /// Set for operations that must not run twice: a timed-out blocking
    /// attempt may still complete after the caller stops waiting.
    pub final_on_timeout: bool,
}

impl Attempts {
    /// Same budget, but a timeout is never retried
    #[must_use]
    pub const fn final_on_timeout(self) -> Self {
        Self {
            final_on_timeout: true,
            ..self
        }
    }

    fn allows_retry(&self, error: &Error, attempt: u32) -> bool {
        error.is_retryable()
            && attempt < self.retries
            && !(self.final_on_timeout
                && error.failure_reason() == Some(PersistenceFailure::Timeout))
    }
}

/// Run an async operation on `executor`, retrying retryable failures
pub async fn run<T, F, Fut>(executor: &Handle, attempts: Attempts, make: F) -> Result<T>
where
    T: Send + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    retry(attempts, || PendingOp::spawn(executor, make())).await
}

/// Run a blocking operation on `executor`, retrying retryable failures
pub async fn run_blocking<T, F>(executor: &Handle, attempts: Attempts, f: F) -> Result<T>
where
    T: Send + 'static,
    F: Fn() -> Result<T> + Clone + Send + 'static,
{
    retry(attempts, || PendingOp::spawn_blocking(executor, f.clone())).await
}

async fn retry<T>(attempts: Attempts, mut start: impl FnMut() -> PendingOp<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match with_timeout(start(), attempts.timeout).await {
            Err(e) if attempts.allows_retry(&e, attempt) => {
                attempt += 1;
                warn!(attempt, error = %e, "Retrying persistence operation");
            }
            result => {
                if attempt > 0 {
                    debug!(attempt, ok = result.is_ok(), "Operation settled after retries");
                }
                return result;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_pending_op_resolves() {
        let op = PendingOp::spawn(&Handle::current(), async { Ok(42) });
        assert_eq!(op.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_cancelled_op_reports_cancelled() {
        let op: PendingOp<()> = PendingOp::spawn(&Handle::current(), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        op.cancel();
        let err = op.await.unwrap_err();
        assert_eq!(err.failure_reason(), Some(PersistenceFailure::Cancelled));
    }

    #[tokio::test]
    async fn test_panicked_op_reports_interrupted() {
        let op: PendingOp<()> = PendingOp::spawn(&Handle::current(), async {
            if true {
                panic!("backend exploded");
            }
            Ok(())
        });
        let err = op.await.unwrap_err();
        assert_eq!(err.failure_reason(), Some(PersistenceFailure::Interrupted));
    }

    #[tokio::test]
    async fn test_timeout_cancels() {
        let op: PendingOp<()> = PendingOp::spawn(&Handle::current(), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        let err = with_timeout(op, Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert_eq!(err.failure_reason(), Some(PersistenceFailure::Timeout));
    }

    #[tokio::test]
    async fn test_retries_retryable_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let attempts = Attempts {
            timeout: None,
            retries: 2,
            final_on_timeout: false,
        };
        let result = run(&Handle::current(), attempts, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::operation_failed(PersistenceFailure::Unavailable))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_conflicts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let attempts = Attempts {
            timeout: None,
            retries: 5,
            final_on_timeout: false,
        };
        let result: Result<()> = run_blocking(&Handle::current(), attempts, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::conflict(
                "T",
                None,
                crate::types::WriteExpectation::MustNotExist,
            ))
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeouts_retried_unless_final() {
        let budget = Attempts {
            timeout: Some(Duration::from_millis(20)),
            retries: 3,
            final_on_timeout: false,
        };
        for (attempts, retried) in [(budget, true), (budget.final_on_timeout(), false)] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let result: Result<()> = run_blocking(&Handle::current(), attempts, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                Ok(())
            })
            .await;
            assert_eq!(
                result.unwrap_err().failure_reason(),
                Some(PersistenceFailure::Timeout)
            );
            tokio::time::sleep(Duration::from_millis(200)).await;
            let calls = calls.load(Ordering::SeqCst);
            if retried {
                assert!(calls > 1, "timeouts were not retried");
            } else {
                assert!(calls <= 1, "timed-out attempt was repeated {calls} times");
            }
        }
    }

    #[tokio::test]
    async fn test_item_stream() {
        let present = PendingOp::spawn(&Handle::current(), async { Ok(Some(7)) });
        let items: Vec<_> = present.into_item_stream().collect().await;
        assert_eq!(items.len(), 1);

        let absent: PendingOp<Option<i32>> =
            PendingOp::spawn(&Handle::current(), async { Ok(None) });
        let items: Vec<_> = absent.into_item_stream().collect().await;
        assert!(items.is_empty());
    }
}
