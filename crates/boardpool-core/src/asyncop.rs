//! Bounded-time asynchronous operations.
//!
//! Hardware operations (power cycles, boot-config changes) are slow and can
//! wedge entirely when a board is misbehaving. [`AsyncOp`] wraps such work
//! with a declared maximum duration and offers two invocation styles:
//!
//! - [`AsyncOp::run`] for callers that need a definite answer now: the work
//!   runs to completion or the call returns a timeout error, leaving the
//!   work orphaned in the background with its eventual result discarded.
//! - [`AsyncOp::start`] for fire-and-forget use from state handlers: the
//!   callback is invoked with the result only if the work finishes before
//!   the deadline captured at start time; a late result is silently dropped
//!   and no error is raised to anyone.
//!
//! The orphaned-work trade-off is deliberate: the polling driver must never
//! be held hostage by hardware flakiness, so bounded latency wins over
//! total work cleanup.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::CoreError;

/// A declared-maximum-duration wrapper for slow operations.
#[derive(Debug, Clone, Copy)]
pub struct AsyncOp {
    max_time: Duration,
}

impl AsyncOp {
    /// Create an operation wrapper with the given maximum duration.
    #[must_use]
    pub const fn new(max_time: Duration) -> Self {
        Self { max_time }
    }

    /// The declared maximum duration.
    #[must_use]
    pub const fn max_time(&self) -> Duration {
        self.max_time
    }

    /// Run `work` to completion, or fail with `OperationTimeout` once the
    /// maximum duration has elapsed.
    ///
    /// On timeout the spawned work is left running; its result, if any, is
    /// discarded. A panicking operation is logged and reported as a timeout,
    /// since no result will ever arrive.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::OperationTimeout` if the work does not complete
    /// in time.
    pub async fn run<F, T>(&self, work: F) -> Result<T, CoreError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::spawn(work);
        match tokio::time::timeout(self.max_time, handle).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(join_error)) => {
                tracing::error!(error = %join_error, "async operation panicked");
                Err(CoreError::OperationTimeout {
                    limit: self.max_time,
                })
            }
            Err(_elapsed) => Err(CoreError::OperationTimeout {
                limit: self.max_time,
            }),
        }
    }

    /// Start `work` in the background. `callback` is invoked with the result
    /// only if the work completes before the deadline captured now; a result
    /// arriving later is dropped without notice.
    ///
    /// This method never blocks and never reports an error to the caller; a
    /// panicking operation is logged and delivers nothing.
    pub fn start<F, T>(&self, work: F, callback: impl FnOnce(T) + Send + 'static)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let callback_before = Instant::now() + self.max_time;
        let handle = tokio::spawn(work);
        tokio::spawn(async move {
            let result = match handle.await {
                Ok(value) => value,
                Err(join_error) => {
                    tracing::error!(error = %join_error, "panic ignored in async operation");
                    return;
                }
            };
            if Instant::now() < callback_before {
                callback(result);
            } else {
                tracing::warn!("async operation finished after its deadline; result dropped");
            }
        });
    }
}
