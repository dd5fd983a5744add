use std::fmt::Debug;
use std::future::Future;

use relshape_error::{DbError, Result};
use tracing::warn;

/// Decides if a failed attempt at opening a cursor is retried.
///
/// Only opening (and draining, when buffering) is ever retried. Once rows
/// have been handed out a failure ends the query.
pub trait ExecutionStrategy: Debug + Sync + Send {
    /// `attempt` is the zero based number of the attempt that failed.
    fn should_retry(&self, attempt: usize, error: &DbError) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl ExecutionStrategy for NoRetry {
    fn should_retry(&self, _attempt: usize, _error: &DbError) -> bool {
        false
    }
}

/// Retry transient errors up to a limit.
#[derive(Debug, Clone, Copy)]
pub struct RetryTransient {
    pub max_retries: usize,
}

impl ExecutionStrategy for RetryTransient {
    fn should_retry(&self, attempt: usize, error: &DbError) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}

/// Run `op` until it succeeds or the strategy gives up.
pub fn execute_with_retry<T>(strategy: &dyn ExecutionStrategy, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if strategy.should_retry(attempt, &e) => {
                warn!(%e, attempt, "retrying transient failure");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn execute_with_retry_async<T, F, Fut>(strategy: &dyn ExecutionStrategy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if strategy.should_retry(attempt, &e) => {
                warn!(%e, attempt, "retrying transient failure");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
