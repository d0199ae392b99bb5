//! Failure handling for store I/O and record decoding.
//!
//! Every store call made by the [`PoolManager`](crate::PoolManager) goes
//! through [`FailurePolicy::run`], and every decode failure through
//! [`FailurePolicy::fail`]. The manager never decides on its own whether a
//! backend failure is fatal.

use crate::error::{Error, Result};
use crate::store::StoreError;
use core::future::Future;
use core::time::Duration;

/// What to do when the coordination store fails or a record is corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log the failure and terminate the process with exit status 1.
    #[default]
    Abort,

    /// Return the failure to the caller as an [`Error`].
    Propagate,

    /// Retry store I/O with exponential backoff, then propagate.
    ///
    /// Decode failures are never retried.
    Retry {
        max_attempts: u32,
        base_delay: Duration,
    },
}

impl FailurePolicy {
    /// Runs a store operation under this policy.
    ///
    /// `f` is invoked once per attempt, so it must be safe to repeat.
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = core::result::Result<T, StoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let source = match f().await {
                Ok(value) => return Ok(value),
                Err(source) => source,
            };
            attempt += 1;

            match *self {
                Self::Retry {
                    max_attempts,
                    base_delay,
                } if attempt < max_attempts => {
                    let backoff = backoff_delay(base_delay, attempt);
                    tracing::warn!(
                        op,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Store operation failed, retrying: {source}"
                    );
                    tokio::time::sleep(backoff).await;
                }
                _ => return Err(self.fail(Error::Store { op, source })),
            }
        }
    }

    /// Applies the policy to a non-retryable failure.
    ///
    /// Returns the error unchanged unless the policy is
    /// [`Abort`](Self::Abort), in which case this never returns.
    pub fn fail(&self, err: Error) -> Error {
        match self {
            Self::Abort => abort(&err),
            Self::Propagate | Self::Retry { .. } => err,
        }
    }
}

/// Delay before retry number `attempt` (1-based).
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << attempt.saturating_sub(1).min(16))
}

fn abort(err: &Error) -> ! {
    tracing::error!("Unrecoverable coordination store failure, aborting: {err}");
    eprintln!("fatal: {err}");
    std::process::exit(1)
}
