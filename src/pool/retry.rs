//! Bounded retry with linear backoff
//!
//! The pool never loops-and-hopes: every retry sequence is an explicit
//! bounded-attempt call against a policy, returning a typed result.

use std::future::Future;
use std::time::Duration;

/// Linear backoff policy: attempt N waits `base × N` before the next try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    /// Wait unit added per attempt
    pub base: Duration,
    /// Total attempts before giving up
    pub attempts: u32,
}

impl LinearBackoff {
    /// Create a policy from a base delay and an attempt budget
    pub fn new(base: Duration, attempts: u32) -> Self {
        Self {
            base,
            attempts: attempts.max(1),
        }
    }

    /// Delay to sleep after a failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base * attempt
    }
}

/// Run `op` up to the policy's attempt budget, sleeping the policy's delay
/// between failures. Returns the first success, or the last error once the
/// budget is spent.
pub async fn with_retries<T, E, F, Fut>(policy: LinearBackoff, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for attempt in 1..=policy.attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = Some(e);
                if attempt < policy.attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
        }
    }
    // attempts >= 1, so an error was recorded
    Err(last_err.expect("retry budget was zero"))
}
