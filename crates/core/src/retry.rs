//! Bounded retries with exponential backoff for a caller-chosen error class.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            factor: 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("{0}")]
    Permanent(E),
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Self::default()
        }
    }

    /// Delay before the `retry`-th retry (1-based): `initial_delay * factor^(retry - 1)`.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1);
        self.initial_delay
            .saturating_mul(self.factor.saturating_pow(exp))
    }

    /// Runs `op` until it succeeds, fails with an error `is_retryable` rejects, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number. There is no
    /// sleep after the final attempt.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(err) if !is_retryable(&err) => return Err(RetryError::Permanent(err)),
                Err(err) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    })
                }
                Err(err) => {
                    let backoff = self.delay_before_retry(attempt);
                    tracing::warn!(attempt, ?backoff, error = %err, "retryable failure; backing off");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
