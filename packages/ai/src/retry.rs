//! Reusable retry-with-backoff policy.
//!
//! Decouples the retry decision (max attempts, backoff schedule, which
//! errors are worth retrying) from the operation being retried, so the
//! assistant engine and any future caller share one implementation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// A bounded exponential-backoff retry policy.
///
/// The delay after the `n`th failed attempt is `base_delay * 2^(n-1)`,
/// so the default assistant policy waits 200 ms then 400 ms between its
/// three attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each subsequent one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// The policy used for assistant engine invocations.
    #[must_use]
    pub const fn assistant() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }

    /// Runs `operation` until it succeeds, a non-retryable error occurs,
    /// or the attempt budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the final error once attempts are exhausted, or the first
    /// error for which `retryable` returns `false`.
    pub async fn run<T, E, F, Fut, P>(&self, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_attempts || !retryable(&e) {
                        if attempt > 1 {
                            log::error!("Giving up after {attempt} attempt(s): {e}");
                        }
                        return Err(e);
                    }

                    let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    log::warn!(
                        "Attempt {attempt}/{} failed: {e}; retrying in {delay:?}",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
