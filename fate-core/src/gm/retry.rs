//! Exponential backoff for rate-limited generator calls.

use super::GeneratorError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Wait before retrying after failed attempt `attempt` (1-based):
    /// `2^attempt` base delays plus a jitter below one base delay.
    pub fn backoff<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential = base_ms.saturating_mul(1u64 << attempt.min(20));
        let jitter = if base_ms == 0 {
            0
        } else {
            rng.gen_range(0..base_ms)
        };
        Duration::from_millis(exponential.saturating_add(jitter))
    }

    /// Run `operation`, retrying only rate-limit failures.
    ///
    /// Any other error is returned at once. When the attempts run out the
    /// last rate-limit error is returned.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, GeneratorError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GeneratorError>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Err(GeneratorError::RateLimited) if attempt < self.max_attempts => {
                    let delay = self.backoff(attempt, &mut rand::thread_rng());
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Generator rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
