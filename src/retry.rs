use std::{future::Future, time::Duration};

use tracing::warn;

use crate::generation::GenerationError;

/// Bounded retry of transient generation failures with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Why [`RetryPolicy::run`] gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last: GenerationError },
    /// A non-retryable failure; returned on the attempt it occurred.
    Permanent(GenerationError),
}

impl RetryPolicy {
    /// Call `op` until it succeeds, fails permanently, or the attempt budget
    /// is spent. `op` receives the 1-based attempt number. The delay runs
    /// on the tokio timer and only between attempts.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    return Err(RetryError::Permanent(e));
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "generation overloaded");
                    if attempt >= max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: e,
                        });
                    }
                }
            }
            tokio::time::sleep(self.backoff).await;
            attempt += 1;
        }
    }
}
