use std::future::Future;
use std::time::Duration;

use super::Step;
use crate::errors::{RetryableError, StepError};

/// How often, and how many times, [`Step::poll`] evaluates its predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

impl PollOptions {
    pub fn new(max_attempts: u32, retry_interval: Duration) -> Self {
        Self {
            max_attempts,
            retry_interval,
        }
    }
}

impl Step {
    /// Wait until `predicate` holds, evaluating it at most `max_attempts` times.
    ///
    /// A false predicate is recorded as a retryable failure, so the next
    /// evaluation happens in a later pass after `retry_interval`. Once the budget
    /// is spent the step fails with `"Polling reached max retries"`.
    pub async fn poll<F, Fut>(&self, options: PollOptions, predicate: F) -> Result<(), StepError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<bool>>,
    {
        self.poll_step(None, options, predicate).await
    }

    pub async fn poll_keyed<F, Fut>(
        &self,
        key: impl Into<String>,
        options: PollOptions,
        predicate: F,
    ) -> Result<(), StepError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<bool>>,
    {
        self.poll_step(Some(key.into()), options, predicate).await
    }

    async fn poll_step<F, Fut>(
        &self,
        key: Option<String>,
        options: PollOptions,
        predicate: F,
    ) -> Result<(), StepError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<bool>>,
    {
        self.run_step(key, move || async move {
            if !predicate().await? {
                return Err(anyhow::Error::new(RetryableError::new(
                    "Polling reached max retries",
                    options.max_attempts,
                    options.retry_interval,
                )));
            }
            anyhow::Ok(())
        })
        .await
    }
}
