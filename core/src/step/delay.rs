use std::time::Duration;

use super::Step;
use crate::errors::StepError;
use crate::step_response::StepResponse;
use crate::types::now_millis;

impl Step {
    /// Suspend the execution until `duration` has passed.
    ///
    /// The wake-up time is fixed the first time the delay is reached; later passes
    /// compare against the cached time, so the program does not wait twice.
    pub async fn delay(&self, duration: Duration) -> Result<(), StepError> {
        self.delay_step(None, duration).await
    }

    pub async fn delay_keyed(&self, key: impl Into<String>, duration: Duration) -> Result<(), StepError> {
        self.delay_step(Some(key.into()), duration).await
    }

    async fn delay_step(&self, key: Option<String>, duration: Duration) -> Result<(), StepError> {
        if let Some(cached) = self.negotiate(key).await? {
            self.replay(cached).await?;
            return Ok(());
        }

        let resume_in = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.settle(StepResponse::delay(now_millis().saturating_add(resume_in)))
            .await
    }
}
