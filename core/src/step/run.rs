use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;

use super::Step;
use crate::errors::{RetryableError, StepError};
use crate::step_response::{RetryPolicy, StepResponse};

impl Step {
    /// Run a side-effecting body once per execution.
    ///
    /// The body's value is cached under the step's positional key; on replay the
    /// cached value is returned and the body is not invoked. A body failing with
    /// [`RetryableError`] is retried by a later pass according to its policy.
    pub async fn run<T, F, Fut>(&self, body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_step(None, body).await
    }

    /// Same as [`Step::run`], cached under an explicit key instead of a positional one.
    pub async fn run_keyed<T, F, Fut>(&self, key: impl Into<String>, body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_step(Some(key.into()), body).await
    }

    pub(super) async fn run_step<T, F, Fut>(&self, key: Option<String>, body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(cached) = self.negotiate(key).await? {
            return match self.replay(cached).await? {
                Some(value) => serde_json::from_value(value)
                    .map_err(|e| StepError::new("DeserializationError", e.to_string())),
                None => Err(StepError::new(
                    "CacheMismatch",
                    "a delay was cached where a step result was expected",
                )),
            };
        }

        let failure = match body().await {
            Ok(value) => match serde_json::to_value(&value) {
                Ok(result) => {
                    self.settle(StepResponse::result(result)).await?;
                    return Ok(value);
                }
                Err(e) => StepResponse::error(
                    StepError::new("SerializationError", e.to_string()),
                    RetryPolicy::default(),
                ),
            },
            Err(err) => {
                let policy = err
                    .downcast_ref::<RetryableError>()
                    .map(RetryableError::policy)
                    .unwrap_or_default();
                StepResponse::error(StepError::from_anyhow(&err), policy)
            }
        };

        let err = match &failure {
            StepResponse::Error { err, .. } => err.clone(),
            _ => StepError::new(StepError::GENERIC, "step failed"),
        };
        // The interpreter either throws the error back or suspends; both end here.
        self.settle(failure).await?;
        Err(err)
    }
}
