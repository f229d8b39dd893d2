//! Step primitives
//!
//! A workflow program only performs side effects through the [`Step`] handle it
//! is given. Each primitive talks to the interpreter over a channel:
//!
//! 1. announce the step key,
//! 2. ask for the cached outcome,
//! 3. report the outcome (a replay of the cached one, or a fresh one).
//!
//! The interpreter answers every message on a oneshot reply, either letting the
//! program continue or throwing a step error back into it. When the interpreter
//! suspends the execution it drops the program, so a primitive never sees a
//! reply to a suspending outcome.

mod delay;
mod poll;
mod run;

pub use poll::PollOptions;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::errors::StepError;
use crate::step_response::StepResponse;

/// One message from a primitive to the interpreter.
pub(crate) struct Yield {
    pub response: StepResponse,
    pub reply: oneshot::Sender<Resume>,
}

/// The interpreter's answer to a [`Yield`].
#[derive(Debug)]
pub(crate) enum Resume {
    Next(Option<StepResponse>),
    Throw(StepError),
}

struct StepContext {
    execution_id: String,
    params: Option<JsonValue>,
    yields: mpsc::UnboundedSender<Yield>,
}

/// Handle passed to a workflow program for the duration of one interpreter pass.
#[derive(Clone)]
pub struct Step {
    inner: Arc<StepContext>,
}

impl Step {
    pub(crate) fn new(
        execution_id: impl Into<String>,
        params: Option<JsonValue>,
        yields: mpsc::UnboundedSender<Yield>,
    ) -> Self {
        Self {
            inner: Arc::new(StepContext {
                execution_id: execution_id.into(),
                params,
                yields,
            }),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.inner.execution_id
    }

    pub fn params(&self) -> Option<&JsonValue> {
        self.inner.params.as_ref()
    }

    /// Decode the execution's params, treating missing params as `null`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        let params = self.inner.params.clone().unwrap_or(JsonValue::Null);
        serde_json::from_value(params).map_err(|e| StepError::new("InvalidParams", e.to_string()))
    }

    pub(crate) async fn exchange(&self, response: StepResponse) -> Result<Resume, StepError> {
        let (reply, resumed) = oneshot::channel();
        self.inner
            .yields
            .send(Yield { response, reply })
            .map_err(|_| StepError::detached())?;
        resumed.await.map_err(|_| StepError::detached())
    }

    /// Announce the step key and fetch the cached outcome, if any.
    pub(crate) async fn negotiate(
        &self,
        key: Option<String>,
    ) -> Result<Option<StepResponse>, StepError> {
        if let Resume::Throw(err) = self.exchange(StepResponse::StepKey { key }).await? {
            return Err(err);
        }
        match self.exchange(StepResponse::CacheCheck).await? {
            Resume::Next(cached) => Ok(cached),
            Resume::Throw(err) => Err(err),
        }
    }

    /// Report a step outcome. Returns once the interpreter lets the program continue.
    pub(crate) async fn settle(&self, outcome: StepResponse) -> Result<(), StepError> {
        match self.exchange(outcome).await? {
            Resume::Next(_) => Ok(()),
            Resume::Throw(err) => Err(err),
        }
    }

    /// Re-emit a cached outcome, then hand back what it stood for.
    pub(crate) async fn replay(&self, cached: StepResponse) -> Result<Option<JsonValue>, StepError> {
        match cached {
            StepResponse::Result { result } => {
                self.settle(StepResponse::result(result.clone())).await?;
                Ok(Some(result))
            }
            StepResponse::Delay { resume_at } => {
                self.settle(StepResponse::delay(resume_at)).await?;
                Ok(None)
            }
            StepResponse::Error { ref err, .. } => {
                let err = err.clone();
                self.settle(cached).await?;
                Err(err)
            }
            other => {
                let kind = other.kind();
                self.settle(other).await?;
                Err(StepError::new(
                    "CacheMismatch",
                    format!("cached `{}` cannot be replayed by a step primitive", kind),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests;
