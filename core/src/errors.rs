//! Error values that cross the step boundary, plus the interpreter and engine error types.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::codec::CodecError;
use crate::persistence::PersistenceError;
use crate::scheduler::SchedulerError;
use crate::step_response::RetryPolicy;

/* ===================== Step errors ===================== */

/// An error as workflow code sees it.
///
/// Step bodies fail with arbitrary `anyhow` errors; those are flattened into a
/// `StepError` before being cached, so a replayed failure re-raises the same
/// name and message as the original run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{name}: {message}")]
pub struct StepError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl StepError {
    pub const GENERIC: &'static str = "Error";

    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.name == RetryableError::NAME
    }

    /// Flatten an author-side error, keeping the cause chain as the stack.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        if let Some(step_error) = err.downcast_ref::<StepError>() {
            return step_error.clone();
        }

        let name = if err.downcast_ref::<RetryableError>().is_some() {
            RetryableError::NAME
        } else {
            Self::GENERIC
        };

        let causes: Vec<String> = err
            .chain()
            .skip(1)
            .map(|cause| format!("caused by: {}", cause))
            .collect();

        Self {
            name: name.to_string(),
            message: err.to_string(),
            stack: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\n"))
            },
        }
    }

    pub(crate) fn detached() -> Self {
        Self::new(
            "DetachedStep",
            "step primitive was awaited outside of an interpreter pass",
        )
    }
}

/// Error a step body returns to ask for another attempt.
///
/// ```rust,ignore
/// step.run(|| async {
///     Err(RetryableError::new("upstream busy", 5, Duration::from_secs(30)).into())
/// })
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RetryableError {
    message: String,
    max_attempts: u32,
    retry_interval: Duration,
}

impl RetryableError {
    pub const NAME: &'static str = "RetryableError";

    pub fn new(message: impl Into<String>, max_attempts: u32, retry_interval: Duration) -> Self {
        Self {
            message: message.into(),
            max_attempts: max_attempts.max(1),
            retry_interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_interval)
    }
}

/* ===================== Interpreter errors ===================== */

#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The program produced something other than a step outcome where one was due.
    #[error("invalid step `{step_key}`: steps must be awaited to completion through a step primitive")]
    InvalidStep { step_key: String },

    /// A primitive broke the key / cache-check / outcome exchange.
    #[error("critical error: {0}")]
    Critical(String),
}

/* ===================== Engine errors ===================== */

/// Terminal failure of an execution, delivered to everyone waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionFailure {
    /// The program let a step error escape.
    #[error("workflow failed: {0}")]
    Failed(StepError),

    /// The execution cannot make progress (protocol violation, storage failure, ...).
    #[error("fatal: {0}")]
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No workflow registered for \"{0}\"")]
    UnknownWorkflow(String),

    #[error("workflow failed: {0}")]
    WorkflowFailed(StepError),

    #[error("execution halted: {0}")]
    Fatal(String),

    #[error("timed out after {timeout_ms}ms waiting for execution `{execution_id}`")]
    Timeout { execution_id: String, timeout_ms: u128 },

    #[error("engine shut down before execution `{0}` finished")]
    Shutdown(String),

    #[error(transparent)]
    Interpreter(#[from] InterpreterError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl From<ExecutionFailure> for EngineError {
    fn from(failure: ExecutionFailure) -> Self {
        match failure {
            ExecutionFailure::Failed(err) => EngineError::WorkflowFailed(err),
            ExecutionFailure::Fatal(message) => EngineError::Fatal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_step_error_from_plain_error() {
        let err = anyhow::anyhow!("Step error");
        let step_error = StepError::from_anyhow(&err);

        assert_eq!(step_error.name, "Error");
        assert_eq!(step_error.message, "Step error");
        assert!(step_error.stack.is_none());
        assert!(!step_error.is_retryable());
    }

    #[test]
    fn test_step_error_keeps_cause_chain() {
        let err = Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            .context("Failed to write report")
            .unwrap_err();
        let step_error = StepError::from_anyhow(&err);

        assert_eq!(step_error.message, "Failed to write report");
        assert_eq!(step_error.stack.as_deref(), Some("caused by: disk full"));
    }

    #[test]
    fn test_step_error_from_retryable_error() {
        let err: anyhow::Error =
            RetryableError::new("Polling reached max retries", 3, Duration::from_millis(5)).into();
        let step_error = StepError::from_anyhow(&err);

        assert_eq!(step_error.name, "RetryableError");
        assert_eq!(step_error.message, "Polling reached max retries");
        assert!(step_error.is_retryable());
    }

    #[test]
    fn test_step_error_survives_rethrow() {
        let original = StepError::new("PaymentDeclined", "card expired");
        let err: anyhow::Error = original.clone().into();

        assert_eq!(StepError::from_anyhow(&err), original);
    }

    #[test]
    fn test_retryable_error_normalizes_zero_attempts() {
        let err = RetryableError::new("nope", 0, Duration::from_millis(1));
        assert_eq!(err.max_attempts(), 1);
        assert_eq!(err.policy().max_attempts, 1);
    }
}
