//! The messages exchanged between step primitives and the interpreter.
//!
//! Every value that crosses the boundary is a [`StepResponse`]. The persisted
//! kinds (`step-result`, `step-error`, `step-delay`, `workflow-result`,
//! `step-invalid`) are also what the step cache stores, through [`crate::codec`].

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::errors::StepError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 60_000;

/// Recorded with every step error. Only the constant interval is honored when
/// computing the next attempt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    #[default]
    Decay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            backoff_strategy: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_interval_ms: u64::try_from(retry_interval.as_millis()).unwrap_or(u64::MAX),
            backoff_strategy: BackoffStrategy::default(),
        }
    }

    /// Whether another attempt may follow the zero-based `attempt`.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        self.max_attempts > attempt.saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepResponse {
    /// Announces the key of the step about to run. `None` asks for a positional key.
    StepKey {
        #[serde(default)]
        key: Option<String>,
    },

    /// Asks the interpreter for the cached outcome of the announced step.
    CacheCheck,

    #[serde(rename = "step-result")]
    Result {
        #[serde(default)]
        result: JsonValue,
    },

    #[serde(rename = "step-error")]
    Error {
        err: StepError,
        #[serde(rename = "maxAttempts", default = "default_max_attempts")]
        max_attempts: u32,
        #[serde(rename = "retryInterval", default = "default_retry_interval")]
        retry_interval: u64,
        #[serde(rename = "backoffStrategy", default)]
        backoff_strategy: BackoffStrategy,
    },

    #[serde(rename = "step-delay")]
    Delay {
        #[serde(rename = "resumeAt")]
        resume_at: i64,
    },

    WorkflowResult {
        #[serde(default)]
        result: JsonValue,
    },

    #[serde(rename = "step-invalid")]
    Invalid,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_interval() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

impl StepResponse {
    pub fn result(result: JsonValue) -> Self {
        StepResponse::Result { result }
    }

    pub fn error(err: StepError, policy: RetryPolicy) -> Self {
        StepResponse::Error {
            err,
            max_attempts: policy.max_attempts,
            retry_interval: policy.retry_interval_ms,
            backoff_strategy: policy.backoff_strategy,
        }
    }

    pub fn delay(resume_at: i64) -> Self {
        StepResponse::Delay { resume_at }
    }

    /// Wire tag of this response.
    pub fn kind(&self) -> &'static str {
        match self {
            StepResponse::StepKey { .. } => "step-key",
            StepResponse::CacheCheck => "cache-check",
            StepResponse::Result { .. } => "step-result",
            StepResponse::Error { .. } => "step-error",
            StepResponse::Delay { .. } => "step-delay",
            StepResponse::WorkflowResult { .. } => "workflow-result",
            StepResponse::Invalid => "step-invalid",
        }
    }

    /// True for the kinds a primitive may emit after its cache check.
    pub fn is_step_outcome(&self) -> bool {
        matches!(
            self,
            StepResponse::Result { .. } | StepResponse::Error { .. } | StepResponse::Delay { .. }
        )
    }

    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        match self {
            StepResponse::Error {
                max_attempts,
                retry_interval,
                backoff_strategy,
                ..
            } => Some(RetryPolicy {
                max_attempts: *max_attempts,
                retry_interval_ms: *retry_interval,
                backoff_strategy: *backoff_strategy,
            }),
            _ => None,
        }
    }
}
