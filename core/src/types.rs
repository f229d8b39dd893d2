use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Reserved step key under which a program's return value is cached.
pub const WORKFLOW_RESULT_KEY: &str = "$$workflow-result$$";

/// Implicit key for the `index`-th unkeyed step of a pass.
pub fn positional_step_key(index: u32) -> String {
    format!("$$step-index-{}$$", index)
}

/// Wall-clock time in epoch milliseconds, the unit used for every persisted timestamp.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Unit of work handed to a scheduler and back to the engine to (re)invoke an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub workflow_id: String,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

impl Task {
    pub fn new(workflow_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Option<JsonValue>) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepMeta {
    pub attempt: u32,
    pub done: bool,
}

/// Latest cached attempt for an (execution, step key) pair, as returned by a persister.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub payload: String,
    pub meta: StepMeta,
}

/// A single persisted attempt row, used by inspection tooling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub execution_id: String,
    pub step_key: String,
    pub attempt: u32,
    pub done: bool,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn to_cache_record(&self) -> CacheRecord {
        CacheRecord {
            payload: self.payload.clone(),
            meta: StepMeta {
                attempt: self.attempt,
                done: self.done,
            },
        }
    }
}
