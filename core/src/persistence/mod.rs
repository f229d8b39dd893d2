//! Step cache storage.
//!
//! The interpreter only needs two operations: read the newest attempt for a
//! step and append a new attempt. Records are append-only; a given
//! (execution, step key, attempt) triple is written at most once.

mod memory;
mod sqlite;

pub use memory::MemoryPersister;
pub use sqlite::SqlitePersister;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{CacheRecord, StepRecord};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("attempt {attempt} of step `{step_key}` already recorded for execution `{execution_id}`")]
    DuplicateAttempt {
        execution_id: String,
        step_key: String,
        attempt: u32,
    },

    #[error("corrupt step record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait StepPersister: Send + Sync {
    /// Newest attempt recorded for the step, whether or not it is done.
    async fn read_step(
        &self,
        execution_id: &str,
        step_key: &str,
    ) -> Result<Option<CacheRecord>, PersistenceError>;

    async fn write_step(
        &self,
        execution_id: &str,
        step_key: &str,
        attempt: u32,
        done: bool,
        payload: &str,
    ) -> Result<(), PersistenceError>;

    /// Every attempt recorded for an execution, in write order.
    async fn list_steps(&self, execution_id: &str) -> Result<Vec<StepRecord>, PersistenceError>;

    /// Drop all records. Returns how many rows were removed.
    async fn delete_all(&self) -> Result<u64, PersistenceError>;
}

#[cfg(test)]
mod tests;
