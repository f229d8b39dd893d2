use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{PersistenceError, StepPersister};
use crate::types::{CacheRecord, StepRecord};

/// Process-local step cache, for tests and single-process runs.
///
/// Attempts are kept per execution in write order, so the newest attempt for a
/// key is the last matching entry.
#[derive(Clone, Default)]
pub struct MemoryPersister {
    executions: Arc<RwLock<HashMap<String, Vec<StepRecord>>>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Lock(e.to_string())
}

#[async_trait]
impl StepPersister for MemoryPersister {
    async fn read_step(
        &self,
        execution_id: &str,
        step_key: &str,
    ) -> Result<Option<CacheRecord>, PersistenceError> {
        let executions = self.executions.read().map_err(lock_error)?;
        Ok(executions.get(execution_id).and_then(|records| {
            records
                .iter()
                .rev()
                .find(|record| record.step_key == step_key)
                .map(StepRecord::to_cache_record)
        }))
    }

    async fn write_step(
        &self,
        execution_id: &str,
        step_key: &str,
        attempt: u32,
        done: bool,
        payload: &str,
    ) -> Result<(), PersistenceError> {
        let mut executions = self.executions.write().map_err(lock_error)?;
        let records = executions.entry(execution_id.to_string()).or_default();

        if records
            .iter()
            .any(|record| record.step_key == step_key && record.attempt == attempt)
        {
            return Err(PersistenceError::DuplicateAttempt {
                execution_id: execution_id.to_string(),
                step_key: step_key.to_string(),
                attempt,
            });
        }

        records.push(StepRecord {
            execution_id: execution_id.to_string(),
            step_key: step_key.to_string(),
            attempt,
            done,
            payload: payload.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_steps(&self, execution_id: &str) -> Result<Vec<StepRecord>, PersistenceError> {
        let executions = self.executions.read().map_err(lock_error)?;
        Ok(executions.get(execution_id).cloned().unwrap_or_default())
    }

    async fn delete_all(&self) -> Result<u64, PersistenceError> {
        let mut executions = self.executions.write().map_err(lock_error)?;
        let removed = executions.values().map(Vec::len).sum::<usize>();
        executions.clear();
        Ok(removed as u64)
    }
}
