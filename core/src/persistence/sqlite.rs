use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use super::{PersistenceError, StepPersister};
use crate::types::{now_millis, CacheRecord, StepMeta, StepRecord};

/// Step cache backed by the `step_responses` table (see `migrations/`).
#[derive(Clone)]
pub struct SqlitePersister {
    pool: SqlitePool,
}

impl SqlitePersister {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn attempt_from_row(row: &SqliteRow) -> Result<u32, PersistenceError> {
    let attempt: i64 = row.try_get("step_attempt")?;
    u32::try_from(attempt)
        .map_err(|_| PersistenceError::Corrupt(format!("step attempt {} out of range", attempt)))
}

fn step_record_from_row(row: &SqliteRow) -> Result<StepRecord, PersistenceError> {
    let created_at: i64 = row.try_get("created_at")?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(created_at)
        .ok_or_else(|| PersistenceError::Corrupt(format!("created_at {} out of range", created_at)))?;

    Ok(StepRecord {
        execution_id: row.try_get("execution_id")?,
        step_key: row.try_get("step_key")?,
        attempt: attempt_from_row(row)?,
        done: row.try_get("step_done")?,
        payload: row.try_get("step_response")?,
        created_at,
    })
}

#[async_trait]
impl StepPersister for SqlitePersister {
    async fn read_step(
        &self,
        execution_id: &str,
        step_key: &str,
    ) -> Result<Option<CacheRecord>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT step_attempt, step_done, step_response
            FROM step_responses
            WHERE execution_id = ?1 AND step_key = ?2
            ORDER BY step_attempt DESC
            LIMIT 1
            "#,
        )
        .bind(execution_id)
        .bind(step_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(CacheRecord {
                payload: row.try_get("step_response")?,
                meta: StepMeta {
                    attempt: attempt_from_row(&row)?,
                    done: row.try_get("step_done")?,
                },
            })),
            None => Ok(None),
        }
    }

    async fn write_step(
        &self,
        execution_id: &str,
        step_key: &str,
        attempt: u32,
        done: bool,
        payload: &str,
    ) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO step_responses
                (execution_id, step_key, step_attempt, step_done, step_response, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(execution_id)
        .bind(step_key)
        .bind(i64::from(attempt))
        .bind(done)
        .bind(payload)
        .bind(now_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(PersistenceError::DuplicateAttempt {
                    execution_id: execution_id.to_string(),
                    step_key: step_key.to_string(),
                    attempt,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_steps(&self, execution_id: &str) -> Result<Vec<StepRecord>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, step_key, step_attempt, step_done, step_response, created_at
            FROM step_responses
            WHERE execution_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(step_record_from_row).collect()
    }

    async fn delete_all(&self) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM step_responses")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
