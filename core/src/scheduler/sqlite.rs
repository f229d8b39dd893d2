use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Delivery, Receipt, Scheduler, SchedulerError, Waker};
use crate::types::{now_millis, Task};

/// Durable scheduler over the `task_queue` and `timers` tables.
///
/// Immediate wake-ups go straight to the queue; delayed ones sit in `timers`
/// until a waker promotes them.
#[derive(Clone)]
pub struct SqliteScheduler {
    pool: SqlitePool,
}

/// How long a handed-out task stays hidden before another waker may take it.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Polls the tables for due work.
///
/// A task is claimed rather than removed: its row stays in `task_queue` with
/// `visible_from` pushed past the visibility timeout, and is deleted when the
/// [`Delivery`] completes.
pub struct SqliteWaker {
    pool: SqlitePool,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

/// Deletes a claimed row, provided the claim is still ours.
struct SqliteReceipt {
    pool: SqlitePool,
    id: i64,
    claimed_until: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub id: i64,
    pub task: Task,
    pub enqueued_at: i64,
    /// Zero until the task is first claimed.
    pub visible_from: i64,
}

impl QueuedTask {
    /// Whether a waker currently holds an unexpired claim on the task.
    pub fn is_claimed(&self, now: i64) -> bool {
        self.visible_from > now
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTimer {
    pub id: i64,
    pub task: Task,
    pub fire_at: i64,
}

fn encode_params(task: &Task) -> Result<Option<String>, SchedulerError> {
    Ok(task.params.as_ref().map(serde_json::to_string).transpose()?)
}

fn task_from_row(row: &SqliteRow) -> Result<Task, SchedulerError> {
    let params: Option<String> = row.try_get("params")?;
    let params = params
        .map(|raw| serde_json::from_str::<JsonValue>(&raw))
        .transpose()?;

    Ok(Task {
        workflow_id: row.try_get("workflow_id")?,
        execution_id: row.try_get("execution_id")?,
        params,
    })
}

impl SqliteScheduler {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn waker(&self, poll_interval: Duration) -> SqliteWaker {
        SqliteWaker::new(self.pool.clone(), poll_interval)
    }

    /// Queued tasks, oldest first, including ones currently claimed.
    pub async fn pending_tasks(&self) -> Result<Vec<QueuedTask>, SchedulerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, execution_id, params, enqueued_at, visible_from
            FROM task_queue
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<QueuedTask, SchedulerError> {
                Ok(QueuedTask {
                    id: row.try_get("id")?,
                    task: task_from_row(row)?,
                    enqueued_at: row.try_get("enqueued_at")?,
                    visible_from: row.try_get("visible_from")?,
                })
            })
            .collect()
    }

    /// Timers not yet promoted, soonest first.
    pub async fn pending_timers(&self) -> Result<Vec<ScheduledTimer>, SchedulerError> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, execution_id, params, fire_at FROM timers ORDER BY fire_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ScheduledTimer, SchedulerError> {
                Ok(ScheduledTimer {
                    id: row.try_get("id")?,
                    task: task_from_row(row)?,
                    fire_at: row.try_get("fire_at")?,
                })
            })
            .collect()
    }

    /// Drop every queued task and timer. Returns how many rows were removed.
    pub async fn purge(&self) -> Result<u64, SchedulerError> {
        let mut tx = self.pool.begin().await?;
        let queued = sqlx::query("DELETE FROM task_queue").execute(&mut *tx).await?;
        let timers = sqlx::query("DELETE FROM timers").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(queued.rows_affected() + timers.rows_affected())
    }
}

#[async_trait]
impl Scheduler for SqliteScheduler {
    async fn request_wake_up(&self, task: Task, resume_in: i64) -> Result<(), SchedulerError> {
        let params = encode_params(&task)?;
        let now = now_millis();

        if resume_in <= 0 {
            sqlx::query(
                r#"
                INSERT INTO task_queue (workflow_id, execution_id, params, enqueued_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&task.workflow_id)
            .bind(&task.execution_id)
            .bind(params)
            .bind(now)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO timers (workflow_id, execution_id, params, fire_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&task.workflow_id)
            .bind(&task.execution_id)
            .bind(params)
            .bind(now.saturating_add(resume_in))
            .execute(&self.pool)
            .await?;
        }

        debug!(
            execution_id = %task.execution_id,
            resume_in,
            "wake-up scheduled"
        );
        Ok(())
    }
}

impl SqliteWaker {
    pub fn new(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    /// Move due timers into the queue.
    async fn promote_due_timers(&self) -> Result<u64, SchedulerError> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO task_queue (workflow_id, execution_id, params, enqueued_at)
            SELECT workflow_id, execution_id, params, fire_at
            FROM timers
            WHERE fire_at <= ?1
            ORDER BY fire_at, id
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let promoted = sqlx::query("DELETE FROM timers WHERE fire_at <= ?1")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(promoted)
    }

    /// Claim the oldest visible task, hiding it for the visibility timeout.
    async fn claim_task(&self) -> Result<Option<Delivery>, SchedulerError> {
        let now = now_millis();
        let window = i64::try_from(self.visibility_timeout.as_millis()).unwrap_or(i64::MAX);
        let claimed_until = now.saturating_add(window);

        let row = sqlx::query(
            r#"
            UPDATE task_queue
            SET visible_from = ?1
            WHERE id = (
                SELECT id FROM task_queue
                WHERE visible_from <= ?2
                ORDER BY id
                LIMIT 1
            )
            RETURNING id, workflow_id, execution_id, params
            "#,
        )
        .bind(claimed_until)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let task = task_from_row(&row)?;
        debug!(task_id = id, execution_id = %task.execution_id, claimed_until, "task claimed");

        Ok(Some(Delivery::with_receipt(
            task,
            SqliteReceipt {
                pool: self.pool.clone(),
                id,
                claimed_until,
            },
        )))
    }
}

#[async_trait]
impl Waker for SqliteWaker {
    async fn next_task(&mut self) -> Result<Option<Delivery>, SchedulerError> {
        loop {
            let promoted = self.promote_due_timers().await?;
            if promoted > 0 {
                debug!(promoted, "promoted due timers");
            }

            if let Some(delivery) = self.claim_task().await? {
                return Ok(Some(delivery));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Receipt for SqliteReceipt {
    async fn acknowledge(&self) -> Result<(), SchedulerError> {
        let removed = sqlx::query("DELETE FROM task_queue WHERE id = ?1 AND visible_from = ?2")
            .bind(self.id)
            .bind(self.claimed_until)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if removed == 0 {
            // The claim expired and another waker took the task over.
            warn!(task_id = self.id, "claim expired before acknowledgement");
        }
        Ok(())
    }
}
