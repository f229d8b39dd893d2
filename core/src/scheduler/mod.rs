//! Wake-up scheduling.
//!
//! A [`Scheduler`] accepts requests to re-run a task after a delay; the
//! matching [`Waker`] hands tasks back to the engine once they are due.
//! Delivery is at-least-once: a durable waker keeps a handed-out task until
//! its [`Delivery`] is completed, and hands it out again if the claim expires
//! first. Replaying a task is always safe because completed steps come from
//! the cache.

mod local;
mod sqlite;

pub use local::{local_scheduler, LocalScheduler, LocalWaker};
pub use sqlite::{
    QueuedTask, ScheduledTimer, SqliteScheduler, SqliteWaker, DEFAULT_VISIBILITY_TIMEOUT,
};

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::types::Task;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid task params: {0}")]
    Params(#[from] serde_json::Error),

    #[error("task queue closed")]
    Closed,
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Deliver `task` to the waker after `resume_in` milliseconds. Zero or a
    /// negative delay means as soon as possible.
    async fn request_wake_up(&self, task: Task, resume_in: i64) -> Result<(), SchedulerError>;
}

#[async_trait]
pub trait Waker: Send {
    /// Wait for the next due task. `None` means no more tasks will ever arrive.
    async fn next_task(&mut self) -> Result<Option<Delivery>, SchedulerError>;
}

/// Acknowledges a delivered task back to the waker's store.
#[async_trait]
pub trait Receipt: Send + Sync {
    async fn acknowledge(&self) -> Result<(), SchedulerError>;
}

/// A task handed out by a [`Waker`].
///
/// Dropping a delivery without calling [`Delivery::complete`] leaves the task
/// claimed; durable wakers hand it out again once the claim expires.
pub struct Delivery {
    pub task: Task,
    receipt: Option<Box<dyn Receipt>>,
}

impl Delivery {
    /// A delivery with nothing to acknowledge.
    pub fn new(task: Task) -> Self {
        Self {
            task,
            receipt: None,
        }
    }

    pub fn with_receipt(task: Task, receipt: impl Receipt + 'static) -> Self {
        Self {
            task,
            receipt: Some(Box::new(receipt)),
        }
    }

    /// Mark the task as handled.
    pub async fn complete(self) -> Result<(), SchedulerError> {
        match self.receipt {
            Some(receipt) => receipt.acknowledge().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("task", &self.task)
            .field("acknowledged_on_complete", &self.receipt.is_some())
            .finish()
    }
}
