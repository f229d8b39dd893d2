use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use super::{Delivery, Scheduler, SchedulerError, Waker};
use crate::types::Task;

/// In-process scheduler: one tokio timer per pending wake-up.
///
/// Pending wake-ups are lost when the process exits, so deliveries carry
/// nothing to acknowledge.
#[derive(Clone)]
pub struct LocalScheduler {
    queue: mpsc::UnboundedSender<Task>,
}

pub struct LocalWaker {
    queue: mpsc::UnboundedReceiver<Task>,
}

pub fn local_scheduler() -> (LocalScheduler, LocalWaker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LocalScheduler { queue: tx }, LocalWaker { queue: rx })
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn request_wake_up(&self, task: Task, resume_in: i64) -> Result<(), SchedulerError> {
        if resume_in <= 0 {
            return self.queue.send(task).map_err(|_| SchedulerError::Closed);
        }

        let queue = self.queue.clone();
        let delay = Duration::from_millis(resume_in.unsigned_abs());
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if queue.send(task).is_err() {
                warn!("waker dropped before a scheduled wake-up fired");
            }
        });
        Ok(())
    }
}

#[async_trait]
impl Waker for LocalWaker {
    async fn next_task(&mut self) -> Result<Option<Delivery>, SchedulerError> {
        Ok(self.queue.recv().await.map(Delivery::new))
    }
}
