use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::errors::ExecutionFailure;

pub type ExecutionResult = Result<JsonValue, ExecutionFailure>;

type Waiter = oneshot::Sender<ExecutionResult>;

enum Message {
    Subscribe {
        execution_id: String,
        waiter: Waiter,
    },
    Unsubscribe {
        execution_id: String,
    },
    Finish {
        execution_id: String,
        result: ExecutionResult,
    },
}

/// Routes final execution results to whoever is waiting on them.
///
/// The waiter table lives inside a single dispatch task; subscriptions and
/// results travel over one channel, so a subscription registered before an
/// execution is triggered can never miss that execution's result.
#[derive(Clone)]
pub(crate) struct CompletionHub {
    messages: mpsc::UnboundedSender<Message>,
}

impl CompletionHub {
    /// Must be called from within a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(rx));
        Self { messages: tx }
    }

    pub fn subscribe(&self, execution_id: &str) -> oneshot::Receiver<ExecutionResult> {
        let (waiter, done) = oneshot::channel();
        // A closed hub drops the waiter, which its receiver sees as shutdown.
        let _ = self.messages.send(Message::Subscribe {
            execution_id: execution_id.to_string(),
            waiter,
        });
        done
    }

    /// Forget waiters on `execution_id` whose receivers have been dropped.
    pub fn unsubscribe(&self, execution_id: &str) {
        let _ = self.messages.send(Message::Unsubscribe {
            execution_id: execution_id.to_string(),
        });
    }

    pub fn finish(&self, execution_id: &str, result: ExecutionResult) {
        let _ = self.messages.send(Message::Finish {
            execution_id: execution_id.to_string(),
            result,
        });
    }
}

#[derive(Default)]
struct Waiters {
    by_execution: HashMap<String, Vec<Waiter>>,
}

impl Waiters {
    fn subscribe(&mut self, execution_id: String, waiter: Waiter) {
        let list = self.by_execution.entry(execution_id).or_default();
        list.retain(|waiter| !waiter.is_closed());
        list.push(waiter);
    }

    fn unsubscribe(&mut self, execution_id: &str) {
        if let Some(list) = self.by_execution.get_mut(execution_id) {
            list.retain(|waiter| !waiter.is_closed());
            if list.is_empty() {
                self.by_execution.remove(execution_id);
            }
        }
    }

    /// Returns how many waiters were handed the result.
    fn finish(&mut self, execution_id: &str, result: ExecutionResult) -> usize {
        let Some(list) = self.by_execution.remove(execution_id) else {
            return 0;
        };
        debug!(execution_id = %execution_id, waiters = list.len(), "delivering result");
        list.into_iter()
            .map(|waiter| waiter.send(result.clone()))
            .filter(Result::is_ok)
            .count()
    }

    fn executions(&self) -> usize {
        self.by_execution.len()
    }
}

async fn dispatch(mut messages: mpsc::UnboundedReceiver<Message>) {
    let mut waiters = Waiters::default();

    while let Some(message) = messages.recv().await {
        match message {
            Message::Subscribe {
                execution_id,
                waiter,
            } => waiters.subscribe(execution_id, waiter),
            Message::Unsubscribe { execution_id } => {
                waiters.unsubscribe(&execution_id);
                debug!(execution_id = %execution_id, tracked = waiters.executions(), "waiter abandoned");
            }
            Message::Finish {
                execution_id,
                result,
            } => {
                waiters.finish(&execution_id, result);
            }
        }
    }
}
