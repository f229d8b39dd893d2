//! Execution driver
//!
//! The engine ties the interpreter to the ports: every task handed back by a
//! [`Waker`] becomes one interpreter pass, a suspended pass becomes a wake-up
//! request, and a finished pass resolves whoever is waiting on the execution.

mod completion;

pub use completion::ExecutionResult;

use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{EngineError, ExecutionFailure};
use crate::interpreter::{Interpreter, Outcome};
use crate::persistence::StepPersister;
use crate::scheduler::{Scheduler, Waker};
use crate::types::{now_millis, Task};
use crate::workflows::{Workflow, WorkflowRouter};

use completion::CompletionHub;

pub const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_millis(150_000);

/// Options for [`WorkflowEngine::trigger`] and [`WorkflowEngine::trigger_and_wait`].
#[derive(Debug, Clone, Default)]
pub struct TriggerOptions {
    pub execution_id: Option<String>,
    pub params: Option<JsonValue>,
    pub timeout: Option<Duration>,
}

impl TriggerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn params(mut self, params: JsonValue) -> Self {
        self.params = Some(params);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct WorkflowEngine {
    router: WorkflowRouter,
    interpreter: Interpreter,
    scheduler: Arc<dyn Scheduler>,
    completions: CompletionHub,
    trigger_timeout: Duration,
}

/// A running event loop, see [`WorkflowEngine::spawn`].
pub struct EngineHandle {
    shutdown: CancellationToken,
    join: JoinHandle<Result<(), EngineError>>,
}

impl EngineHandle {
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop taking new tasks and wait for the loop to exit.
    pub async fn stop(self) -> Result<(), EngineError> {
        self.shutdown.cancel();
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::Fatal(format!("event loop panicked: {}", e))),
        }
    }
}

impl WorkflowEngine {
    /// Must be called from within a tokio runtime.
    pub fn new(
        router: WorkflowRouter,
        persister: Arc<dyn StepPersister>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            router,
            interpreter: Interpreter::new(persister),
            scheduler,
            completions: CompletionHub::spawn(),
            trigger_timeout: DEFAULT_TRIGGER_TIMEOUT,
        }
    }

    pub fn with_trigger_timeout(mut self, timeout: Duration) -> Self {
        self.trigger_timeout = timeout;
        self
    }

    pub fn router(&self) -> &WorkflowRouter {
        &self.router
    }

    /// Start a new execution and return its id without waiting for it.
    pub async fn trigger(
        &self,
        workflow_id: &str,
        options: TriggerOptions,
    ) -> Result<String, EngineError> {
        if !self.router.contains(workflow_id) {
            return Err(EngineError::UnknownWorkflow(workflow_id.to_string()));
        }

        let execution_id = options
            .execution_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let task = Task::new(workflow_id, execution_id.clone()).with_params(options.params);

        self.scheduler.request_wake_up(task, 0).await?;
        info!(workflow_id, execution_id = %execution_id, "execution triggered");

        Ok(execution_id)
    }

    /// Start a new execution and wait for its final value.
    ///
    /// Timing out only stops the waiting; the execution itself keeps going.
    pub async fn trigger_and_wait(
        &self,
        workflow_id: &str,
        options: TriggerOptions,
    ) -> Result<JsonValue, EngineError> {
        let timeout = options.timeout.unwrap_or(self.trigger_timeout);
        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Subscribe first so a fast execution cannot finish unobserved.
        let done = self.completions.subscribe(&execution_id);
        let triggered = self
            .trigger(
                workflow_id,
                TriggerOptions {
                    execution_id: Some(execution_id.clone()),
                    ..options
                },
            )
            .await;
        if let Err(err) = triggered {
            drop(done);
            self.completions.unsubscribe(&execution_id);
            return Err(err);
        }

        let waited = tokio::time::timeout(timeout, done).await;
        match waited {
            Ok(Ok(result)) => result.map_err(EngineError::from),
            Ok(Err(_)) => Err(EngineError::Shutdown(execution_id)),
            Err(_) => {
                self.completions.unsubscribe(&execution_id);
                Err(EngineError::Timeout {
                    execution_id,
                    timeout_ms: timeout.as_millis(),
                })
            }
        }
    }

    /// Handle one wake-up of an execution.
    #[tracing::instrument(
        skip(self, task),
        fields(workflow_id = %task.workflow_id, execution_id = %task.execution_id)
    )]
    pub async fn handle_task(&self, task: Task) -> Result<(), EngineError> {
        let Some(workflow) = self.router.get(&task.workflow_id) else {
            let err = EngineError::UnknownWorkflow(task.workflow_id.clone());
            warn!("dropping task for unknown workflow");
            self.completions.finish(
                &task.execution_id,
                Err(ExecutionFailure::Fatal(err.to_string())),
            );
            return Err(err);
        };

        let outcome = self
            .interpreter
            .run_pass(&task.execution_id, workflow, task.params.clone())
            .await;

        match outcome {
            Ok(Outcome::Completed(value)) => {
                self.completions.finish(&task.execution_id, Ok(value));
                Ok(())
            }
            Ok(Outcome::Failed(err)) => {
                warn!(error = %err, "execution failed");
                self.completions
                    .finish(&task.execution_id, Err(ExecutionFailure::Failed(err)));
                Ok(())
            }
            Ok(Outcome::Suspended { resume_at }) => {
                let resume_in = resume_at - now_millis();
                debug!(resume_in, "requesting wake-up");
                let execution_id = task.execution_id.clone();
                if let Err(err) = self.scheduler.request_wake_up(task, resume_in).await {
                    error!(error = %err, "failed to schedule wake-up");
                    self.completions
                        .finish(&execution_id, Err(ExecutionFailure::Fatal(err.to_string())));
                    return Err(err.into());
                }
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "execution halted");
                self.completions
                    .finish(&task.execution_id, Err(ExecutionFailure::Fatal(err.to_string())));
                Err(err.into())
            }
        }
    }

    /// Consume tasks from `waker` until `shutdown` fires or the waker closes.
    ///
    /// Each task is handled on its own tokio task and acknowledged once its
    /// pass is over, whatever the outcome. A task whose worker dies before
    /// that point is handed out again by durable wakers.
    pub async fn run<W: Waker>(
        self: Arc<Self>,
        mut waker: W,
        shutdown: CancellationToken,
    ) -> Result<(), EngineError> {
        info!("workflow engine started");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = waker.next_task() => next?,
            };

            let Some(delivery) = next else {
                info!("waker closed");
                break;
            };

            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                // Failures are already logged and delivered to waiters.
                let _ = engine.handle_task(delivery.task.clone()).await;
                if let Err(err) = delivery.complete().await {
                    error!(error = %err, "failed to acknowledge task");
                }
            });
        }

        info!("workflow engine stopped");
        Ok(())
    }

    /// Run the event loop in the background.
    pub fn spawn<W: Waker + 'static>(self: Arc<Self>, waker: W) -> EngineHandle {
        let shutdown = CancellationToken::new();
        let join = tokio::spawn(self.run(waker, shutdown.clone()));
        EngineHandle { shutdown, join }
    }
}

/// Drive one execution to its end in-process, sleeping between passes.
///
/// No scheduler is involved, so pending wake-ups do not survive the process.
pub async fn run_to_completion(
    persister: Arc<dyn StepPersister>,
    workflow: &Workflow,
    execution_id: &str,
    params: Option<JsonValue>,
) -> Result<JsonValue, EngineError> {
    let interpreter = Interpreter::new(persister);

    loop {
        match interpreter
            .run_pass(execution_id, workflow, params.clone())
            .await?
        {
            Outcome::Completed(value) => return Ok(value),
            Outcome::Failed(err) => return Err(EngineError::WorkflowFailed(err)),
            Outcome::Suspended { resume_at } => {
                let wait = (resume_at - now_millis()).max(0);
                tokio::time::sleep(Duration::from_millis(wait.unsigned_abs())).await;
            }
        }
    }
}
