use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::step::Step;

/// A running workflow program, with its return value already encoded as JSON.
pub type ProgramFuture = Pin<Box<dyn Future<Output = anyhow::Result<JsonValue>> + Send>>;

/// A durable workflow program.
///
/// The program is a plain async function of a [`Step`] handle. It is started
/// from the top on every pass, so everything outside step primitives must be
/// deterministic.
///
/// ```rust,ignore
/// let checkout = Workflow::new(|step: Step| async move {
///     let order: Order = step.run(|| async { place_order().await }).await?;
///     step.delay(Duration::from_secs(3600)).await?;
///     step.run(|| async { send_reminder(&order).await }).await?;
///     anyhow::Ok(order.id)
/// });
/// ```
#[derive(Clone)]
pub struct Workflow {
    program: Arc<dyn Fn(Step) -> ProgramFuture + Send + Sync>,
}

impl Workflow {
    pub fn new<F, Fut, T>(program: F) -> Self
    where
        F: Fn(Step) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        Self {
            program: Arc::new(move |step: Step| -> ProgramFuture {
                let running = program(step);
                Box::pin(async move {
                    let value = running.await?;
                    Ok(serde_json::to_value(value)?)
                })
            }),
        }
    }

    pub(crate) fn start(&self, step: Step) -> ProgramFuture {
        (self.program)(step)
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Workflow")
    }
}

/// Workflows known to an engine, by id.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRouter {
    workflows: HashMap<String, Workflow>,
}

impl WorkflowRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`WorkflowRouter::register`].
    pub fn with(mut self, workflow_id: impl Into<String>, workflow: Workflow) -> Self {
        self.register(workflow_id, workflow);
        self
    }

    /// Register a workflow, replacing any previous one with the same id.
    pub fn register(&mut self, workflow_id: impl Into<String>, workflow: Workflow) {
        self.workflows.insert(workflow_id.into(), workflow);
    }

    pub fn get(&self, workflow_id: &str) -> Option<&Workflow> {
        self.workflows.get(workflow_id)
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.workflows.contains_key(workflow_id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
