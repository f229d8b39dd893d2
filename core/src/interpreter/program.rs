use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::step::{Step, Yield};
use crate::workflows::{ProgramFuture, Workflow};

/// What a program did since it was last resumed.
pub(crate) enum Advance {
    Yielded(Yield),
    Returned(anyhow::Result<JsonValue>),
}

/// A workflow program being driven through one pass.
///
/// Dropping it drops the program future, which is how a pass suspends.
pub(crate) struct Program {
    yields: mpsc::UnboundedReceiver<Yield>,
    running: Option<ProgramFuture>,
}

impl Program {
    pub fn start(workflow: &Workflow, execution_id: &str, params: Option<JsonValue>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let step = Step::new(execution_id, params, tx);
        Self {
            yields: rx,
            running: Some(workflow.start(step)),
        }
    }

    /// Run the program until it yields to the interpreter or returns.
    ///
    /// Queued yields win over completion. Returns `None` once the program has
    /// already returned.
    pub async fn advance(&mut self) -> Option<Advance> {
        let running = self.running.as_mut()?;

        let advance = tokio::select! {
            biased;
            Some(yielded) = self.yields.recv() => Advance::Yielded(yielded),
            returned = running => Advance::Returned(returned),
        };

        if matches!(advance, Advance::Returned(_)) {
            self.running = None;
        }
        Some(advance)
    }
}
