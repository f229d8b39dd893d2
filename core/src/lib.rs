//! Durable workflows by deterministic replay.
//!
//! A workflow is an async program that performs side effects only through step
//! primitives ([`Step::run`], [`Step::delay`], [`Step::poll`]). Every step
//! outcome is appended to a step cache; when the execution is woken up again,
//! the program starts from the top and completed steps are answered from the
//! cache instead of running twice.

pub mod cli;
pub mod codec;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod interpreter;
pub mod persistence;
pub mod scheduler;
pub mod step;
pub mod step_response;
pub mod types;
pub mod workflows;

// Re-export main types
pub use engine::{run_to_completion, EngineHandle, TriggerOptions, WorkflowEngine};
pub use errors::{EngineError, ExecutionFailure, InterpreterError, RetryableError, StepError};
pub use interpreter::{Interpreter, Outcome};
pub use persistence::{MemoryPersister, SqlitePersister, StepPersister};
pub use scheduler::{local_scheduler, Delivery, Scheduler, SqliteScheduler, Waker};
pub use step::{PollOptions, Step};
pub use step_response::{BackoffStrategy, RetryPolicy, StepResponse};
pub use types::*;
pub use workflows::{Workflow, WorkflowRouter};
