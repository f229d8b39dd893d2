//! Replay interpreter
//!
//! One call to [`Interpreter::run_pass`] starts the workflow program from the
//! top and drives it until it returns, fails, or reaches a step that cannot
//! complete yet. Steps that already have a finished record in the cache are
//! satisfied from it; the first unfinished step runs for real and its outcome
//! is appended to the cache.
//!
//! Step keys are either explicit or positional (`$$step-index-N$$`, counted per
//! pass). Positional keys assume the program reaches its steps in the same
//! order on every pass.

mod program;

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec;
use crate::errors::{InterpreterError, StepError};
use crate::persistence::StepPersister;
use crate::step::Resume;
use crate::step_response::StepResponse;
use crate::types::{now_millis, positional_step_key, WORKFLOW_RESULT_KEY};
use crate::workflows::Workflow;

use program::{Advance, Program};

/// How a pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The program returned; its value is cached under the workflow result key.
    Completed(JsonValue),
    /// A step is waiting for a delay or a retry; run another pass at `resume_at`.
    Suspended { resume_at: i64 },
    /// The program let a step error escape. Nothing is cached for it.
    Failed(StepError),
}

/// Where the program stopped when the interpreter picked a step key.
enum Frontier {
    Step(tokio::sync::oneshot::Sender<Resume>),
    Returned(JsonValue),
}

pub struct Interpreter {
    persister: Arc<dyn StepPersister>,
}

impl Interpreter {
    pub fn new(persister: Arc<dyn StepPersister>) -> Self {
        Self { persister }
    }

    pub fn persister(&self) -> &Arc<dyn StepPersister> {
        &self.persister
    }

    pub async fn run_pass(
        &self,
        execution_id: &str,
        workflow: &Workflow,
        params: Option<JsonValue>,
    ) -> Result<Outcome, InterpreterError> {
        let mut program = Program::start(workflow, execution_id, params);
        let mut next_index: u32 = 0;

        loop {
            let advance = program
                .advance()
                .await
                .ok_or_else(|| critical("program resumed after it returned"))?;

            let (step_key, frontier) = match advance {
                Advance::Returned(Err(err)) => {
                    let err = StepError::from_anyhow(&err);
                    info!(execution_id, error = %err, "workflow failed");
                    return Ok(Outcome::Failed(err));
                }
                Advance::Returned(Ok(value)) => {
                    (WORKFLOW_RESULT_KEY.to_string(), Frontier::Returned(value))
                }
                Advance::Yielded(yielded) => match yielded.response {
                    StepResponse::StepKey { key } => {
                        let key = key.unwrap_or_else(|| {
                            let key = positional_step_key(next_index);
                            next_index += 1;
                            key
                        });
                        (key, Frontier::Step(yielded.reply))
                    }
                    other => {
                        return Err(critical(format!(
                            "step runners must announce a step key first, got `{}`",
                            other.kind()
                        )))
                    }
                },
            };

            let record = self.persister.read_step(execution_id, &step_key).await?;
            let attempt = record.as_ref().map_or(0, |record| record.meta.attempt + 1);
            let cached = record
                .filter(|record| record.meta.done)
                .map(|record| codec::deserialize(&record.payload))
                .transpose()?;
            let is_cached = cached.is_some();

            let (response, reply) = match frontier {
                Frontier::Returned(value) => (StepResponse::WorkflowResult { result: value }, None),
                Frontier::Step(key_ack) => {
                    let _ = key_ack.send(Resume::Next(None));
                    self.exchange_cache(&mut program, &step_key, cached).await?
                }
            };

            let needs_retry = !is_cached
                && response
                    .retry_policy()
                    .is_some_and(|policy| policy.allows_retry_after(attempt));

            if is_cached {
                debug!(execution_id, step_key = %step_key, "step replayed from cache");
            } else {
                let payload = codec::serialize(&response)?;
                self.persister
                    .write_step(execution_id, &step_key, attempt, !needs_retry, &payload)
                    .await?;
                debug!(
                    execution_id,
                    step_key = %step_key,
                    attempt,
                    kind = response.kind(),
                    done = !needs_retry,
                    "step recorded"
                );
            }

            match response {
                StepResponse::WorkflowResult { result } => {
                    info!(execution_id, "workflow completed");
                    return Ok(Outcome::Completed(result));
                }
                StepResponse::Invalid => {
                    warn!(execution_id, step_key = %step_key, "invalid step, halting execution");
                    return Err(InterpreterError::InvalidStep { step_key });
                }
                StepResponse::Error {
                    err,
                    retry_interval,
                    ..
                } => {
                    if needs_retry {
                        let resume_at = now_millis()
                            .saturating_add(i64::try_from(retry_interval).unwrap_or(i64::MAX));
                        info!(execution_id, step_key = %step_key, attempt, resume_at, "step failed, retry scheduled");
                        return Ok(Outcome::Suspended { resume_at });
                    }
                    // The program may catch the error and keep going.
                    if let Some(reply) = reply {
                        let _ = reply.send(Resume::Throw(err));
                    }
                }
                StepResponse::Delay { resume_at } => {
                    if resume_at > now_millis() {
                        debug!(execution_id, step_key = %step_key, resume_at, "execution suspended");
                        return Ok(Outcome::Suspended { resume_at });
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(Resume::Next(None));
                    }
                }
                StepResponse::Result { .. } => {
                    if let Some(reply) = reply {
                        let _ = reply.send(Resume::Next(None));
                    }
                }
                StepResponse::StepKey { .. } | StepResponse::CacheCheck => {
                    return Err(critical(format!(
                        "step `{}` produced `{}` as its outcome",
                        step_key,
                        response.kind()
                    )));
                }
            }
        }
    }

    /// Answer the primitive's cache check and collect its outcome.
    ///
    /// Anything other than a step outcome in the last position (another
    /// primitive's key, or the program returning) turns the step invalid.
    async fn exchange_cache(
        &self,
        program: &mut Program,
        step_key: &str,
        cached: Option<StepResponse>,
    ) -> Result<(StepResponse, Option<tokio::sync::oneshot::Sender<Resume>>), InterpreterError> {
        match program.advance().await {
            Some(Advance::Yielded(yielded)) => match yielded.response {
                StepResponse::CacheCheck => {
                    let _ = yielded.reply.send(Resume::Next(cached));
                }
                other => {
                    return Err(critical(format!(
                        "step runners must yield a cache check after the step key of `{}`, got `{}`",
                        step_key,
                        other.kind()
                    )))
                }
            },
            Some(Advance::Returned(_)) | None => {
                return Err(critical(format!(
                    "program returned before checking the cache for `{}`",
                    step_key
                )))
            }
        }

        match program.advance().await {
            Some(Advance::Yielded(yielded)) if yielded.response.is_step_outcome() => {
                Ok((yielded.response, Some(yielded.reply)))
            }
            Some(Advance::Yielded(yielded)) => {
                warn!(step_key, got = yielded.response.kind(), "step did not report an outcome");
                Ok((StepResponse::Invalid, None))
            }
            Some(Advance::Returned(_)) | None => {
                warn!(step_key, "program moved on before the step reported an outcome");
                Ok((StepResponse::Invalid, None))
            }
        }
    }
}

fn critical(message: impl Into<String>) -> InterpreterError {
    InterpreterError::Critical(message.into())
}
