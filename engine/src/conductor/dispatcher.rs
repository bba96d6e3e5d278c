//! Execution Dispatcher
//!
//! Walks a session's plan one step per call to [`Dispatcher::step`], which
//! reports what should happen next as a [`NextAction`]. [`Dispatcher::run`]
//! is the plain loop over it.
//!
//! Every state change is checkpointed before control leaves the dispatcher:
//! before a worker is called (step marked `running`), after it returns
//! (step final, cursor advanced), when a step is parked for a human, and
//! when the plan is aggregated. A worker failure fails its step and the plan
//! moves on.

use crate::conductor::aggregator::{terminal_status, Aggregator};
use crate::conductor::capabilities::CapabilityRegistry;
use crate::conductor::context::ExecutionContext;
use crate::conductor::hitl;
use crate::message_bus::MessageBus;
use sdk::capability::{PriorResult, StepInput};
use sdk::errors::EngineError;
use sdk::events::ExecutionEvent;
use sdk::outcome::AggregatedResult;
use sdk::types::{HistoryEntry, InterruptToken, SessionStatus, StepStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Error recorded on a step found `running` when a session is restored
pub const INTERRUPTED: &str = "interrupted before completion";

/// What the caller should do after one dispatch step
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// More steps remain; call again
    Continue,
    /// Parked at a human-approval step
    Suspend(InterruptToken),
    /// The plan is exhausted
    Done(AggregatedResult),
}

pub struct Dispatcher {
    capabilities: Arc<CapabilityRegistry>,
    aggregator: Aggregator,
    bus: Arc<MessageBus>,
    worker_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        capabilities: Arc<CapabilityRegistry>,
        aggregator: Aggregator,
        bus: Arc<MessageBus>,
    ) -> Self {
        Self {
            capabilities,
            aggregator,
            bus,
            worker_timeout: None,
        }
    }

    /// Deadline after which a running worker is aborted and its step failed
    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Dispatch until the session suspends or finishes
    pub async fn run(&self, ctx: &mut ExecutionContext) -> Result<NextAction, EngineError> {
        loop {
            match self.step(ctx).await? {
                NextAction::Continue => continue,
                other => return Ok(other),
            }
        }
    }

    /// Advance the session by at most one step
    ///
    /// Finished sessions return their stored result and parked sessions
    /// their outstanding token, without writing anything.
    pub async fn step(&self, ctx: &mut ExecutionContext) -> Result<NextAction, EngineError> {
        match ctx.state.session.status {
            status if status.is_terminal() => {
                return ctx.state.aggregated.clone().map(NextAction::Done).ok_or_else(|| {
                    EngineError::InvalidState(format!(
                        "session {} is {} but has no result",
                        ctx.session_id(),
                        status
                    ))
                });
            }
            SessionStatus::WaitingHuman => {
                return ctx
                    .state
                    .pending_interrupt
                    .clone()
                    .map(NextAction::Suspend)
                    .ok_or_else(|| {
                        EngineError::InvalidState(format!(
                            "session {} is waiting without a token",
                            ctx.session_id()
                        ))
                    });
            }
            _ => {}
        }

        if ctx.state.plan.is_none() {
            return Err(EngineError::InvalidState(format!(
                "session {} has no plan to dispatch",
                ctx.session_id()
            )));
        }

        if ctx.state.cursor_exhausted() {
            return self.finish(ctx).await.map(NextAction::Done);
        }

        let (status, is_approval) = match ctx.current_step() {
            Some(step) => (step.status, step.is_human_approval()),
            None => {
                return Err(EngineError::InvalidState(format!(
                    "cursor {} is past the plan",
                    ctx.state.cursor
                )))
            }
        };

        match status {
            StepStatus::Pending if is_approval => self.park(ctx).await.map(NextAction::Suspend),
            StepStatus::Pending => {
                self.execute(ctx).await?;
                Ok(NextAction::Continue)
            }
            StepStatus::Running => {
                self.recover_interrupted(ctx).await?;
                Ok(NextAction::Continue)
            }
            other => Err(EngineError::InvalidState(format!(
                "step at cursor {} is already {}",
                ctx.state.cursor, other
            ))),
        }
    }

    async fn park(&self, ctx: &mut ExecutionContext) -> Result<InterruptToken, EngineError> {
        let token = hitl::suspend(&mut ctx.state)?;
        ctx.state
            .history
            .push(HistoryEntry::assistant(token.question.clone()));
        ctx.checkpoint().await?;

        self.bus
            .publish(
                ctx.session_id(),
                ExecutionEvent::HitlWaiting {
                    step_id: token.step_id,
                    question: token.question.clone(),
                    token: token.token.clone(),
                },
            )
            .await;
        Ok(token)
    }

    /// Run the worker for the pending step under the cursor
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let input = self.step_input(ctx)?;

        if let Some(step) = ctx.current_step_mut() {
            step.transition(StepStatus::Running)?;
        }
        // The running mark must be durable before the worker can have effects
        ctx.checkpoint().await?;

        self.bus
            .publish(
                ctx.session_id(),
                ExecutionEvent::StepStarted {
                    step_id: input.step_id,
                    capability: input.capability.clone(),
                    description: input.description.clone(),
                },
            )
            .await;

        debug!(
            "Session {} step {} calling '{}'",
            input.session_id, input.step_id, input.capability
        );
        let started = Instant::now();
        let outcome = self.invoke(input).await;

        let step = ctx
            .current_step_mut()
            .ok_or_else(|| EngineError::InvalidState("step vanished during execution".to_string()))?;
        match outcome {
            Ok(result) => {
                step.transition(StepStatus::Completed)?;
                step.result = Some(result);
                info!(
                    "Step {} ({}) completed in {:.1}s",
                    step.step_id,
                    step.capability,
                    started.elapsed().as_secs_f64()
                );
            }
            Err(error) => {
                step.transition(StepStatus::Failed)?;
                warn!("Step {} ({}) failed: {}", step.step_id, step.capability, error);
                step.error = Some(error);
            }
        }

        self.advance(ctx).await
    }

    /// Fail a step left `running` by a crash; it is never run again
    ///
    /// Workers run at most once. A result the worker produced before the
    /// checkpoint recording it failed is lost, and the step ends `failed`.
    async fn recover_interrupted(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        if let Some(step) = ctx.current_step_mut() {
            warn!(
                "Step {} was running when the session was last saved, marking it failed",
                step.step_id
            );
            step.transition(StepStatus::Failed)?;
            step.error = Some(INTERRUPTED.to_string());
        }
        self.advance(ctx).await
    }

    /// Move past the final step under the cursor and report it
    async fn advance(&self, ctx: &mut ExecutionContext) -> Result<(), EngineError> {
        let Some(step) = ctx.current_step().cloned() else {
            return Ok(());
        };

        ctx.state.cursor += 1;
        let line = match (&step.result, &step.error) {
            (Some(result), _) => format!("Step {} ({}): {}", step.step_id, step.capability, result),
            (None, Some(error)) => format!(
                "Step {} ({}) failed: {}",
                step.step_id, step.capability, error
            ),
            (None, None) => format!("Step {} ({}) {}", step.step_id, step.capability, step.status),
        };
        ctx.state.history.push(HistoryEntry::assistant(line));
        ctx.checkpoint().await?;

        self.bus
            .publish(
                ctx.session_id(),
                ExecutionEvent::StepCompleted {
                    step_id: step.step_id,
                    capability: step.capability,
                    status: step.status,
                    result: step.result,
                    error: step.error,
                },
            )
            .await;
        Ok(())
    }

    async fn finish(&self, ctx: &mut ExecutionContext) -> Result<AggregatedResult, EngineError> {
        let result = self.aggregator.aggregate(&ctx.state).await;
        let status = terminal_status(&result.summary);

        ctx.state.aggregated = Some(result.clone());
        ctx.state.session.status = status;
        ctx.state
            .history
            .push(HistoryEntry::assistant(result.final_answer.clone()));
        ctx.checkpoint().await?;

        info!(
            "Session {} finished as {} ({} of {} steps completed)",
            ctx.session_id(),
            status,
            result.summary.completed_steps,
            result.summary.total_steps
        );
        Ok(result)
    }

    fn step_input(&self, ctx: &ExecutionContext) -> Result<StepInput, EngineError> {
        let plan = ctx
            .state
            .plan
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("no plan".to_string()))?;
        let step = plan
            .steps
            .get(ctx.state.cursor)
            .ok_or_else(|| EngineError::InvalidState("no step at cursor".to_string()))?;

        let prior_results = plan.steps[..ctx.state.cursor]
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .filter_map(|s| {
                s.result.as_ref().map(|result| PriorResult {
                    step_id: s.step_id,
                    capability: s.capability.clone(),
                    result: result.clone(),
                })
            })
            .collect();

        Ok(StepInput {
            session_id: ctx.session_id().to_string(),
            step_id: step.step_id,
            capability: step.capability.clone(),
            description: step.description.clone(),
            request: plan.request.clone(),
            prior_results,
        })
    }

    /// Call the worker on its own task; errors come back as step error text
    ///
    /// A panicking worker fails its step without taking the dispatcher down.
    async fn invoke(&self, input: StepInput) -> Result<String, String> {
        let Some(worker) = self.capabilities.get(&input.capability) else {
            return Err(EngineError::CapabilityNotFound(input.capability).to_string());
        };

        let step_id = input.step_id;
        let mut handle = tokio::spawn(async move { worker.run(&input).await });

        let joined = match self.worker_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(EngineError::WorkerTimeout {
                        step_id,
                        secs: limit.as_secs(),
                    }
                    .to_string());
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(EngineError::Worker(format!("worker task ended abnormally: {}", e)).to_string()),
        }
    }
}
