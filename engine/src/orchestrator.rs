//! Orchestrator
//!
//! Ties the session registry, plan compiler, dispatcher and event bus
//! together behind [`SessionHandleImpl`]. Every operation that moves a
//! session forward (a new turn, a dispatch, a resume) holds that session's
//! run lock for its whole duration; reads and deletes never take it.

use crate::conductor::dispatcher::NextAction;
use crate::conductor::output;
use crate::conductor::{
    Aggregator, CapabilityRegistry, Dispatcher, ExecutionContext, PlanCompiler,
};
use crate::config::{Config, LLMConfig, OrchestratorConfig};
use crate::db::{CheckpointStore, Database};
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::LLMProvider;
use crate::message_bus::MessageBus;
use crate::registry::SessionRegistry;
use anyhow::Context;
use async_trait::async_trait;
use sdk::errors::{EngineError, EngineErrorExt};
use sdk::events::ExecutionEvent;
use sdk::handle::{SessionHandle, SessionHandleImpl, TurnOutcome, TurnRequest};
use sdk::outcome::{OutputFormat, RenderedOutput};
use sdk::types::{
    CheckpointInfo, HistoryEntry, HistoryPage, Plan, ResumeInput, Session, SessionFilter,
    SessionState, SessionStatus, MAX_HISTORY_LIMIT,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct Orchestrator {
    registry: SessionRegistry,
    compiler: PlanCompiler,
    dispatcher: Dispatcher,
    bus: Arc<MessageBus>,
    settings: OrchestratorConfig,
    database: Option<Database>,
}

/// Build the configured LLM provider; `none` disables LLM-backed steps
pub fn provider_from_config(llm: &LLMConfig) -> Option<Arc<dyn LLMProvider>> {
    match llm.default_provider.as_str() {
        "ollama" => Some(Arc::new(OllamaProvider::new(
            llm.ollama.base_url.clone(),
            llm.ollama.model.clone(),
        ))),
        "openai" => Some(Arc::new(OpenAIProvider::new(llm.openai.clone()))),
        _ => None,
    }
}

/// Requests without a session identifier start a fresh session
fn with_session_id(mut request: TurnRequest) -> TurnRequest {
    if request.session_id.trim().is_empty() {
        request.session_id = uuid::Uuid::new_v4().to_string();
    }
    request
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        capabilities: CapabilityRegistry,
        llm: Option<Arc<dyn LLMProvider>>,
        settings: OrchestratorConfig,
    ) -> Self {
        let capabilities = Arc::new(capabilities);
        let bus = Arc::new(MessageBus::new());

        let compiler = PlanCompiler::new(
            llm.clone(),
            Arc::clone(&capabilities),
            settings.max_plan_steps,
        );
        let dispatcher = Dispatcher::new(capabilities, Aggregator::new(llm), Arc::clone(&bus))
            .with_worker_timeout(settings.worker_timeout());

        Self {
            registry: SessionRegistry::new(store),
            compiler,
            dispatcher,
            bus,
            settings,
            database: None,
        }
    }

    /// Build an orchestrator that checkpoints into `database` and owns it
    pub fn from_database(
        database: Database,
        llm: Option<Arc<dyn LLMProvider>>,
        settings: OrchestratorConfig,
    ) -> Self {
        let mut orchestrator = Self::new(
            Arc::new(database.checkpoints()),
            CapabilityRegistry::with_defaults(),
            llm,
            settings,
        );
        orchestrator.database = Some(database);
        orchestrator
    }

    /// Open the configured database and build an orchestrator over it
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db_path = config.database_path();
        let database = Database::new(&db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

        let llm = provider_from_config(&config.llm);
        match &llm {
            Some(provider) => {
                let locality = if provider.is_local() { "local" } else { "remote" };
                info!("Using {} LLM provider {}", locality, provider.name());
                if !provider.check_health().await {
                    warn!(
                        "LLM provider {} is unavailable, plans from free text will degrade",
                        provider.name()
                    );
                }
            }
            None => warn!("No LLM provider configured, plans from free text will degrade"),
        }

        Ok(Self::from_database(
            database,
            llm,
            config.orchestrator.clone(),
        ))
    }

    /// Flush pending checkpoints into the database file and close the pool
    ///
    /// Orchestrators built without a database have nothing to release.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(database) = &self.database {
            database.close().await?;
        }
        Ok(())
    }

    /// Wrap into the handle outer surfaces use
    pub fn handle(self: Arc<Self>) -> SessionHandle {
        SessionHandle::new(self)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Start a turn from an explicit JSON step list instead of free text
    pub async fn start_plan(
        &self,
        request: TurnRequest,
        steps_json: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let request = with_session_id(request);
        let session_id = request.session_id.clone();
        let plan = self.compiler.compile_explicit(request.message.trim(), steps_json);
        self.reporting(&session_id, self.begin_turn(request, Some(plan)))
            .await
    }

    async fn begin_turn(
        &self,
        request: TurnRequest,
        explicit: Option<Plan>,
    ) -> Result<TurnOutcome, EngineError> {
        let message = request.message.trim().to_string();
        if message.is_empty() {
            return Err(EngineError::InvalidState("message must not be empty".to_string()));
        }
        let owner = if request.owner.trim().is_empty() {
            self.settings.default_owner.clone()
        } else {
            request.owner
        };

        let slot = self.registry.slot(&request.session_id).await;
        let _run = slot.run_lock.lock().await;

        let mut ctx = match self.registry.open(&request.session_id).await {
            Ok(ctx) => ctx,
            Err(EngineError::SessionNotFound(_)) => {
                self.registry
                    .create(&owner, Some(&request.session_id))
                    .await?
            }
            Err(e) => return Err(e),
        };

        match ctx.state.session.status {
            SessionStatus::WaitingHuman => {
                return Err(EngineError::InvalidState(format!(
                    "session {} is waiting for approval, resume it first",
                    ctx.session_id()
                )))
            }
            SessionStatus::Active if ctx.state.plan.is_some() => {
                return Err(EngineError::InvalidState(format!(
                    "session {} has a plan in progress, dispatch it first",
                    ctx.session_id()
                )))
            }
            _ => {}
        }

        let plan = match explicit {
            Some(plan) => plan,
            None => self.compiler.compile(&message, &ctx.state.history).await,
        };
        if plan.degraded {
            warn!("Session {} runs a degraded plan", ctx.session_id());
        }
        info!(
            "Session {} starts a {}-step plan",
            ctx.session_id(),
            plan.len()
        );

        ctx.state.history.push(HistoryEntry::user(message));
        ctx.state
            .history
            .push(HistoryEntry::assistant(format!("Plan:\n{}", plan.outline())));
        let total_steps = plan.len();
        ctx.state.plan = Some(plan);
        ctx.state.cursor = 0;
        ctx.state.aggregated = None;
        ctx.state.pending_interrupt = None;
        ctx.state.output_format = request.output_format;
        ctx.state.session.status = SessionStatus::Active;
        ctx.checkpoint().await?;

        self.bus
            .publish(
                ctx.session_id(),
                ExecutionEvent::ExecutionStarted {
                    total_steps,
                    cursor: 0,
                },
            )
            .await;

        self.drive(&mut ctx).await
    }

    async fn dispatch_session(&self, session_id: &str) -> Result<TurnOutcome, EngineError> {
        let slot = self.registry.slot(session_id).await;
        let _run = slot.run_lock.lock().await;

        let mut ctx = self.registry.open(session_id).await?;
        match ctx.state.session.status {
            // Idempotent: hand back what is stored, write and announce nothing
            status if status.is_terminal() || status == SessionStatus::WaitingHuman => {
                debug!("Dispatch on {} session {} is a no-op", status, session_id);
                let action = self.dispatcher.step(&mut ctx).await?;
                self.outcome(&ctx, action, false).await
            }
            _ => {
                info!(
                    "Dispatching session {} from cursor {}",
                    session_id, ctx.state.cursor
                );
                self.bus
                    .publish(
                        session_id,
                        ExecutionEvent::ExecutionStarted {
                            total_steps: ctx.state.plan.as_ref().map_or(0, Plan::len),
                            cursor: ctx.state.cursor,
                        },
                    )
                    .await;
                self.drive(&mut ctx).await
            }
        }
    }

    async fn resume_session(
        &self,
        session_id: &str,
        token: Option<String>,
        input: ResumeInput,
    ) -> Result<TurnOutcome, EngineError> {
        let slot = self.registry.slot(session_id).await;
        let _run = slot.run_lock.lock().await;

        let mut ctx = self.registry.open(session_id).await?;
        let answer = match &input {
            ResumeInput::Approve => "[approved]".to_string(),
            ResumeInput::Respond(text) => text.clone(),
        };

        crate::conductor::hitl::resume(&mut ctx.state, token.as_deref(), input)?;
        ctx.state.history.push(HistoryEntry::user(answer));
        ctx.checkpoint().await?;

        self.drive(&mut ctx).await
    }

    async fn drive(&self, ctx: &mut ExecutionContext) -> Result<TurnOutcome, EngineError> {
        let action = self.dispatcher.run(ctx).await?;
        self.outcome(ctx, action, true).await
    }

    async fn outcome(
        &self,
        ctx: &ExecutionContext,
        action: NextAction,
        announce: bool,
    ) -> Result<TurnOutcome, EngineError> {
        let session = ctx.state.session.clone();
        match action {
            NextAction::Suspend(token) => Ok(TurnOutcome {
                session,
                interrupt: Some(token),
                output: None,
            }),
            NextAction::Done(result) => {
                let rendered = output::render(&result, ctx.state.output_format);
                if announce {
                    self.bus
                        .publish(
                            &session.session_id,
                            ExecutionEvent::FinalResult {
                                summary: result.summary.clone(),
                                output: rendered.clone(),
                            },
                        )
                        .await;
                    self.bus
                        .publish(
                            &session.session_id,
                            ExecutionEvent::ExecutionCompleted {
                                status: session.status,
                            },
                        )
                        .await;
                    self.prune(&session.session_id).await;
                }
                Ok(TurnOutcome {
                    session,
                    interrupt: None,
                    output: Some(rendered),
                })
            }
            NextAction::Continue => Err(EngineError::InvalidState(format!(
                "dispatch of session {} stopped mid-plan",
                session.session_id
            ))),
        }
    }

    async fn prune(&self, session_id: &str) {
        let Some(keep) = self.settings.checkpoint_retention else {
            return;
        };
        match self.registry.prune(session_id, keep).await {
            Ok(0) => {}
            Ok(removed) => debug!(
                "Pruned {} superseded checkpoints of session {}",
                removed, session_id
            ),
            Err(e) => warn!("Failed to prune checkpoints of {}: {}", session_id, e),
        }
    }

    /// Publish an error event for a failed operation before returning it
    async fn reporting<F>(&self, session_id: &str, operation: F) -> Result<TurnOutcome, EngineError>
    where
        F: std::future::Future<Output = Result<TurnOutcome, EngineError>>,
    {
        let result = operation.await;
        if let Err(e) = &result {
            warn!("Operation on session {} failed: {}", session_id, e);
            self.bus
                .publish(
                    session_id,
                    ExecutionEvent::Error {
                        error: e.to_string(),
                        hint: e.user_hint().to_string(),
                    },
                )
                .await;
        }
        result
    }
}

#[async_trait]
impl SessionHandleImpl for Orchestrator {
    async fn start_turn(&self, request: TurnRequest) -> Result<TurnOutcome, EngineError> {
        let request = with_session_id(request);
        let session_id = request.session_id.clone();
        self.reporting(&session_id, self.begin_turn(request, None))
            .await
    }

    async fn resume(
        &self,
        session_id: &str,
        token: Option<String>,
        input: ResumeInput,
    ) -> Result<TurnOutcome, EngineError> {
        self.reporting(session_id, self.resume_session(session_id, token, input))
            .await
    }

    async fn dispatch(&self, session_id: &str) -> Result<TurnOutcome, EngineError> {
        self.reporting(session_id, self.dispatch_session(session_id))
            .await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionState, EngineError> {
        self.registry.lookup(session_id).await
    }

    async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>, EngineError> {
        self.registry.list(&filter).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, EngineError> {
        let removed = self.registry.delete(session_id).await?;
        self.bus.close(session_id).await;
        Ok(removed)
    }

    async fn checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointInfo>, EngineError> {
        self.registry.checkpoints(session_id).await
    }

    async fn history(&self, session_id: &str, limit: usize) -> Result<HistoryPage, EngineError> {
        let state = self.registry.lookup(session_id).await?;
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let total = state.history.len();
        let messages = state.history[total.saturating_sub(limit)..].to_vec();

        Ok(HistoryPage {
            session_id: session_id.to_string(),
            total_messages: total,
            returned_messages: messages.len(),
            messages,
        })
    }

    async fn render(
        &self,
        session_id: &str,
        format: OutputFormat,
    ) -> Result<RenderedOutput, EngineError> {
        let state = self.registry.lookup(session_id).await?;
        let result = state.aggregated.ok_or_else(|| {
            EngineError::InvalidState(format!("session {} has no result yet", session_id))
        })?;
        Ok(output::render(&result, format))
    }

    async fn subscribe(&self, session_id: &str) -> mpsc::Receiver<ExecutionEvent> {
        self.bus.subscribe(session_id).await
    }
}
