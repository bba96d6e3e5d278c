//! Session handle
//!
//! `SessionHandle` is the sole API surface outer transports (REST, WebSocket,
//! CLI) use to drive the engine. It exposes session operations without
//! revealing the orchestrator's internals, the same way every surface gets
//! the same behaviour.

use crate::errors::EngineError;
use crate::events::ExecutionEvent;
use crate::outcome::{OutputFormat, RenderedOutput};
use crate::types::{
    CheckpointInfo, HistoryPage, InterruptToken, ResumeInput, Session, SessionFilter, SessionState,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A user message starting (or continuing) a turn on a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub owner: String,
    pub message: String,
    #[serde(default)]
    pub output_format: OutputFormat,
}

/// Where a dispatch run stopped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub session: Session,
    /// Set when the run suspended at a human-approval step
    pub interrupt: Option<InterruptToken>,
    /// Set when the plan reached its terminal state
    pub output: Option<RenderedOutput>,
}

/// Trait for the session handle implementation (implemented by the engine)
#[async_trait]
pub trait SessionHandleImpl: Send + Sync {
    async fn start_turn(&self, request: TurnRequest) -> Result<TurnOutcome, EngineError>;

    async fn resume(
        &self,
        session_id: &str,
        token: Option<String>,
        input: ResumeInput,
    ) -> Result<TurnOutcome, EngineError>;

    async fn dispatch(&self, session_id: &str) -> Result<TurnOutcome, EngineError>;

    async fn get_session(&self, session_id: &str) -> Result<SessionState, EngineError>;

    async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>, EngineError>;

    async fn delete_session(&self, session_id: &str) -> Result<bool, EngineError>;

    async fn checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointInfo>, EngineError>;

    async fn history(&self, session_id: &str, limit: usize) -> Result<HistoryPage, EngineError>;

    async fn render(
        &self,
        session_id: &str,
        format: OutputFormat,
    ) -> Result<RenderedOutput, EngineError>;

    async fn subscribe(&self, session_id: &str) -> mpsc::Receiver<ExecutionEvent>;
}

/// Cloneable handle for session operations
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<dyn SessionHandleImpl>,
}

impl SessionHandle {
    /// Create a new SessionHandle with the given implementation
    pub fn new(inner: Arc<dyn SessionHandleImpl>) -> Self {
        Self { inner }
    }

    /// Start a turn: compile the message into a plan and dispatch it
    pub async fn start_turn(&self, request: TurnRequest) -> Result<TurnOutcome, EngineError> {
        self.inner.start_turn(request).await
    }

    /// Resume a session parked at a human-approval step
    ///
    /// Without an explicit token the session's outstanding token is used.
    pub async fn resume(
        &self,
        session_id: &str,
        token: Option<String>,
        input: ResumeInput,
    ) -> Result<TurnOutcome, EngineError> {
        self.inner.resume(session_id, token, input).await
    }

    /// Continue an active session from its cursor
    ///
    /// On a finished session this returns the stored result and writes
    /// nothing; on a parked session it returns the outstanding token.
    pub async fn dispatch(&self, session_id: &str) -> Result<TurnOutcome, EngineError> {
        self.inner.dispatch(session_id).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionState, EngineError> {
        self.inner.get_session(session_id).await
    }

    pub async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>, EngineError> {
        self.inner.list_sessions(filter).await
    }

    /// Delete a session; returns false when it was already absent
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, EngineError> {
        self.inner.delete_session(session_id).await
    }

    pub async fn checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointInfo>, EngineError> {
        self.inner.checkpoints(session_id).await
    }

    pub async fn history(&self, session_id: &str, limit: usize) -> Result<HistoryPage, EngineError> {
        self.inner.history(session_id, limit).await
    }

    /// Render the aggregated result of a finished session
    pub async fn render(
        &self,
        session_id: &str,
        format: OutputFormat,
    ) -> Result<RenderedOutput, EngineError> {
        self.inner.render(session_id, format).await
    }

    /// Receive execution events for a session
    pub async fn subscribe(&self, session_id: &str) -> mpsc::Receiver<ExecutionEvent> {
        self.inner.subscribe(session_id).await
    }
}
