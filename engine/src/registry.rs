//! Session Registry
//!
//! Maps session identifiers to their durable execution context. The
//! registry is an injected object, so tests and embedders can run several
//! isolated instances side by side.
//!
//! # Locking
//!
//! Every session owns a [`SessionSlot`]:
//! - `run_lock` serializes dispatch and resume for that session. It is held
//!   for a whole operation, including worker calls.
//! - `write_gate` is held only around a single checkpoint write or a delete,
//!   so lookups, listings and deletes never wait on a running worker.
//! - `cancelled` is set by delete; a cancelled slot refuses further writes.
//!
//! The slot map itself is locked only long enough to fetch or insert a slot.

use crate::conductor::context::ExecutionContext;
use crate::db::CheckpointStore;
use sdk::errors::EngineError;
use sdk::types::{CheckpointInfo, Session, SessionFilter, SessionState, SessionStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Per-session synchronization state
pub struct SessionSlot {
    pub run_lock: Mutex<()>,
    pub write_gate: Mutex<()>,
    cancelled: AtomicBool,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self {
            run_lock: Mutex::new(()),
            write_gate: Mutex::new(()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionRegistry {
    store: Arc<dyn CheckpointStore>,
    slots: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn CheckpointStore> {
        Arc::clone(&self.store)
    }

    /// Slot for a session, created on first use
    pub async fn slot(&self, session_id: &str) -> Arc<SessionSlot> {
        let mut slots = self.slots.lock().await;
        Arc::clone(
            slots
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(SessionSlot::new())),
        )
    }

    /// Create a session with a fresh cursor and write its first checkpoint
    ///
    /// A generated identifier is used when none is supplied.
    pub async fn create(
        &self,
        owner: &str,
        session_id: Option<&str>,
    ) -> Result<ExecutionContext, EngineError> {
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if self.store.get_latest(&session_id).await?.is_some() {
            return Err(EngineError::InvalidState(format!(
                "session {} already exists",
                session_id
            )));
        }

        let now = chrono::Utc::now().timestamp();
        let state = SessionState::new(Session {
            session_id: session_id.clone(),
            owner: owner.to_string(),
            created_at: now,
            updated_at: now,
            status: SessionStatus::Active,
        });

        let slot = self.slot(&session_id).await;
        let mut ctx = ExecutionContext::new(state, 0, self.store(), slot);
        ctx.checkpoint().await?;

        info!("Created session {} for owner {}", session_id, owner);
        Ok(ctx)
    }

    /// Current state of a session from its latest checkpoint
    pub async fn lookup(&self, session_id: &str) -> Result<SessionState, EngineError> {
        self.store
            .get_latest(session_id)
            .await?
            .map(|cp| cp.state)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    /// Load a session's latest checkpoint into an execution context
    pub async fn open(&self, session_id: &str) -> Result<ExecutionContext, EngineError> {
        let checkpoint = self
            .store
            .get_latest(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        debug!(
            "Opened session {} at checkpoint {}",
            session_id, checkpoint.sequence
        );

        let slot = self.slot(session_id).await;
        Ok(ExecutionContext::new(
            checkpoint.state,
            checkpoint.sequence,
            self.store(),
            slot,
        ))
    }

    /// Delete a session; deleting twice reports `false` the second time
    ///
    /// A run still in flight for the session fails at its next checkpoint.
    pub async fn delete(&self, session_id: &str) -> Result<bool, EngineError> {
        let slot = self.slot(session_id).await;
        let removed = {
            let _gate = slot.write_gate.lock().await;
            slot.cancel();
            self.store.purge(session_id).await?
        };

        let mut slots = self.slots.lock().await;
        if slots
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            slots.remove(session_id);
        }

        if removed {
            info!("Deleted session {}", session_id);
        } else {
            debug!("Session {} already absent", session_id);
        }
        Ok(removed)
    }

    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, EngineError> {
        self.store.list_sessions(filter).await
    }

    /// Checkpoint listing, oldest first
    pub async fn checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointInfo>, EngineError> {
        let checkpoints = self.store.list(session_id).await?;
        if checkpoints.is_empty() {
            return Err(EngineError::SessionNotFound(session_id.to_string()));
        }
        Ok(checkpoints.iter().map(CheckpointInfo::from).collect())
    }

    /// Drop superseded checkpoints beyond the newest `keep`
    pub async fn prune(&self, session_id: &str, keep: usize) -> Result<usize, EngineError> {
        self.store.prune(session_id, keep).await
    }
}
