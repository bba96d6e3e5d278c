//! Execution Context
//!
//! The in-memory copy of one session's state during an operation, paired
//! with the sequence number of the checkpoint it was loaded from. All
//! durable writes go through [`ExecutionContext::checkpoint`].

use crate::db::CheckpointStore;
use crate::registry::SessionSlot;
use sdk::errors::EngineError;
use sdk::types::{Checkpoint, SessionState, Step};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

pub struct ExecutionContext {
    pub state: SessionState,
    sequence: u64,
    store: Arc<dyn CheckpointStore>,
    slot: Arc<SessionSlot>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("session_id", &self.state.session.session_id)
            .field("status", &self.state.session.status)
            .field("cursor", &self.state.cursor)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(
        state: SessionState,
        sequence: u64,
        store: Arc<dyn CheckpointStore>,
        slot: Arc<SessionSlot>,
    ) -> Self {
        Self {
            state,
            sequence,
            store,
            slot,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.state.session.session_id
    }

    /// Sequence number of the last durable checkpoint
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The step under the cursor, if the plan is not exhausted
    pub fn current_step(&self) -> Option<&Step> {
        self.state
            .plan
            .as_ref()
            .and_then(|plan| plan.steps.get(self.state.cursor))
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        let cursor = self.state.cursor;
        self.state
            .plan
            .as_mut()
            .and_then(|plan| plan.steps.get_mut(cursor))
    }

    /// Persist the current state as the next checkpoint
    ///
    /// Fails with `SessionCancelled` once the session has been deleted. The
    /// in-memory sequence only advances after the store accepted the write.
    pub async fn checkpoint(&mut self) -> Result<u64, EngineError> {
        let _gate = self.slot.write_gate.lock().await;
        if self.slot.is_cancelled() {
            return Err(EngineError::SessionCancelled(self.session_id().to_string()));
        }

        let now = chrono::Utc::now().timestamp();
        self.state.session.updated_at = now;

        let next = self.sequence + 1;
        let checkpoint = Checkpoint {
            session_id: self.session_id().to_string(),
            sequence: next,
            created_at: now,
            state: self.state.clone(),
        };

        if let Err(e) = self.store.put(&checkpoint).await {
            error!(
                "Checkpoint {} for session {} failed: {}",
                next,
                self.session_id(),
                e
            );
            return Err(e);
        }

        self.sequence = next;
        debug!(
            "Checkpoint {} written for session {} (status {}, cursor {})",
            next,
            self.session_id(),
            self.state.session.status,
            self.state.cursor
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryCheckpointStore;
    use sdk::types::{Session, SessionStatus};

    fn state() -> SessionState {
        SessionState::new(Session {
            session_id: "s1".into(),
            owner: "alice".into(),
            created_at: 0,
            updated_at: 0,
            status: SessionStatus::Active,
        })
    }

    #[tokio::test]
    async fn test_checkpoint_advances_sequence() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let mut ctx = ExecutionContext::new(state(), 0, Arc::clone(&store), Arc::new(SessionSlot::new()));

        assert_eq!(ctx.checkpoint().await.unwrap(), 1);
        ctx.state.cursor = 1;
        assert_eq!(ctx.checkpoint().await.unwrap(), 2);

        let latest = store.get_latest("s1").await.unwrap().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.state.cursor, 1);
    }

    #[test]
    fn test_debug_shows_position_not_store() {
        let ctx = ExecutionContext::new(
            state(),
            7,
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(SessionSlot::new()),
        );
        let text = format!("{:?}", ctx);
        assert!(text.contains("\"s1\""));
        assert!(text.contains("sequence: 7"));
        assert!(!text.contains("store"));
    }

    #[tokio::test]
    async fn test_cancelled_session_stops_writing() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let slot = Arc::new(SessionSlot::new());
        let mut ctx = ExecutionContext::new(state(), 0, Arc::clone(&store), Arc::clone(&slot));

        ctx.checkpoint().await.unwrap();
        slot.cancel();

        let err = ctx.checkpoint().await.unwrap_err();
        assert!(matches!(err, EngineError::SessionCancelled(_)));
        assert_eq!(ctx.sequence(), 1);
        assert_eq!(store.list("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_context_cannot_overwrite() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let slot = Arc::new(SessionSlot::new());
        let mut first = ExecutionContext::new(state(), 0, Arc::clone(&store), Arc::clone(&slot));
        let mut second = ExecutionContext::new(state(), 0, Arc::clone(&store), slot);

        first.checkpoint().await.unwrap();
        let err = second.checkpoint().await.unwrap_err();
        assert!(matches!(err, EngineError::CheckpointWrite(_)));
    }
}
