/// Checkpoint persistence
///
/// Checkpoints are append-only per session: a `put` whose sequence does not
/// exceed the latest stored one is rejected, so a stale writer can never
/// shadow newer progress. The session row is upserted in the same
/// transaction as the snapshot, keeping listings consistent with the latest
/// checkpoint.
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{Checkpoint, Session, SessionFilter, SessionState, SCHEMA_VERSION};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Durable, per-session ordered snapshot storage
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a snapshot; the sequence must be greater than the latest one
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), EngineError>;

    /// Most recent snapshot of a session, if any
    async fn get_latest(&self, session_id: &str) -> Result<Option<Checkpoint>, EngineError>;

    /// All snapshots of a session in ascending sequence order
    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>, EngineError>;

    /// Sessions matching the filter, most recently updated first
    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, EngineError>;

    /// Remove a session and its snapshots; false when nothing was stored
    async fn purge(&self, session_id: &str) -> Result<bool, EngineError>;

    /// Keep only the newest `keep` snapshots; returns how many were removed
    async fn prune(&self, session_id: &str, keep: usize) -> Result<usize, EngineError>;
}

/// Decode a stored snapshot, migrating older schema versions forward
pub fn decode_snapshot(raw: &str) -> Result<SessionState, EngineError> {
    let mut value: serde_json::Value = serde_json::from_str(raw)?;

    let version = value
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    if version > SCHEMA_VERSION {
        return Err(EngineError::Serialization(format!(
            "snapshot schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    if version == 0 {
        migrate_v0(&mut value);
    }

    Ok(serde_json::from_value(value)?)
}

/// Unversioned snapshots stored `hitl_response` as a bare string
fn migrate_v0(value: &mut serde_json::Value) {
    if let Some(steps) = value
        .pointer_mut("/plan/steps")
        .and_then(|steps| steps.as_array_mut())
    {
        for step in steps {
            if let Some(slot) = step.get_mut("hitl_response") {
                if let Some(text) = slot.as_str().map(str::to_string) {
                    *slot = serde_json::json!({ "kind": "text", "text": text });
                }
            }
        }
    }

    if let Some(obj) = value.as_object_mut() {
        obj.insert("schema_version".to_string(), serde_json::json!(1));
    }
}

/// SQLite-backed checkpoint store
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_checkpoint(session_id: &str, row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, EngineError> {
        let sequence: i64 = row.get("sequence");
        let created_at: i64 = row.get("created_at");
        let snapshot: String = row.get("snapshot");

        Ok(Checkpoint {
            session_id: session_id.to_string(),
            sequence: sequence as u64,
            created_at,
            state: decode_snapshot(&snapshot)?,
        })
    }
}

fn write_err(e: sqlx::Error) -> EngineError {
    EngineError::CheckpointWrite(e.to_string())
}

fn read_err(e: sqlx::Error) -> EngineError {
    EngineError::Database(e.to_string())
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        let session = &checkpoint.state.session;
        let snapshot = serde_json::to_string(&checkpoint.state)
            .map_err(|e| EngineError::CheckpointWrite(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(write_err)?;

        // Write first so the transaction holds the write lock before it reads
        sqlx::query(
            "INSERT INTO sessions (session_id, owner, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                owner = excluded.owner,
                status = excluded.status,
                updated_at = excluded.updated_at",
        )
        .bind(&checkpoint.session_id)
        .bind(&session.owner)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM checkpoints WHERE session_id = ?")
                .bind(&checkpoint.session_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(write_err)?;

        if let Some(latest) = latest {
            if checkpoint.sequence as i64 <= latest {
                return Err(EngineError::CheckpointWrite(format!(
                    "sequence {} for session {} does not follow {}",
                    checkpoint.sequence, checkpoint.session_id, latest
                )));
            }
        }

        sqlx::query(
            "INSERT INTO checkpoints (session_id, sequence, created_at, schema_version, snapshot)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.session_id)
        .bind(checkpoint.sequence as i64)
        .bind(checkpoint.created_at)
        .bind(checkpoint.state.schema_version as i64)
        .bind(&snapshot)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        tx.commit().await.map_err(write_err)?;

        debug!(
            "Checkpoint {} written for session {}",
            checkpoint.sequence, checkpoint.session_id
        );
        Ok(())
    }

    async fn get_latest(&self, session_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        let row = sqlx::query(
            "SELECT sequence, created_at, snapshot FROM checkpoints
             WHERE session_id = ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_err)?;

        row.map(|r| Self::row_to_checkpoint(session_id, &r))
            .transpose()
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>, EngineError> {
        let rows = sqlx::query(
            "SELECT sequence, created_at, snapshot FROM checkpoints
             WHERE session_id = ? ORDER BY sequence ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        rows.iter()
            .map(|r| Self::row_to_checkpoint(session_id, r))
            .collect()
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, EngineError> {
        let status = filter.status.map(|s| s.as_str());

        let rows = sqlx::query(
            "SELECT session_id, owner, status, created_at, updated_at FROM sessions
             WHERE (?1 IS NULL OR owner = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY updated_at DESC, session_id ASC",
        )
        .bind(filter.owner.as_deref())
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(read_err)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            sessions.push(Session {
                session_id: row.get("session_id"),
                owner: row.get("owner"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
                status: status.parse()?,
            });
        }

        Ok(sessions)
    }

    async fn purge(&self, session_id: &str) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await.map_err(write_err)?;

        sqlx::query("DELETE FROM checkpoints WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;

        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;

        tx.commit().await.map_err(write_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn prune(&self, session_id: &str, keep: usize) -> Result<usize, EngineError> {
        let result = sqlx::query(
            "DELETE FROM checkpoints WHERE session_id = ?1 AND sequence NOT IN (
                SELECT sequence FROM checkpoints WHERE session_id = ?1
                ORDER BY sequence DESC LIMIT ?2
             )",
        )
        .bind(session_id)
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        let removed = result.rows_affected() as usize;
        if removed > 0 {
            debug!("Pruned {} checkpoints for session {}", removed, session_id);
        }
        Ok(removed)
    }
}

/// In-process checkpoint store
///
/// Holds snapshots in memory only; used for ephemeral runs and tests.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    sessions: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        let mut sessions = self.sessions.lock().await;
        let history = sessions.entry(checkpoint.session_id.clone()).or_default();

        if let Some(last) = history.last() {
            if checkpoint.sequence <= last.sequence {
                warn!(
                    "Rejected checkpoint {} for session {}: latest is {}",
                    checkpoint.sequence, checkpoint.session_id, last.sequence
                );
                return Err(EngineError::CheckpointWrite(format!(
                    "sequence {} for session {} does not follow {}",
                    checkpoint.sequence, checkpoint.session_id, last.sequence
                )));
            }
        }

        history.push(checkpoint.clone());
        Ok(())
    }

    async fn get_latest(&self, session_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(session_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>, EngineError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, EngineError> {
        let sessions = self.sessions.lock().await;
        let mut found: Vec<Session> = sessions
            .values()
            .filter_map(|history| history.last())
            .map(|cp| cp.state.session.clone())
            .filter(|s| filter.matches(s))
            .collect();

        found.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(found)
    }

    async fn purge(&self, session_id: &str) -> Result<bool, EngineError> {
        let mut sessions = self.sessions.lock().await;
        Ok(sessions.remove(session_id).is_some())
    }

    async fn prune(&self, session_id: &str, keep: usize) -> Result<usize, EngineError> {
        let mut sessions = self.sessions.lock().await;
        let Some(history) = sessions.get_mut(session_id) else {
            return Ok(0);
        };

        let excess = history.len().saturating_sub(keep);
        history.drain(..excess);
        Ok(excess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use sdk::types::SessionStatus;
    use tempfile::TempDir;

    fn checkpoint(session_id: &str, owner: &str, sequence: u64, status: SessionStatus) -> Checkpoint {
        let mut state = SessionState::new(Session {
            session_id: session_id.to_string(),
            owner: owner.to_string(),
            created_at: 100,
            updated_at: 100 + sequence as i64,
            status,
        });
        state.cursor = sequence as usize;
        Checkpoint {
            session_id: session_id.to_string(),
            sequence,
            created_at: 100 + sequence as i64,
            state,
        }
    }

    async fn exercise_store(store: &dyn CheckpointStore) {
        store
            .put(&checkpoint("s1", "alice", 1, SessionStatus::Active))
            .await
            .unwrap();
        store
            .put(&checkpoint("s1", "alice", 2, SessionStatus::WaitingHuman))
            .await
            .unwrap();
        store
            .put(&checkpoint("s2", "bob", 1, SessionStatus::Completed))
            .await
            .unwrap();

        // Regressions and replays are rejected
        let err = store
            .put(&checkpoint("s1", "alice", 2, SessionStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CheckpointWrite(_)));

        let latest = store.get_latest("s1").await.unwrap().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.state.session.status, SessionStatus::WaitingHuman);

        let all = store.list("s1").await.unwrap();
        assert_eq!(all.iter().map(|c| c.sequence).collect::<Vec<_>>(), vec![1, 2]);

        let waiting = store
            .list_sessions(&SessionFilter {
                owner: None,
                status: Some(SessionStatus::WaitingHuman),
            })
            .await
            .unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].session_id, "s1");

        let bobs = store
            .list_sessions(&SessionFilter {
                owner: Some("bob".into()),
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].session_id, "s2");

        assert!(store.get_latest("missing").await.unwrap().is_none());

        store
            .put(&checkpoint("s1", "alice", 3, SessionStatus::Completed))
            .await
            .unwrap();
        assert_eq!(store.prune("s1", 1).await.unwrap(), 2);
        assert_eq!(store.list("s1").await.unwrap().len(), 1);
        assert_eq!(store.get_latest("s1").await.unwrap().unwrap().sequence, 3);

        assert!(store.purge("s1").await.unwrap());
        assert!(!store.purge("s1").await.unwrap());
        assert!(store.get_latest("s1").await.unwrap().is_none());
        assert!(store.list("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = MemoryCheckpointStore::new();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let store = db.checkpoints();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_concurrent_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let store = std::sync::Arc::new(db.checkpoints());

        let mut handles = Vec::new();
        for n in 0..4 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = format!("session-{}", n);
                for seq in 1..=5 {
                    store
                        .put(&checkpoint(&id, "alice", seq, SessionStatus::Active))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for n in 0..4 {
            let id = format!("session-{}", n);
            assert_eq!(store.list(&id).await.unwrap().len(), 5);
        }
    }

    #[test]
    fn test_decode_unversioned_snapshot() {
        let raw = serde_json::json!({
            "session": {
                "session_id": "s1",
                "owner": "alice",
                "created_at": 1,
                "updated_at": 2,
                "status": "completed"
            },
            "plan": {
                "request": "check",
                "intent": "simple_search",
                "steps": [{
                    "step_id": 1,
                    "capability": "human-approval",
                    "status": "completed",
                    "description": "confirm",
                    "hitl_question": "ok?",
                    "hitl_response": "yes"
                }]
            },
            "cursor": 1
        })
        .to_string();

        let state = decode_snapshot(&raw).unwrap();
        assert_eq!(state.schema_version, 1);
        let step = &state.plan.unwrap().steps[0];
        assert_eq!(
            step.hitl_response,
            Some(sdk::types::HitlResponse::Text("yes".into()))
        );
    }

    #[test]
    fn test_decode_rejects_newer_schema() {
        let raw = serde_json::json!({ "schema_version": SCHEMA_VERSION + 1 }).to_string();
        assert!(matches!(
            decode_snapshot(&raw),
            Err(EngineError::Serialization(_))
        ));
    }
}
