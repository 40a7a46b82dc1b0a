//! Durable session persistence.
//!
//! `InMemoryStore` backs unit/integration tests; `FileStore` persists each
//! session as a single JSON document written atomically (write to a temp
//! file in the same directory, then rename) so a crash never observes a
//! partially written record, per spec §4.5.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{CoreError, CoreResult, TransientKind};
use crate::model::{Event, Session, SessionId};

/// Everything about a session that must survive a restart: the session
/// record itself plus its append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: Session,
    pub events: Vec<Event>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put_session(&self, record: SessionRecord) -> CoreResult<()>;
    async fn get_session(&self, id: SessionId) -> CoreResult<Option<SessionRecord>>;
    async fn append_event(&self, session_id: SessionId, event: Event) -> CoreResult<()>;
    async fn list_active_sessions(&self) -> CoreResult<Vec<Session>>;
    async fn purge_session(&self, id: SessionId) -> CoreResult<()>;
}

/// In-memory store: used by tests and as the default when `STORE_PATH` is
/// unset (no durability across restarts).
#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<DashMap<SessionId, SessionRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn put_session(&self, record: SessionRecord) -> CoreResult<()> {
        self.records.insert(record.session.id, record);
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> CoreResult<Option<SessionRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn append_event(&self, session_id: SessionId, event: Event) -> CoreResult<()> {
        let mut record = self
            .records
            .get_mut(&session_id)
            .ok_or_else(|| CoreError::UnknownSession(session_id.to_string()))?;
        record.events.push(event);
        Ok(())
    }

    async fn list_active_sessions(&self) -> CoreResult<Vec<Session>> {
        Ok(self
            .records
            .iter()
            .map(|r| r.session.clone())
            .filter(|s| !s.phase.is_terminal())
            .collect())
    }

    async fn purge_session(&self, id: SessionId) -> CoreResult<()> {
        self.records.remove(&id);
        Ok(())
    }
}

/// File-backed store: one `<STORE_PATH>/<session_id>.json` document per
/// session, written via temp-file + rename for atomicity. A per-session
/// lock serializes writes the way spec §5 requires.
pub struct FileStore {
    root: PathBuf,
    locks: DashMap<SessionId, Arc<RwLock<()>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    fn path_for(&self, id: SessionId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn lock_for(&self, id: SessionId) -> Arc<RwLock<()>> {
        self.locks.entry(id).or_insert_with(|| Arc::new(RwLock::new(()))).clone()
    }

    async fn write_atomic(&self, path: &Path, record: &SessionRecord) -> CoreResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileStore {
    /// Whole-record overwrite, used for phase/revision updates. Unlike
    /// `append_event`, this does not queue behind a contended lock: a
    /// session under heavy concurrent write pressure reports `StoreBusy`
    /// so the caller can retry rather than stall the drive loop.
    async fn put_session(&self, record: SessionRecord) -> CoreResult<()> {
        let lock = self.lock_for(record.session.id);
        let _guard = lock
            .try_write()
            .map_err(|_| CoreError::TransientError { kind: TransientKind::StoreBusy })?;
        let path = self.path_for(record.session.id);
        self.write_atomic(&path, &record).await
    }

    async fn get_session(&self, id: SessionId) -> CoreResult<Option<SessionRecord>> {
        let lock = self.lock_for(id);
        let _guard = lock.read().await;
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn append_event(&self, session_id: SessionId, event: Event) -> CoreResult<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.write().await;
        let path = self.path_for(session_id);
        let bytes = tokio::fs::read(&path).await?;
        let mut record: SessionRecord = serde_json::from_slice(&bytes)?;
        record.events.push(event);
        self.write_atomic(&path, &record).await
    }

    async fn list_active_sessions(&self) -> CoreResult<Vec<Session>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<SessionRecord>(&bytes) {
                    Ok(record) if !record.session.phase.is_terminal() => out.push(record.session),
                    Ok(_) => {}
                    Err(e) => warn!(?path, error = %e, "skipping unreadable session record"),
                },
                Err(e) => warn!(?path, error = %e, "failed to read session record"),
            }
        }
        Ok(out)
    }

    async fn purge_session(&self, id: SessionId) -> CoreResult<()> {
        let lock = self.lock_for(id);
        let _guard = lock.write().await;
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Crash-recovery reaper: on startup, fail any non-terminal session whose
/// last event is older than `stale_threshold` (spec §4.5).
pub async fn reap_stale_sessions(
    store: &dyn SessionStore,
    stale_threshold: chrono::Duration,
    now: DateTime<Utc>,
) -> CoreResult<Vec<SessionId>> {
    let mut reaped = Vec::new();
    for session in store.list_active_sessions().await? {
        let idle_for = now - session.updated_at;
        if idle_for > stale_threshold {
            reaped.push(session.id);
        }
    }
    Ok(reaped)
}

pub type SharedStore = Arc<dyn SessionStore>;

pub fn in_memory() -> SharedStore {
    Arc::new(InMemoryStore::new())
}

pub fn file_backed(root: impl Into<PathBuf>) -> SharedStore {
    Arc::new(FileStore::new(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Mode;

    fn fresh_session() -> Session {
        Session::new(SessionId::new_v4(), Mode::Quick, "build a todo app".into(), None, Utc::now())
    }

    #[tokio::test]
    async fn in_memory_round_trip() {
        let store = InMemoryStore::new();
        let session = fresh_session();
        let id = session.id;
        store
            .put_session(SessionRecord {
                session,
                events: vec![],
            })
            .await
            .unwrap();
        let fetched = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(fetched.session.id, id);
    }

    #[tokio::test]
    async fn file_store_round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let session = fresh_session();
        let id = session.id;
        store
            .put_session(SessionRecord {
                session,
                events: vec![],
            })
            .await
            .unwrap();

        let reopened = FileStore::new(dir.path());
        let fetched = reopened.get_session(id).await.unwrap().unwrap();
        assert_eq!(fetched.session.id, id);
    }

    #[tokio::test]
    async fn stale_session_is_reaped() {
        let store = InMemoryStore::new();
        let mut session = fresh_session();
        session.updated_at = Utc::now() - chrono::Duration::minutes(30);
        let id = session.id;
        store.put_session(SessionRecord { session, events: vec![] }).await.unwrap();

        let reaped = reap_stale_sessions(&store, chrono::Duration::minutes(15), Utc::now())
            .await
            .unwrap();
        assert_eq!(reaped, vec![id]);
    }
}
