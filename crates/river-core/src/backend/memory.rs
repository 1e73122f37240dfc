//! In-process backend

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use super::r#trait::LogBackend;
use super::types::{BackendError, BackendKind, Lease, LeaseOutcome};
use crate::types::{ChunkRecord, Sequence, SessionId, SessionMeta};

struct Slot {
    meta: RwLock<SessionMeta>,
    records: RwLock<Vec<ChunkRecord>>,
    lease: Mutex<Option<Lease>>,
    length_tx: watch::Sender<u64>,
}

/// Backend keeping every session in memory. Nothing survives the process.
pub struct MemoryBackend {
    slots: DashMap<SessionId, Arc<Slot>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Unavailable("memory backend is closed".to_string()));
        }
        Ok(())
    }

    fn slot(&self, id: &SessionId) -> Result<Arc<Slot>, BackendError> {
        self.check_open()?;
        self.slots
            .get(id)
            .map(|slot| slot.clone())
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.check_open()
    }

    async fn create_session(&self, meta: &SessionMeta) -> Result<(), BackendError> {
        self.check_open()?;
        match self.slots.entry(meta.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(BackendError::AlreadyExists(meta.id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (length_tx, _) = watch::channel(0);
                entry.insert(Arc::new(Slot {
                    meta: RwLock::new(meta.clone()),
                    records: RwLock::new(Vec::new()),
                    lease: Mutex::new(None),
                    length_tx,
                }));
                Ok(())
            }
        }
    }

    async fn load_session(&self, id: &SessionId) -> Result<Option<SessionMeta>, BackendError> {
        self.check_open()?;
        Ok(self.slots.get(id).map(|slot| slot.meta.read().clone()))
    }

    async fn update_session(&self, meta: &SessionMeta) -> Result<(), BackendError> {
        let slot = self.slot(&meta.id)?;
        *slot.meta.write() = meta.clone();
        Ok(())
    }

    async fn append(&self, id: &SessionId, record: &ChunkRecord) -> Result<(), BackendError> {
        let slot = self.slot(id)?;
        let length = {
            let mut records = slot.records.write();
            let actual = records.len() as u64;
            if record.sequence != actual {
                return Err(BackendError::SequenceConflict {
                    session_id: id.to_string(),
                    expected: record.sequence,
                    actual,
                });
            }
            records.push(record.clone());
            actual + 1
        };
        slot.meta.write().last_append_at = Some(record.appended_at);
        slot.length_tx.send_replace(length);
        Ok(())
    }

    async fn read_range(
        &self,
        id: &SessionId,
        from: Sequence,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, BackendError> {
        let slot = self.slot(id)?;
        let records = slot.records.read();
        Ok(records
            .iter()
            .skip(from as usize)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn length(&self, id: &SessionId) -> Result<u64, BackendError> {
        let slot = self.slot(id)?;
        let length = slot.records.read().len() as u64;
        Ok(length)
    }

    async fn watch(&self, id: &SessionId) -> Result<watch::Receiver<u64>, BackendError> {
        Ok(self.slot(id)?.length_tx.subscribe())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, BackendError> {
        self.check_open()?;
        let mut sessions: Vec<SessionMeta> = self
            .slots
            .iter()
            .map(|slot| slot.meta.read().clone())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn delete_session(&self, id: &SessionId) -> Result<bool, BackendError> {
        self.check_open()?;
        Ok(self.slots.remove(id).is_some())
    }

    async fn acquire_lease(
        &self,
        id: &SessionId,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseOutcome, BackendError> {
        let slot = self.slot(id)?;
        let mut lease = slot.lease.lock();
        let outcome = match lease.as_ref() {
            None => LeaseOutcome::Acquired,
            Some(current) if current.owner == owner => LeaseOutcome::Acquired,
            Some(current) if current.is_expired_at(Utc::now()) => LeaseOutcome::Reclaimed {
                previous_owner: current.owner.clone(),
            },
            Some(current) => {
                return Ok(LeaseOutcome::Held {
                    owner: current.owner.clone(),
                    expires_at: current.expires_at,
                });
            }
        };
        *lease = Some(Lease::new(owner, ttl));
        Ok(outcome)
    }

    async fn renew_lease(
        &self,
        id: &SessionId,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        let slot = self.slot(id)?;
        let mut lease = slot.lease.lock();
        match lease.as_mut() {
            Some(current) if current.owner == owner => {
                current.renew(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, id: &SessionId, owner: &str) -> Result<bool, BackendError> {
        let slot = match self.slot(id) {
            Ok(slot) => slot,
            Err(BackendError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let mut lease = slot.lease.lock();
        if lease.as_ref().is_some_and(|current| current.owner == owner) {
            *lease = None;
            return Ok(true);
        }
        Ok(false)
    }

    async fn lease(&self, id: &SessionId) -> Result<Option<Lease>, BackendError> {
        let slot = self.slot(id)?;
        let lease = slot.lease.lock().clone();
        Ok(lease)
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Payload;
    use crate::types::FrameKind;

    fn record(sequence: Sequence, body: &str) -> ChunkRecord {
        ChunkRecord::new(sequence, FrameKind::Data, Payload::new("chunk", body))
    }

    async fn backend_with_session() -> (MemoryBackend, SessionId) {
        let backend = MemoryBackend::new();
        let meta = SessionMeta::new(SessionId::generate(), "test", true);
        backend.create_session(&meta).await.unwrap();
        (backend, meta.id)
    }

    #[tokio::test]
    async fn test_conditional_append() {
        let (backend, id) = backend_with_session().await;

        backend.append(&id, &record(0, "\"a\"")).await.unwrap();
        backend.append(&id, &record(1, "\"b\"")).await.unwrap();

        let err = backend.append(&id, &record(1, "\"c\"")).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::SequenceConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));

        let records = backend.read_range(&id, 1, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload.body, "\"b\"");
    }

    #[tokio::test]
    async fn test_watch_publishes_length() {
        let (backend, id) = backend_with_session().await;
        let mut rx = backend.watch(&id).await.unwrap();
        assert_eq!(*rx.borrow(), 0);

        backend.append(&id, &record(0, "1")).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let (backend, id) = backend_with_session().await;
        let meta = SessionMeta::new(id, "test", true);
        assert!(matches!(
            backend.create_session(&meta).await,
            Err(BackendError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_lease_lifecycle() {
        let (backend, id) = backend_with_session().await;
        let ttl = Duration::from_secs(30);

        assert_eq!(
            backend.acquire_lease(&id, "a", ttl).await.unwrap(),
            LeaseOutcome::Acquired
        );
        assert!(matches!(
            backend.acquire_lease(&id, "b", ttl).await.unwrap(),
            LeaseOutcome::Held { .. }
        ));
        assert!(!backend.renew_lease(&id, "b", ttl).await.unwrap());
        assert!(backend.renew_lease(&id, "a", ttl).await.unwrap());

        assert!(backend.release_lease(&id, "a").await.unwrap());
        assert!(backend.lease(&id).await.unwrap().is_none());
        assert!(
            backend
                .acquire_lease(&id, "b", ttl)
                .await
                .unwrap()
                .is_granted()
        );
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let (backend, id) = backend_with_session().await;
        backend
            .acquire_lease(&id, "a", Duration::ZERO)
            .await
            .unwrap();

        let outcome = backend
            .acquire_lease(&id, "b", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LeaseOutcome::Reclaimed {
                previous_owner: "a".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_closed_backend_is_unavailable() {
        let (backend, id) = backend_with_session().await;
        backend.close().await.unwrap();
        assert!(backend.ping().await.is_err());
        assert!(matches!(
            backend.length(&id).await,
            Err(BackendError::Unavailable(_))
        ));
    }
}
