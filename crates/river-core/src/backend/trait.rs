//! Storage backend trait definition

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

use super::types::{BackendError, BackendKind, Lease, LeaseOutcome};
use crate::types::{ChunkRecord, Sequence, SessionId, SessionMeta};

/// Key-ordered log storage with change notification and session leases
#[async_trait]
pub trait LogBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Health check
    async fn ping(&self) -> Result<(), BackendError>;

    /// Create a session. Fails with `AlreadyExists` if the id is taken.
    async fn create_session(&self, meta: &SessionMeta) -> Result<(), BackendError>;

    async fn load_session(&self, id: &SessionId) -> Result<Option<SessionMeta>, BackendError>;

    /// Overwrite the metadata of an existing session
    async fn update_session(&self, meta: &SessionMeta) -> Result<(), BackendError>;

    /// Conditional append: succeeds only when `record.sequence` equals the
    /// current log length, otherwise returns `SequenceConflict`.
    async fn append(&self, id: &SessionId, record: &ChunkRecord) -> Result<(), BackendError>;

    /// Up to `limit` records starting at `from`, in sequence order
    async fn read_range(
        &self,
        id: &SessionId,
        from: Sequence,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, BackendError>;

    /// Number of records in the log
    async fn length(&self, id: &SessionId) -> Result<u64, BackendError>;

    /// Watch the log length. Implementations publish the new length after
    /// every acknowledged append made through this handle.
    async fn watch(&self, id: &SessionId) -> Result<watch::Receiver<u64>, BackendError>;

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, BackendError>;

    /// Remove a session with its log and lease. Returns false if it did not exist.
    async fn delete_session(&self, id: &SessionId) -> Result<bool, BackendError>;

    async fn acquire_lease(
        &self,
        id: &SessionId,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseOutcome, BackendError>;

    /// Extend a lease held by `owner`. Returns false if `owner` no longer holds it.
    async fn renew_lease(
        &self,
        id: &SessionId,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, BackendError>;

    /// Drop a lease held by `owner`. Returns false if `owner` did not hold it.
    async fn release_lease(&self, id: &SessionId, owner: &str) -> Result<bool, BackendError>;

    /// Current lease, expired or not
    async fn lease(&self, id: &SessionId) -> Result<Option<Lease>, BackendError>;

    async fn close(&self) -> Result<(), BackendError>;
}
