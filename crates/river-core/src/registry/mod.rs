//! Session registry
//!
//! Maps session ids to their single active runner. Ownership is a lease in
//! the backend with a TTL that a heartbeat task keeps renewing; a crashed
//! runner simply stops renewing and its lease lapses.

mod guard;

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub use guard::OwnershipGuard;

use crate::backend::{LeaseOutcome, LogBackend};
use crate::config::RegistryConfig;
use crate::error::{RiverError, RiverResult};
use crate::store::LogStore;
use crate::types::{SessionId, SessionMeta, SessionStatus};

/// Grants and tracks per-session ownership
#[derive(Clone)]
pub struct SessionRegistry {
    store: LogStore,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(store: LogStore, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn backend(&self) -> &Arc<dyn LogBackend> {
        self.store.backend()
    }

    /// Claim exclusive ownership of a running session.
    ///
    /// Fails with `SessionTerminated` if the session is unknown or already
    /// finished, and with `AlreadyOwned` while another runner's lease is live.
    pub async fn claim(&self, id: &SessionId) -> RiverResult<OwnershipGuard> {
        let meta = self
            .store
            .session(id)
            .await?
            .ok_or_else(|| RiverError::terminated(id, "session does not exist"))?;
        if meta.status.is_terminal() {
            return Err(RiverError::terminated(
                id,
                format!("session already {}", meta.status),
            ));
        }

        let owner = format!("runner-{}", Uuid::new_v4().simple());
        match self
            .backend()
            .acquire_lease(id, &owner, self.config.lease_ttl)
            .await?
        {
            LeaseOutcome::Acquired => {
                info!(session_id = %id, owner = %owner, "Session claimed");
            }
            LeaseOutcome::Reclaimed { previous_owner } => {
                warn!(
                    session_id = %id,
                    owner = %owner,
                    previous_owner = %previous_owner,
                    "Reclaimed session from an expired lease"
                );
            }
            LeaseOutcome::Held {
                owner: holder,
                expires_at,
            } => {
                info!(
                    session_id = %id,
                    holder = %holder,
                    %expires_at,
                    "Claim rejected, session is owned"
                );
                return Err(RiverError::already_owned(id));
            }
        }

        Ok(OwnershipGuard::start(
            self.backend().clone(),
            id.clone(),
            owner,
            self.config.clone(),
        ))
    }

    /// Release a lease by owner id. Returns false if `owner` did not hold it.
    pub async fn release(&self, id: &SessionId, owner: &str) -> RiverResult<bool> {
        Ok(self.backend().release_lease(id, owner).await?)
    }

    /// Whether a live lease exists for the session
    pub async fn is_active(&self, id: &SessionId) -> RiverResult<bool> {
        match self.backend().lease(id).await {
            Ok(lease) => Ok(lease.is_some_and(|lease| !lease.is_expired())),
            Err(crate::backend::BackendError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Sessions still marked running whose runner no longer holds a live
    /// lease. Recently created sessions inside their first lease TTL are
    /// skipped so a start that has not claimed yet is not misreported.
    pub async fn abandoned(&self) -> RiverResult<Vec<SessionMeta>> {
        let grace = chrono::Duration::from_std(self.config.lease_ttl)
            .unwrap_or(chrono::Duration::MAX);
        let now = chrono::Utc::now();

        let mut abandoned = Vec::new();
        for summary in self.store.list_sessions().await? {
            let meta = summary.meta;
            if meta.status != SessionStatus::Running {
                continue;
            }
            let live = summary.lease.is_some_and(|lease| !lease.is_expired_at(now));
            let fresh = meta
                .created_at
                .checked_add_signed(grace)
                .is_some_and(|deadline| deadline > now);
            if !live && !fresh {
                abandoned.push(meta);
            }
        }
        Ok(abandoned)
    }
}

#[cfg(test)]
mod tests;
