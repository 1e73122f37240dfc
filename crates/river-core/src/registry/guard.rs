//! Scoped session ownership

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::LogBackend;
use crate::config::RegistryConfig;
use crate::error::RiverResult;
use crate::types::SessionId;

/// Ownership of one session, held by its runner.
///
/// A heartbeat task renews the lease in the background. If a renewal is
/// rejected the [`lost`](Self::lost) token fires and the holder must stop
/// writing. Dropping the guard without [`release`](Self::release) still
/// releases the lease on a best-effort background task.
pub struct OwnershipGuard {
    backend: Arc<dyn LogBackend>,
    session_id: SessionId,
    owner: String,
    lost: CancellationToken,
    stop: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
    released: bool,
}

impl OwnershipGuard {
    pub(super) fn start(
        backend: Arc<dyn LogBackend>,
        session_id: SessionId,
        owner: String,
        config: RegistryConfig,
    ) -> Self {
        let lost = CancellationToken::new();
        let stop = CancellationToken::new();

        let heartbeat = tokio::spawn(heartbeat_loop(
            backend.clone(),
            session_id.clone(),
            owner.clone(),
            config,
            lost.clone(),
            stop.clone(),
        ));

        Self {
            backend,
            session_id,
            owner,
            lost,
            stop,
            heartbeat: Some(heartbeat),
            released: false,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Fires when the lease was taken over or could not be renewed
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Stop the heartbeat and drop the lease
    pub async fn release(mut self) -> RiverResult<()> {
        self.stop.cancel();
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.await;
        }
        self.released = true;
        let released = self.backend.release_lease(&self.session_id, &self.owner).await?;
        debug!(
            session_id = %self.session_id,
            owner = %self.owner,
            released,
            "Ownership released"
        );
        Ok(())
    }
}

impl Drop for OwnershipGuard {
    fn drop(&mut self) {
        self.stop.cancel();
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let backend = self.backend.clone();
        let session_id = self.session_id.clone();
        let owner = std::mem::take(&mut self.owner);
        runtime.spawn(async move {
            if let Err(e) = backend.release_lease(&session_id, &owner).await {
                warn!(session_id = %session_id, error = %e, "Failed to release dropped ownership");
            }
        });
    }
}

async fn heartbeat_loop(
    backend: Arc<dyn LogBackend>,
    session_id: SessionId,
    owner: String,
    config: RegistryConfig,
    lost: CancellationToken,
    stop: CancellationToken,
) {
    let mut ticker = interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match backend
            .renew_lease(&session_id, &owner, config.lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(session_id = %session_id, owner = %owner, "Lease lost, stopping writer");
                lost.cancel();
                return;
            }
            Err(e) => {
                // A transient failure is tolerated; the lease only lapses if
                // renewals keep failing for a whole TTL.
                warn!(session_id = %session_id, error = %e, "Lease renewal failed");
            }
        }
    }
}
