//! Run cancellation and consumer presence

use parking_lot::Mutex;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::state::AbortReason;

/// Cooperative abort handle for one run. The first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
    reason: Arc<Mutex<Option<AbortReason>>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child of a parent token, so cancelling the parent aborts this run too
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns false if the run was already aborted
    pub fn abort(&self, reason: AbortReason) -> bool {
        let first = {
            let mut current = self.reason.lock();
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        };
        self.token.cancel();
        first
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Recorded reason. A cancelled parent token without a recorded reason
    /// reads as `Shutdown`.
    pub fn reason(&self) -> Option<AbortReason> {
        let recorded = *self.reason.lock();
        recorded.or_else(|| self.token.is_cancelled().then_some(AbortReason::Shutdown))
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// Counts subscribers attached to a session
#[derive(Debug, Clone)]
pub struct Presence {
    tx: Arc<watch::Sender<usize>>,
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}

impl Presence {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Register a subscriber until the guard is dropped
    pub fn attach(&self) -> PresenceGuard {
        self.tx.send_modify(|count| *count += 1);
        PresenceGuard {
            tx: self.tx.clone(),
        }
    }

    pub fn count(&self) -> usize {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<usize> {
        self.tx.subscribe()
    }
}

/// Keeps one subscriber counted while alive
#[derive(Debug)]
pub struct PresenceGuard {
    tx: Arc<watch::Sender<usize>>,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Resolves once no subscriber has been attached for `grace` without a
/// break. Never resolves when `grace` is `None`.
pub(crate) async fn detached_for(mut presence: watch::Receiver<usize>, grace: Option<Duration>) {
    let Some(grace) = grace else {
        return pending().await;
    };

    loop {
        if presence.wait_for(|count| *count == 0).await.is_err() {
            return pending().await;
        }
        tokio::select! {
            _ = tokio::time::sleep(grace) => return,
            closed = async { presence.wait_for(|count| *count > 0).await.is_err() } => {
                if closed {
                    return pending().await;
                }
            }
        }
    }
}
