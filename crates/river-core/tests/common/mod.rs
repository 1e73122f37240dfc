//! Shared helpers for river-core integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mockall::mock;
use river_core::backend::{BackendError, BackendKind, Lease, LeaseOutcome, LogBackend, MemoryBackend};
use river_core::config::{RegistryConfig, RiverConfig, RunnerConfig, StoreConfig, SweeperConfig};
use river_core::recovery::RetryConfig;
use river_core::{
    Authorization, AuthorizationGate, ChunkRecord, DeliveryEvent, Emission, FnProducer, Payload,
    Producer, ProducerContext, ProducerError, RequestContext, RiverResult, Sequence, SessionId,
    SessionMeta, Subscription,
};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

mock! {
    pub Gate {}

    #[async_trait]
    impl AuthorizationGate for Gate {
        async fn check_authorization(&self, context: &RequestContext) -> RiverResult<Authorization>;
    }
}

/// Engine configuration tuned for fast tests
pub fn test_config() -> RiverConfig {
    RiverConfig {
        store: StoreConfig::memory()
            .with_poll_interval(Duration::from_millis(20))
            .with_read_batch_size(2),
        retry: RetryConfig::default()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(2))
            .with_max_delay(Duration::from_millis(10))
            .with_jitter(false),
        registry: RegistryConfig::new(Duration::from_millis(400), Duration::from_millis(100)),
        runner: RunnerConfig::default().with_detached_grace(Some(Duration::from_secs(5))),
        sweeper: SweeperConfig {
            enabled: false,
            interval: Duration::from_millis(50),
        },
        ..RiverConfig::default()
    }
}

/// Producer yielding each text as a JSON string chunk, `delay` apart
pub fn scripted(texts: &[&str], delay: Duration) -> Arc<dyn Producer> {
    let texts: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
    Arc::new(FnProducer::new(move |_input: Value, _ctx: ProducerContext| {
        stream::iter(texts.clone()).then(move |text| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, ProducerError>(Emission::Chunk(Payload::json("chunk", &text)?))
        })
    }))
}

/// Producer that never yields
pub fn silent() -> Arc<dyn Producer> {
    Arc::new(FnProducer::new(|_input: Value, _ctx: ProducerContext| {
        stream::pending::<Result<Emission, ProducerError>>()
    }))
}

/// Collect a subscription to its end, failing the test if it hangs
pub async fn drain(subscription: Subscription) -> Vec<DeliveryEvent> {
    tokio::time::timeout(Duration::from_secs(5), subscription.collect())
        .await
        .expect("subscription did not terminate")
}

/// Chunk bodies decoded as strings, in delivery order
pub fn texts(events: &[DeliveryEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            DeliveryEvent::Chunk(chunk) => chunk.payload.parse::<String>().ok(),
            _ => None,
        })
        .collect()
}

pub fn terminal_count(events: &[DeliveryEvent]) -> usize {
    events.iter().filter(|event| event.is_terminal()).count()
}

/// Memory backend that fails appends on demand
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    /// Appends rejected before reaching storage
    fail_appends: AtomicUsize,
    /// Appends that land but report failure, as if the acknowledgment was lost
    lose_acks: AtomicUsize,
    append_calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_appends(&self, count: usize) {
        self.fail_appends.store(count, Ordering::SeqCst);
    }

    pub fn lose_next_acks(&self, count: usize) {
        self.lose_acks.store(count, Ordering::SeqCst);
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LogBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.inner.ping().await
    }

    async fn create_session(&self, meta: &SessionMeta) -> Result<(), BackendError> {
        self.inner.create_session(meta).await
    }

    async fn load_session(&self, id: &SessionId) -> Result<Option<SessionMeta>, BackendError> {
        self.inner.load_session(id).await
    }

    async fn update_session(&self, meta: &SessionMeta) -> Result<(), BackendError> {
        self.inner.update_session(meta).await
    }

    async fn append(&self, id: &SessionId, record: &ChunkRecord) -> Result<(), BackendError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.fail_appends) {
            return Err(BackendError::Unavailable("injected append failure".into()));
        }
        self.inner.append(id, record).await?;
        if Self::take(&self.lose_acks) {
            return Err(BackendError::Unavailable("injected lost acknowledgment".into()));
        }
        Ok(())
    }

    async fn read_range(
        &self,
        id: &SessionId,
        from: Sequence,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, BackendError> {
        self.inner.read_range(id, from, limit).await
    }

    async fn length(&self, id: &SessionId) -> Result<u64, BackendError> {
        self.inner.length(id).await
    }

    async fn watch(&self, id: &SessionId) -> Result<watch::Receiver<u64>, BackendError> {
        self.inner.watch(id).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, BackendError> {
        self.inner.list_sessions().await
    }

    async fn delete_session(&self, id: &SessionId) -> Result<bool, BackendError> {
        self.inner.delete_session(id).await
    }

    async fn acquire_lease(
        &self,
        id: &SessionId,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseOutcome, BackendError> {
        self.inner.acquire_lease(id, owner, ttl).await
    }

    async fn renew_lease(
        &self,
        id: &SessionId,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        self.inner.renew_lease(id, owner, ttl).await
    }

    async fn release_lease(&self, id: &SessionId, owner: &str) -> Result<bool, BackendError> {
        self.inner.release_lease(id, owner).await
    }

    async fn lease(&self, id: &SessionId) -> Result<Option<Lease>, BackendError> {
        self.inner.lease(id).await
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.inner.close().await
    }
}
