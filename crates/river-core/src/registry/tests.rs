use super::*;
use crate::backend::MemoryBackend;
use crate::config::StoreConfig;
use crate::recovery::RetryConfig;
use std::time::Duration;

fn create_test_registry(lease_ttl: Duration, heartbeat: Duration) -> (SessionRegistry, LogStore) {
    let store = LogStore::new(
        Arc::new(MemoryBackend::new()),
        StoreConfig::memory(),
        RetryConfig::no_retry(),
    );
    let registry = SessionRegistry::new(store.clone(), RegistryConfig::new(lease_ttl, heartbeat));
    (registry, store)
}

async fn running_session(store: &LogStore) -> SessionId {
    let meta = SessionMeta::new(SessionId::generate(), "test", true);
    store.create_session(&meta).await.unwrap();
    meta.id
}

#[tokio::test]
async fn test_claim_is_exclusive() {
    let (registry, store) = create_test_registry(Duration::from_secs(10), Duration::from_secs(3));
    let id = running_session(&store).await;

    let guard = registry.claim(&id).await.unwrap();
    assert!(registry.is_active(&id).await.unwrap());

    assert!(matches!(
        registry.claim(&id).await,
        Err(RiverError::AlreadyOwned { .. })
    ));

    guard.release().await.unwrap();
    assert!(!registry.is_active(&id).await.unwrap());

    let again = registry.claim(&id).await.unwrap();
    again.release().await.unwrap();
}

#[tokio::test]
async fn test_claim_rejects_finished_and_unknown_sessions() {
    let (registry, store) = create_test_registry(Duration::from_secs(10), Duration::from_secs(3));
    let id = running_session(&store).await;
    store
        .finish_session(&id, SessionStatus::Completed, None)
        .await
        .unwrap();

    assert!(matches!(
        registry.claim(&id).await,
        Err(RiverError::SessionTerminated { .. })
    ));
    assert!(matches!(
        registry.claim(&SessionId::generate()).await,
        Err(RiverError::SessionTerminated { .. })
    ));
}

#[tokio::test]
async fn test_expired_lease_can_be_reclaimed() {
    let (registry, store) = create_test_registry(Duration::from_secs(10), Duration::from_secs(3));
    let id = running_session(&store).await;

    // A runner that crashed right after claiming
    store
        .backend()
        .acquire_lease(&id, "runner-crashed", Duration::ZERO)
        .await
        .unwrap();

    let guard = registry.claim(&id).await.unwrap();
    assert_ne!(guard.owner(), "runner-crashed");
    guard.release().await.unwrap();
}

#[tokio::test]
async fn test_dropped_guard_releases_lease() {
    let (registry, store) = create_test_registry(Duration::from_secs(10), Duration::from_secs(3));
    let id = running_session(&store).await;

    let guard = registry.claim(&id).await.unwrap();
    drop(guard);

    for _ in 0..50 {
        if !registry.is_active(&id).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("lease was not released after drop");
}

#[tokio::test]
async fn test_lost_fires_when_lease_taken_over() {
    let (registry, store) =
        create_test_registry(Duration::from_millis(200), Duration::from_millis(20));
    let id = running_session(&store).await;

    let guard = registry.claim(&id).await.unwrap();
    let lost = guard.lost();

    store.backend().release_lease(&id, guard.owner()).await.unwrap();
    store
        .backend()
        .acquire_lease(&id, "runner-intruder", Duration::from_secs(10))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), lost.cancelled())
        .await
        .expect("lost signal should fire");
    assert!(guard.is_lost());
}

#[tokio::test]
async fn test_heartbeat_keeps_lease_alive() {
    let (registry, store) =
        create_test_registry(Duration::from_millis(100), Duration::from_millis(20));
    let id = running_session(&store).await;

    let guard = registry.claim(&id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(registry.is_active(&id).await.unwrap());
    assert!(!guard.is_lost());
    guard.release().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_lists_running_sessions_without_lease() {
    let (registry, store) = create_test_registry(Duration::from_millis(50), Duration::from_millis(10));
    let owned = running_session(&store).await;
    let orphan = running_session(&store).await;
    let done = running_session(&store).await;
    store
        .finish_session(&done, SessionStatus::Completed, None)
        .await
        .unwrap();

    let guard = registry.claim(&owned).await.unwrap();
    store
        .backend()
        .acquire_lease(&orphan, "runner-crashed", Duration::ZERO)
        .await
        .unwrap();

    // Too young to be called abandoned yet
    assert!(registry.abandoned().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(80)).await;
    let abandoned: Vec<_> = registry
        .abandoned()
        .await
        .unwrap()
        .into_iter()
        .map(|meta| meta.id)
        .collect();
    assert_eq!(abandoned, vec![orphan]);

    guard.release().await.unwrap();
}
