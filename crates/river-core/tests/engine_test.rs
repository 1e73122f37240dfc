//! End-to-end behavior of the stream engine over in-process backends

mod common;

use common::{FlakyBackend, MockGate, drain, scripted, silent, terminal_count, test_config, texts};
use futures::StreamExt;
use river_core::backend::MemoryBackend;
use river_core::{
    AllowAll, Authorization, DeliveryEvent, Emission, EndFrame, EndReason, ErrorClassification,
    FnProducer, ProducerContext, ProducerError, ResumptionToken, RiverError, SessionId,
    SessionMeta, SessionStatus, StartRequest, StreamEngine,
};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn create_engine() -> StreamEngine {
    StreamEngine::new(
        Arc::new(MemoryBackend::new()),
        Arc::new(AllowAll),
        &test_config(),
    )
}

#[tokio::test]
async fn test_resume_after_disconnect_yields_the_rest() {
    let engine = create_engine();
    let mut subscription = engine
        .start(StartRequest::new("letters", scripted(&["a", "b", "c"], Duration::from_millis(30))))
        .await
        .unwrap();

    match subscription.next().await {
        Some(DeliveryEvent::Info(info)) => {
            assert_eq!(info.resumption_token.unwrap().offset(), 0);
        }
        other => panic!("expected the token announcement, got {:?}", other),
    }
    match subscription.next().await {
        Some(DeliveryEvent::Chunk(chunk)) => {
            assert_eq!(chunk.payload.parse::<String>().unwrap(), "a");
        }
        other => panic!("expected chunk a, got {:?}", other),
    }
    let token = subscription.resumption_token().unwrap();
    drop(subscription);

    let resumed = drain(engine.resume(&token.encode()).await.unwrap()).await;

    assert_eq!(texts(&resumed), vec!["b", "c"]);
    assert!(!resumed.iter().any(|e| matches!(e, DeliveryEvent::Info(_))));
    assert_eq!(
        resumed.last(),
        Some(&DeliveryEvent::End(EndFrame::completed()))
    );
}

#[tokio::test]
async fn test_denied_start_yields_single_fatal_error() {
    let mut gate = MockGate::new();
    gate.expect_check_authorization()
        .times(1)
        .returning(|_| Ok(Authorization::deny("bad password")));
    let engine = StreamEngine::new(Arc::new(MemoryBackend::new()), Arc::new(gate), &test_config());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let producer = FnProducer::new(move |_input: Value, _ctx: ProducerContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        futures::stream::empty::<Result<Emission, ProducerError>>()
    });

    let subscription = engine
        .start(StartRequest::new("letters", Arc::new(producer)))
        .await
        .unwrap();
    let session_id = subscription.session_id().clone();
    let events = drain(subscription).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        DeliveryEvent::FatalError(frame) => {
            assert_eq!(frame.classification, ErrorClassification::AuthorizationDenied);
            assert!(!frame.retryable);
        }
        other => panic!("expected a fatal error, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(engine.store().backend().lease(&session_id).await.unwrap().is_none());
    assert_eq!(engine.status(&session_id).await.unwrap(), SessionStatus::Failed);
}

#[tokio::test]
async fn test_transient_append_failures_are_invisible() {
    let backend = Arc::new(FlakyBackend::new());
    let engine = StreamEngine::new(backend.clone(), Arc::new(AllowAll), &test_config());
    backend.fail_next_appends(2);

    let events = drain(
        engine
            .start(StartRequest::new("letters", scripted(&["a", "b", "c"], Duration::ZERO)))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(texts(&events), vec!["a", "b", "c"]);
    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(events.last(), Some(DeliveryEvent::End(_))));
    assert!(backend.append_calls() >= 6);
}

#[tokio::test]
async fn test_lost_acknowledgment_does_not_duplicate() {
    let backend = Arc::new(FlakyBackend::new());
    let engine = StreamEngine::new(backend.clone(), Arc::new(AllowAll), &test_config());
    backend.lose_next_acks(1);

    let subscription = engine
        .start(StartRequest::new("letters", scripted(&["a", "b"], Duration::ZERO)))
        .await
        .unwrap();
    let session_id = subscription.session_id().clone();
    let events = drain(subscription).await;

    assert_eq!(texts(&events), vec!["a", "b"]);
    assert_eq!(engine.store().length(&session_id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_store_exhaustion_fails_the_session() {
    let backend = Arc::new(FlakyBackend::new());
    let engine = StreamEngine::new(backend.clone(), Arc::new(AllowAll), &test_config());
    backend.fail_next_appends(1_000);

    let subscription = engine
        .start(StartRequest::new("letters", scripted(&["a"], Duration::ZERO)))
        .await
        .unwrap();
    let session_id = subscription.session_id().clone();
    let events = drain(subscription).await;

    assert_eq!(terminal_count(&events), 1);
    match events.last() {
        Some(DeliveryEvent::FatalError(frame)) => {
            assert_eq!(frame.classification, ErrorClassification::StoreUnavailable);
            assert!(frame.retryable);
        }
        other => panic!("expected StoreUnavailable, got {:?}", other),
    }
    assert_eq!(engine.status(&session_id).await.unwrap(), SessionStatus::Failed);
}

#[tokio::test]
async fn test_replay_matches_live_from_any_offset() {
    let engine = create_engine();
    let live = drain(
        engine
            .start(StartRequest::new(
                "letters",
                scripted(&["a", "b", "c", "d"], Duration::from_millis(5)),
            ))
            .await
            .unwrap(),
    )
    .await;
    let live_records: Vec<_> = live
        .iter()
        .filter(|e| !matches!(e, DeliveryEvent::Info(_)))
        .cloned()
        .collect();
    let DeliveryEvent::Chunk(first) = &live_records[0] else {
        panic!("expected a chunk first");
    };
    let session_id = first.resumption_token.as_ref().unwrap().session_id().clone();

    for k in 0..=4u64 {
        let token = ResumptionToken::new(session_id.clone(), k);
        let replayed = drain(engine.resume(&token.encode()).await.unwrap()).await;
        assert_eq!(replayed, live_records[k as usize..].to_vec(), "offset {}", k);
    }
}

#[tokio::test]
async fn test_every_subscriber_gets_one_terminal_event() {
    let engine = create_engine();
    let first = engine
        .start(StartRequest::new(
            "letters",
            scripted(&["a", "b", "c"], Duration::from_millis(20)),
        ))
        .await
        .unwrap();
    let token = first.resumption_token().unwrap();

    let early = tokio::spawn(drain(engine.resume(&token.encode()).await.unwrap()));
    let first_events = drain(first).await;
    let late_events = drain(engine.resume(&token.encode()).await.unwrap()).await;
    let early_events = early.await.unwrap();

    for events in [&first_events, &early_events, &late_events] {
        assert_eq!(terminal_count(events), 1);
        assert!(events.last().unwrap().is_terminal());
        assert_eq!(texts(events), vec!["a", "b", "c"]);
    }
}

#[tokio::test]
async fn test_second_start_for_same_session_is_rejected() {
    let engine = create_engine();
    let session_id = SessionId::parse("fixed-session").unwrap();

    let running = engine
        .start(StartRequest::new("quiet", silent()).with_session_id(session_id.clone()))
        .await
        .unwrap();
    let duplicate = engine
        .start(StartRequest::new("quiet", silent()).with_session_id(session_id.clone()))
        .await;
    assert!(matches!(duplicate, Err(RiverError::AlreadyOwned { .. })));

    assert!(engine.abort(&session_id));
    let events = drain(running).await;
    match events.last() {
        Some(DeliveryEvent::End(end)) => assert_eq!(end.reason, EndReason::Aborted),
        other => panic!("expected an aborted end, got {:?}", other),
    }

    let after = engine
        .start(StartRequest::new("quiet", silent()).with_session_id(session_id))
        .await;
    assert!(matches!(after, Err(RiverError::SessionTerminated { .. })));
}

#[tokio::test]
async fn test_resume_rejects_bad_tokens() {
    let engine = create_engine();
    assert!(matches!(
        engine.resume("not a token").await,
        Err(RiverError::MalformedToken { .. })
    ));

    let events = drain(
        engine
            .start(StartRequest::new("letters", scripted(&["a"], Duration::ZERO)))
            .await
            .unwrap(),
    )
    .await;
    let token = events
        .iter()
        .find_map(|e| e.resumption_token().cloned())
        .unwrap();

    let past_end = ResumptionToken::new(token.session_id().clone(), 99);
    assert!(matches!(
        engine.resume(&past_end.encode()).await,
        Err(RiverError::MalformedToken { .. })
    ));

    let unknown = ResumptionToken::new(SessionId::generate(), 0);
    assert!(matches!(
        engine.resume(&unknown.encode()).await,
        Err(RiverError::SessionTerminated { .. })
    ));
}

#[tokio::test]
async fn test_non_resumable_stream_cannot_be_resumed() {
    let engine = create_engine();
    let subscription = engine
        .start(
            StartRequest::new("letters", scripted(&["a"], Duration::ZERO)).with_resumable(false),
        )
        .await
        .unwrap();
    assert!(subscription.resumption_token().is_none());
    let session_id = subscription.session_id().clone();
    drain(subscription).await;

    let token = ResumptionToken::new(session_id, 0);
    assert!(matches!(
        engine.resume(&token.encode()).await,
        Err(RiverError::SessionTerminated { .. })
    ));
}

#[tokio::test]
async fn test_sweep_closes_abandoned_sessions() {
    let engine = create_engine();
    let mut meta = SessionMeta::new(SessionId::generate(), "letters", true);
    meta.created_at -= chrono::Duration::hours(1);
    engine.store().create_session(&meta).await.unwrap();

    let outcome = engine.sweep().await.unwrap();
    assert_eq!(outcome.abandoned, vec![meta.id.clone()]);

    let token = ResumptionToken::new(meta.id.clone(), 0);
    let events = drain(engine.resume(&token.encode()).await.unwrap()).await;
    match events.as_slice() {
        [DeliveryEvent::FatalError(frame)] => {
            assert_eq!(frame.classification, ErrorClassification::SessionAbandoned);
        }
        other => panic!("expected a single abandonment frame, got {:?}", other),
    }
    assert_eq!(engine.status(&meta.id).await.unwrap(), SessionStatus::Failed);
}

#[tokio::test]
async fn test_shutdown_aborts_running_streams() {
    let engine = create_engine();
    let subscription = engine
        .start(StartRequest::new("quiet", silent()))
        .await
        .unwrap();
    assert_eq!(engine.active_sessions().len(), 1);

    assert!(engine.shutdown(Duration::from_secs(2)).await);
    assert!(engine.active_sessions().is_empty());

    let events = drain(subscription).await;
    match events.last() {
        Some(DeliveryEvent::End(end)) => {
            assert_eq!(end.reason, EndReason::Aborted);
            assert_eq!(end.detail.as_deref(), Some("engine shutting down"));
        }
        other => panic!("expected an aborted end, got {:?}", other),
    }
    assert!(engine.start(StartRequest::new("quiet", silent())).await.is_err());
}
