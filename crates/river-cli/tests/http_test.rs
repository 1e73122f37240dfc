//! Integration tests for the HTTP transport.
//!
//! Drives `build_app` in-process with `tower::ServiceExt::oneshot` against a
//! memory-backed engine and the demo routes with short delays.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use http_body_util::BodyExt;
use river_cli::server::{AppState, SECRET_HEADER, build_app};
use river_cli::streams::{Pacing, router_with_pacing};
use river_core::backend::MemoryBackend;
use river_core::config::{ServerConfig, StoreConfig};
use river_core::{AllowAll, AuthorizationGate, SharedSecretGate};
use river_sdk::{
    DeliveryEvent, EndReason, RequestContext, RiverClient, RiverConfig, SessionId, StreamEngine,
};
use serde_json::{Value, json};
use tower::ServiceExt;

const BASE: &str = "/api/river";

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, Clone)]
struct SseEvent {
    event: String,
    id: Option<String>,
    data: Value,
}

/// Parse SSE events from a response body. Keep-alive comments are skipped.
fn parse_sse_events(body: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut event = String::new();
    let mut id = None;
    let mut data = String::new();

    let mut flush = |event: &mut String, id: &mut Option<String>, data: &mut String| {
        if !event.is_empty() {
            events.push(SseEvent {
                event: std::mem::take(event),
                id: id.take(),
                data: serde_json::from_str(data).unwrap_or(Value::Null),
            });
        }
        data.clear();
    };

    for line in body.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event = name.trim().to_string();
        } else if let Some(value) = line.strip_prefix("id:") {
            id = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data = value.trim().to_string();
        } else if line.is_empty() {
            flush(&mut event, &mut id, &mut data);
        }
    }
    flush(&mut event, &mut id, &mut data);

    events
}

fn fast_pacing() -> Pacing {
    Pacing {
        per_character: Duration::from_millis(2),
        per_word: Duration::from_millis(2),
    }
}

fn test_client(gate: Arc<dyn AuthorizationGate>) -> RiverClient {
    let config = RiverConfig {
        store: StoreConfig::memory().with_poll_interval(Duration::from_millis(10)),
        ..RiverConfig::default()
    };
    let engine = StreamEngine::new(Arc::new(MemoryBackend::new()), gate, &config);
    RiverClient::new(engine, router_with_pacing(fast_pacing()))
}

fn app_for(client: RiverClient) -> Router {
    build_app(AppState::new(client, &ServerConfig::default()), BASE)
}

fn test_app() -> Router {
    app_for(test_client(Arc::new(AllowAll)))
}

fn start_request(body: Value) -> Request<Body> {
    Request::post(BASE)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn stream_events(app: Router, request: Request<Body>) -> Vec<SseEvent> {
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    parse_sse_events(&body_string(response).await)
}

fn chunk_sequences(events: &[SseEvent]) -> Vec<u64> {
    events
        .iter()
        .filter(|e| e.event == "chunk")
        .map(|e| e.data["sequence"].as_u64().unwrap())
        .collect()
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn classify_streams_every_character_without_ids() {
    let events = stream_events(
        test_app(),
        start_request(json!({"stream": "classifyCharacters", "input": {"message": "ab!"}})),
    )
    .await;

    let chunks: Vec<&SseEvent> = events.iter().filter(|e| e.event == "chunk").collect();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].data["chunk"]["character"], "a");
    assert_eq!(chunks[0].data["chunk"]["type"], "vowel");
    assert_eq!(chunks[1].data["chunk"]["type"], "consonant");
    assert_eq!(chunks[2].data["chunk"]["type"], "special");

    assert!(events.iter().all(|e| e.id.is_none()));
    let last = events.last().unwrap();
    assert_eq!(last.event, "end");
    assert_eq!(last.data["reason"], "completed");
}

#[tokio::test]
async fn ask_question_announces_tokens() {
    let events = stream_events(
        test_app(),
        start_request(json!({"routerStreamKey": "askQuestion", "input": {"question": "rust?"}})),
    )
    .await;

    assert_eq!(events[0].event, "info");
    assert!(events[0].id.is_some());
    assert!(events[0].data["sessionId"].is_string());

    let chunks: Vec<&SseEvent> = events.iter().filter(|e| e.event == "chunk").collect();
    assert!(chunks.iter().all(|e| e.id.is_some()));
    assert_eq!(chunks[0].data["tag"], "tool-input-start");
    assert_eq!(chunks[0].data["chunk"]["toolName"], "write_memory");
    assert_eq!(chunks[1].data["chunk"]["output"]["success"], true);

    let text: String = chunks
        .iter()
        .filter(|e| e.data["tag"] == "text-delta")
        .map(|e| e.data["chunk"]["text"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(text, "You asked: rust?. That is a good question.");
    assert_eq!(events.last().unwrap().event, "end");
}

#[tokio::test]
async fn resume_key_replays_the_tail() {
    let app = test_app();
    let first = stream_events(
        app.clone(),
        start_request(json!({"stream": "askQuestion", "input": {"question": "tail"}})),
    )
    .await;
    let chunks: Vec<&SseEvent> = first.iter().filter(|e| e.event == "chunk").collect();
    let all = chunk_sequences(&first);
    let token = chunks[2].id.clone().unwrap();

    let resumed = stream_events(
        app,
        Request::get(format!("{}?resumeKey={}", BASE, token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_ne!(resumed[0].event, "info");
    assert_eq!(chunk_sequences(&resumed), all[3..].to_vec());
    assert_eq!(resumed.last().unwrap().event, "end");
}

#[tokio::test]
async fn last_event_id_header_resumes() {
    let app = test_app();
    let first = stream_events(
        app.clone(),
        start_request(json!({"stream": "askQuestion", "input": {"question": "header"}})),
    )
    .await;
    let info_token = first[0].id.clone().unwrap();

    let resumed = stream_events(
        app,
        Request::get(BASE)
            .header("last-event-id", info_token)
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(chunk_sequences(&resumed), chunk_sequences(&first));
}

#[tokio::test]
async fn wrong_secret_yields_single_fatal_error() {
    let app = app_for(test_client(Arc::new(SharedSecretGate::new("hunter2"))));
    let request = Request::post(BASE)
        .header("content-type", "application/json")
        .header(SECRET_HEADER, "wrong")
        .body(Body::from(
            json!({"stream": "askQuestion", "input": {"question": "q"}}).to_string(),
        ))
        .unwrap();

    let events = stream_events(app, request).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "fatal-error");
    assert_eq!(events[0].data["classification"], "AuthorizationDenied");
}

#[tokio::test]
async fn bearer_secret_is_accepted() {
    let app = app_for(test_client(Arc::new(SharedSecretGate::new("hunter2"))));
    let request = Request::post(BASE)
        .header("content-type", "application/json")
        .header("authorization", "Bearer hunter2")
        .body(Body::from(
            json!({"stream": "classifyCharacters", "input": {"message": "ok"}}).to_string(),
        ))
        .unwrap();

    let events = stream_events(app, request).await;
    assert_eq!(events.last().unwrap().event, "end");
}

// ============================================================================
// Error Cases
// ============================================================================

#[tokio::test]
async fn unknown_stream_is_not_found() {
    let response = test_app()
        .oneshot(start_request(json!({"stream": "nope", "input": {}})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["error"], "UnknownStream");
}

#[tokio::test]
async fn invalid_input_is_bad_request() {
    let response = test_app()
        .oneshot(start_request(
            json!({"stream": "classifyCharacters", "input": {"text": "x"}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["error"], "InvalidInput");
    assert_eq!(json["retryable"], false);
}

#[tokio::test]
async fn malformed_token_is_bad_request() {
    let response = test_app()
        .oneshot(
            Request::get(format!("{}?resumeKey=not-a-token", BASE))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["error"], "MalformedToken");
}

#[tokio::test]
async fn resume_without_key_is_bad_request() {
    let response = test_app()
        .oneshot(Request::get(BASE).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Sessions and Health
// ============================================================================

#[tokio::test]
async fn abort_unknown_session_is_not_found() {
    let uri = format!("{}/sessions/{}", BASE, SessionId::generate());
    let response = test_app()
        .oneshot(Request::delete(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn abort_running_session_ends_its_stream() {
    let client = test_client(Arc::new(AllowAll));
    let app = app_for(client.clone());

    let mut subscription = client
        .start(
            "classifyCharacters",
            json!({"message": "a fairly long message to classify slowly"}),
            RequestContext::new(),
        )
        .await
        .unwrap();
    let uri = format!("{}/sessions/{}", BASE, subscription.session_id());

    let response = app
        .oneshot(Request::delete(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut last = None;
    while let Some(event) = subscription.next().await {
        last = Some(event);
    }
    match last {
        Some(DeliveryEvent::End(end)) => assert_eq!(end.reason, EndReason::Aborted),
        other => panic!("expected an aborted end, got {:?}", other),
    }
}

#[tokio::test]
async fn healthz_reports_ok() {
    let response = test_app()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["shuttingDown"], false);
}
