//! Request handlers for the stream endpoint

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use river_sdk::{RequestContext, SessionId, Subscription};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::AppState;
use super::error::ApiError;
use super::sse::to_sse;

/// Header carrying the application secret when no bearer token is sent
pub const SECRET_HEADER: &str = "x-river-secret";
const LAST_EVENT_ID: &str = "last-event-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    /// Route name
    #[serde(alias = "routerStreamKey")]
    pub stream: String,
    #[serde(default)]
    pub input: Value,
    /// Client-chosen session id
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeQuery {
    pub resume_key: Option<String>,
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let mut context = RequestContext::new();

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let secret = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Some(credential) = bearer.or(secret) {
        context = context.with_credential(credential.trim());
    }

    if let Some(agent) = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
    {
        context = context.with_attribute("user-agent", agent);
    }
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        context = context.with_remote_addr(forwarded);
    }
    context
}

fn event_stream(state: &AppState, subscription: Subscription) -> Response {
    let keep_alive = KeepAlive::new().interval(state.keep_alive);
    let codecs = state.codecs.clone();
    Sse::new(subscription.map(move |event| to_sse(event, &codecs)))
        .keep_alive(keep_alive)
        .into_response()
}

/// POST {base}
///
/// Start a routed stream and answer with its delivery events.
pub async fn start_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<StartBody>,
) -> Result<Response, ApiError> {
    let context = request_context(&headers);
    let mut request = state
        .client
        .router()
        .start_request(&body.stream, body.input, context)?;
    if let Some(raw) = body.session_id.as_deref() {
        request = request.with_session_id(SessionId::parse(raw)?);
    }

    let subscription = state.client.engine().start(request).await?;
    info!(
        stream = %body.stream,
        session_id = %subscription.session_id(),
        "Streaming new session"
    );
    Ok(event_stream(&state, subscription))
}

/// GET {base}?resumeKey=...
///
/// Resume from a token. `Last-Event-ID` is accepted in place of the query
/// parameter.
pub async fn resume_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ResumeQuery>,
) -> Result<Response, ApiError> {
    let key = query.resume_key.or_else(|| {
        headers
            .get(LAST_EVENT_ID)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    });
    let Some(key) = key else {
        return Err(ApiError::bad_request(
            "resumeKey query parameter or Last-Event-ID header is required",
        ));
    };

    let subscription = state.client.resume(&key).await?;
    debug!(session_id = %subscription.session_id(), "Streaming resumed session");
    Ok(event_stream(&state, subscription))
}

/// DELETE {base}/sessions/{session_id}
pub async fn abort_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let session_id = SessionId::parse(&session_id)?;
    let body = json!({ "sessionId": session_id });
    if state.client.abort(&session_id) {
        Ok((StatusCode::ACCEPTED, Json(body)).into_response())
    } else {
        Ok((StatusCode::NOT_FOUND, Json(body)).into_response())
    }
}

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> Response {
    let engine = state.client.engine();
    match engine.store().backend().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "activeSessions": engine.active_sessions().len(),
                "shuttingDown": engine.is_shutting_down(),
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "message": e.to_string() })),
        )
            .into_response(),
    }
}
