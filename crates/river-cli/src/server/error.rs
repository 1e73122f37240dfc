//! HTTP error responses

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use river_sdk::RiverError;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    retryable: bool,
}

/// A [`RiverError`] rendered as a JSON error response
#[derive(Debug)]
pub struct ApiError(pub RiverError);

impl From<RiverError> for ApiError {
    fn from(error: RiverError) -> Self {
        Self(error)
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(RiverError::InvalidInput(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RiverError::UnknownStream(_) => StatusCode::NOT_FOUND,
            RiverError::AlreadyOwned { .. } => StatusCode::CONFLICT,
            RiverError::SessionTerminated { .. } => StatusCode::GONE,
            RiverError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RiverError::AuthorizationDenied { .. } => StatusCode::FORBIDDEN,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            RiverError::UnknownStream(_) => "UnknownStream",
            RiverError::InvalidInput(_) => "InvalidInput",
            e => e
                .classification()
                .map(|classification| classification.as_str())
                .unwrap_or("Internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: self.code(),
            message: self.0.to_string(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (RiverError::malformed_token("bad"), StatusCode::BAD_REQUEST),
            (RiverError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (RiverError::UnknownStream("x".into()), StatusCode::NOT_FOUND),
            (RiverError::already_owned("s"), StatusCode::CONFLICT),
            (RiverError::terminated("s", "gone"), StatusCode::GONE),
            (
                RiverError::StoreUnavailable {
                    message: "down".into(),
                    attempts: 3,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (RiverError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError(error).status(), status);
        }
    }
}
