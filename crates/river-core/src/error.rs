//! Error types for the River stream engine
//!
//! `RiverError` is the engine-level taxonomy surfaced to transports and
//! consumers. Storage adapters report the narrower [`BackendError`], which is
//! folded into `RiverError` at the store boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::backend::BackendError;
use crate::codec::CodecError;

/// Result type alias for engine operations
pub type RiverResult<T> = Result<T, RiverError>;

/// Stable classification carried by fatal-error frames.
///
/// The string form never changes between releases; consumers match on it to
/// tell "retry possible" from "final".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClassification {
    AuthorizationDenied,
    StoreUnavailable,
    ProducerFailure,
    AlreadyOwned,
    SessionTerminated,
    MalformedToken,
    SessionAbandoned,
}

impl ErrorClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied => "AuthorizationDenied",
            Self::StoreUnavailable => "StoreUnavailable",
            Self::ProducerFailure => "ProducerFailure",
            Self::AlreadyOwned => "AlreadyOwned",
            Self::SessionTerminated => "SessionTerminated",
            Self::MalformedToken => "MalformedToken",
            Self::SessionAbandoned => "SessionAbandoned",
        }
    }

    /// Whether a client may reasonably retry after seeing this classification
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::AlreadyOwned)
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the stream engine
#[derive(Error, Debug, Clone)]
pub enum RiverError {
    /// The authorization gate refused the start request
    #[error("Authorization denied: {reason}")]
    AuthorizationDenied { reason: String },

    /// The backing store could not be reached within the retry budget
    #[error("Store unavailable after {attempts} attempt(s): {message}")]
    StoreUnavailable { message: String, attempts: u32 },

    /// The producer raised while generating chunks
    #[error("Producer failure: {message}")]
    ProducerFailure { message: String },

    /// Another stream runner holds the session lease
    #[error("Session {session_id} is already owned by an active runner")]
    AlreadyOwned { session_id: String },

    /// The session is finished, expired, or unknown and cannot be resumed
    #[error("Session {session_id} cannot be resumed: {reason}")]
    SessionTerminated { session_id: String, reason: String },

    /// A resumption token failed to decode or points outside the log
    #[error("Malformed resumption token: {reason}")]
    MalformedToken { reason: String },

    /// The session's runner disappeared without writing a terminal frame
    #[error("Session {session_id} was abandoned by its runner")]
    SessionAbandoned { session_id: String },

    /// No stream is registered under the requested name
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    /// Start input failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Payload encoding or decoding failed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invariant violations and other unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RiverError {
    pub fn authorization_denied(reason: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            reason: reason.into(),
        }
    }

    pub fn producer(message: impl Into<String>) -> Self {
        Self::ProducerFailure {
            message: message.into(),
        }
    }

    pub fn already_owned(session_id: impl fmt::Display) -> Self {
        Self::AlreadyOwned {
            session_id: session_id.to_string(),
        }
    }

    pub fn terminated(session_id: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::SessionTerminated {
            session_id: session_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed_token(reason: impl Into<String>) -> Self {
        Self::MalformedToken {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The stable classification for errors that can terminate a session or
    /// be reported to a client. Plumbing errors have none.
    pub fn classification(&self) -> Option<ErrorClassification> {
        match self {
            Self::AuthorizationDenied { .. } => Some(ErrorClassification::AuthorizationDenied),
            Self::StoreUnavailable { .. } => Some(ErrorClassification::StoreUnavailable),
            Self::ProducerFailure { .. } => Some(ErrorClassification::ProducerFailure),
            Self::AlreadyOwned { .. } => Some(ErrorClassification::AlreadyOwned),
            Self::SessionTerminated { .. } => Some(ErrorClassification::SessionTerminated),
            Self::MalformedToken { .. } => Some(ErrorClassification::MalformedToken),
            Self::SessionAbandoned { .. } => Some(ErrorClassification::SessionAbandoned),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.classification()
            .is_some_and(|classification| classification.is_retryable())
    }

    /// Errors caused by what the client sent rather than by server state
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken { .. } | Self::UnknownStream(_) | Self::InvalidInput(_)
        )
    }
}

impl From<BackendError> for RiverError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::NotFound(session_id) => Self::SessionTerminated {
                session_id,
                reason: "session is unknown or past its retention window".to_string(),
            },
            BackendError::SequenceConflict { session_id, .. }
            | BackendError::AlreadyExists(session_id) => Self::AlreadyOwned { session_id },
            other if other.is_transient() => Self::StoreUnavailable {
                message: other.to_string(),
                attempts: 1,
            },
            other => Self::Internal(other.to_string()),
        }
    }
}
