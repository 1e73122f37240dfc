//! Bodies of the engine's own records: fatal-error and end frames

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, Payload};
use crate::error::{ErrorClassification, RiverError};

pub const FATAL_ERROR_TAG: &str = "fatal-error";
pub const END_TAG: &str = "end";

/// Terminal failure delivered to every subscriber of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FatalErrorFrame {
    pub classification: ErrorClassification,
    pub message: String,
    pub retryable: bool,
}

impl FatalErrorFrame {
    pub fn new(classification: ErrorClassification, message: impl Into<String>) -> Self {
        Self {
            classification,
            message: message.into(),
            retryable: classification.is_retryable(),
        }
    }

    /// Frame for an error. Unclassified errors become producer failures.
    pub fn from_error(error: &RiverError) -> Self {
        let classification = error
            .classification()
            .unwrap_or(ErrorClassification::ProducerFailure);
        Self::new(classification, error.to_string())
    }

    pub fn to_payload(&self) -> Result<Payload, CodecError> {
        Payload::json(FATAL_ERROR_TAG, self)
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, CodecError> {
        payload.parse()
    }
}

/// Why a log ended normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Completed,
    Aborted,
}

/// End-of-stream marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndFrame {
    pub reason: EndReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EndFrame {
    pub fn completed() -> Self {
        Self {
            reason: EndReason::Completed,
            detail: None,
        }
    }

    pub fn aborted(detail: impl Into<String>) -> Self {
        Self {
            reason: EndReason::Aborted,
            detail: Some(detail.into()),
        }
    }

    pub fn to_payload(&self) -> Result<Payload, CodecError> {
        Payload::json(END_TAG, self)
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, CodecError> {
        payload.parse()
    }
}
