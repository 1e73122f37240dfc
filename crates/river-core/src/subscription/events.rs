//! Events delivered to consumers

use serde::Serialize;

use crate::codec::Payload;
use crate::frames::{EndFrame, FatalErrorFrame};
use crate::token::ResumptionToken;
use crate::types::{Sequence, SessionId};

/// Out-of-band notice. The first one of a started stream announces the
/// resumption token; later ones carry producer `info` records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub session_id: SessionId,
    /// Present only for resumable sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumption_token: Option<ResumptionToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredChunk {
    pub sequence: Sequence,
    pub payload: Payload,
    /// Resumes just after this chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumption_token: Option<ResumptionToken>,
}

/// One item of a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    Info(StreamInfo),
    Chunk(DeliveredChunk),
    FatalError(FatalErrorFrame),
    End(EndFrame),
}

impl DeliveryEvent {
    /// Terminal events are delivered exactly once and end the sequence
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryEvent::FatalError(_) | DeliveryEvent::End(_))
    }

    /// Wire name, also used as the SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            DeliveryEvent::Info(_) => "info",
            DeliveryEvent::Chunk(_) => "chunk",
            DeliveryEvent::FatalError(_) => "fatal-error",
            DeliveryEvent::End(_) => "end",
        }
    }

    /// Token to resume after this event, if it carries one
    pub fn resumption_token(&self) -> Option<&ResumptionToken> {
        match self {
            DeliveryEvent::Info(info) => info.resumption_token.as_ref(),
            DeliveryEvent::Chunk(chunk) => chunk.resumption_token.as_ref(),
            DeliveryEvent::FatalError(_) | DeliveryEvent::End(_) => None,
        }
    }
}
