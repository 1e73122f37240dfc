//! Delivery events as Server-Sent Events
//!
//! The SSE event name is the delivery event type. Events that carry a
//! resumption token use it as the SSE `id`, so a browser reconnecting with
//! `Last-Event-ID` resumes right after the last event it saw.

use axum::response::sse::Event;
use river_core::{CodecRegistry, Decoded};
use river_sdk::{DeliveredChunk, DeliveryEvent};
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkData<'a> {
    sequence: u64,
    tag: &'a str,
    chunk: Value,
}

impl<'a> ChunkData<'a> {
    /// Inline bodies of tags registered as JSON. Every other body goes out
    /// verbatim as a string.
    fn new(delivered: &'a DeliveredChunk, codecs: &CodecRegistry<Value>) -> Self {
        let payload = &delivered.payload;
        let chunk = match codecs.decode(payload) {
            Ok(Decoded::Known(value)) => value,
            Ok(Decoded::Opaque(_)) | Err(_) => Value::String(payload.body.clone()),
        };
        Self {
            sequence: delivered.sequence,
            tag: &payload.tag,
            chunk,
        }
    }
}

pub fn to_sse(event: DeliveryEvent, codecs: &CodecRegistry<Value>) -> Result<Event, Infallible> {
    let sse = Event::default().event(event.event_type());
    let sse = match event.resumption_token() {
        Some(token) => sse.id(token.encode()),
        None => sse,
    };

    let data = match &event {
        DeliveryEvent::Info(info) => serde_json::to_string(info),
        DeliveryEvent::Chunk(chunk) => serde_json::to_string(&ChunkData::new(chunk, codecs)),
        DeliveryEvent::FatalError(frame) => serde_json::to_string(frame),
        DeliveryEvent::End(end) => serde_json::to_string(end),
    };
    Ok(match data {
        Ok(data) => sse.data(data),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize event");
            sse.data("{}")
        }
    })
}
