//! Tool-call sub-protocol carried inside `data` frames
//!
//! Chunks are JSON objects discriminated by their `type` field. Text spans
//! and tool calls are correlated by id; the store and runner never look
//! inside them.

use river_core::codec::{ChunkCodec, CodecError, CodecRegistry, Decoded, JsonCodec, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TEXT_START: &str = "text-start";
pub const TEXT_DELTA: &str = "text-delta";
pub const TEXT_END: &str = "text-end";
pub const TOOL_INPUT_START: &str = "tool-input-start";
pub const TOOL_RESULT: &str = "tool-result";

/// Chunk kinds understood by the conversation fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentChunk {
    /// An assistant text span begins
    TextStart { id: String },
    /// Text appended to the span `id`
    TextDelta { id: String, text: String },
    TextEnd { id: String },
    /// A tool invocation begins; its result arrives with the same call id
    #[serde(rename_all = "camelCase")]
    ToolInputStart { id: String, tool_name: String },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        input: Value,
        output: Value,
        /// Results of dynamically registered tools are not shown
        #[serde(default)]
        dynamic: bool,
    },
}

impl AgentChunk {
    pub fn text_start(id: impl Into<String>) -> Self {
        Self::TextStart { id: id.into() }
    }

    pub fn text_delta(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::TextDelta {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn text_end(id: impl Into<String>) -> Self {
        Self::TextEnd { id: id.into() }
    }

    pub fn tool_input_start(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::ToolInputStart {
            id: id.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
        output: Value,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input,
            output,
            dynamic: false,
        }
    }

    pub fn encode(&self) -> Result<Payload, CodecError> {
        JsonCodec::<AgentChunk>::new().encode(self)
    }
}

/// Registry decoding the known chunk tags. Anything else comes back opaque.
pub fn agent_codecs() -> CodecRegistry<AgentChunk> {
    [TEXT_START, TEXT_DELTA, TEXT_END, TOOL_INPUT_START, TOOL_RESULT]
        .into_iter()
        .fold(CodecRegistry::new(), |registry, tag| {
            registry.register_json(tag)
        })
}

/// Decode a payload, treating unknown tags as `None`
pub fn decode_agent_chunk(
    registry: &CodecRegistry<AgentChunk>,
    payload: &Payload,
) -> Result<Option<AgentChunk>, CodecError> {
    Ok(match registry.decode(payload)? {
        Decoded::Known(chunk) => Some(chunk),
        Decoded::Opaque(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_matches_ai_stream_parts() {
        let payload = AgentChunk::tool_input_start("call-1", "write_memory")
            .encode()
            .unwrap();
        assert_eq!(payload.tag, "tool-input-start");
        let value: Value = serde_json::from_str(&payload.body).unwrap();
        assert_eq!(
            value,
            json!({"type": "tool-input-start", "id": "call-1", "toolName": "write_memory"})
        );
    }

    #[test]
    fn test_unknown_tags_decode_to_none() {
        let registry = agent_codecs();
        let finish = Payload::new("finish", r#"{"type":"finish"}"#);
        assert_eq!(decode_agent_chunk(&registry, &finish).unwrap(), None);

        let delta = AgentChunk::text_delta("t1", "hi").encode().unwrap();
        assert_eq!(
            decode_agent_chunk(&registry, &delta).unwrap(),
            Some(AgentChunk::text_delta("t1", "hi"))
        );
    }
}
