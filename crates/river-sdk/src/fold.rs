//! Conversation display model
//!
//! Folds the ordered chunk sequence of an agent stream into the entries a
//! chat UI renders: the user's prompt, assistant text spans grown by their
//! deltas, and tool calls filled in when their result arrives. Records at or
//! below the last applied sequence are skipped, so feeding a replay that
//! overlaps what was already folded changes nothing.

use async_trait::async_trait;
use river_core::codec::{CodecError, CodecRegistry, Payload};
use river_core::{DeliveredChunk, DeliveryEvent, Sequence};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::callbacks::StreamCallbacks;
use crate::protocol::{AgentChunk, agent_codecs, decode_agent_chunk};

/// A finished tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub input: Value,
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ConversationEntry {
    User {
        content: String,
    },
    Assistant {
        id: String,
        content: String,
    },
    /// `tool` stays empty until the matching result arrives
    Tool {
        id: String,
        tool: Option<ToolCall>,
    },
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationFold {
    entries: Vec<ConversationEntry>,
    /// Next sequence the fold will accept
    next_sequence: Sequence,
    #[serde(skip, default = "shared_codecs")]
    codecs: Arc<CodecRegistry<AgentChunk>>,
}

fn shared_codecs() -> Arc<CodecRegistry<AgentChunk>> {
    Arc::new(agent_codecs())
}

impl ConversationFold {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 0,
            codecs: shared_codecs(),
        }
    }

    /// Start a conversation with the user's prompt
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        let mut fold = Self::new();
        fold.entries.push(ConversationEntry::User {
            content: prompt.into(),
        });
        fold
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn next_sequence(&self) -> Sequence {
        self.next_sequence
    }

    /// Apply one persisted record. Returns false when the record was already
    /// folded in.
    pub fn apply(&mut self, sequence: Sequence, payload: &Payload) -> Result<bool, CodecError> {
        if sequence < self.next_sequence {
            return Ok(false);
        }
        let chunk = decode_agent_chunk(&self.codecs, payload)?;
        self.next_sequence = sequence + 1;
        if let Some(chunk) = chunk {
            self.apply_chunk(chunk);
        }
        Ok(true)
    }

    /// Apply a delivery event. Only chunks change the model.
    pub fn apply_event(&mut self, event: &DeliveryEvent) -> Result<bool, CodecError> {
        match event {
            DeliveryEvent::Chunk(chunk) => self.apply(chunk.sequence, &chunk.payload),
            _ => Ok(false),
        }
    }

    fn apply_chunk(&mut self, chunk: AgentChunk) {
        match chunk {
            AgentChunk::TextStart { id } => {
                self.entries.push(ConversationEntry::Assistant {
                    id,
                    content: String::new(),
                });
            }
            AgentChunk::TextDelta { id, text } => {
                let span = self.entries.iter_mut().find_map(|entry| match entry {
                    ConversationEntry::Assistant { id: span_id, content } if *span_id == id => {
                        Some(content)
                    }
                    _ => None,
                });
                if let Some(content) = span {
                    content.push_str(&text);
                }
            }
            AgentChunk::ToolInputStart { id, .. } => {
                self.entries.push(ConversationEntry::Tool { id, tool: None });
            }
            AgentChunk::ToolResult {
                tool_call_id,
                tool_name,
                input,
                output,
                dynamic: false,
            } => {
                let call = self.entries.iter_mut().find_map(|entry| match entry {
                    ConversationEntry::Tool { id, tool } if *id == tool_call_id => Some(tool),
                    _ => None,
                });
                if let Some(tool) = call {
                    *tool = Some(ToolCall {
                        name: tool_name,
                        input,
                        output,
                    });
                }
            }
            AgentChunk::ToolResult { dynamic: true, .. } | AgentChunk::TextEnd { .. } => {}
        }
    }

    /// Text of every assistant span, in order
    pub fn assistant_text(&self) -> String {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                ConversationEntry::Assistant { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Default for ConversationFold {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConversationFold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationFold")
            .field("entries", &self.entries)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

/// Driving a subscription into a fold keeps the display model current
#[async_trait]
impl StreamCallbacks for ConversationFold {
    async fn on_chunk(&mut self, chunk: &DeliveredChunk) {
        if let Err(e) = self.apply(chunk.sequence, &chunk.payload) {
            warn!(sequence = chunk.sequence, error = %e, "Skipping undecodable chunk");
        }
    }
}

impl PartialEq for ConversationFold {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.next_sequence == other.next_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records() -> Vec<Payload> {
        vec![
            AgentChunk::tool_input_start("call-1", "write_memory"),
            AgentChunk::tool_result(
                "call-1",
                "write_memory",
                json!({"memory": "likes rust"}),
                json!({"success": true, "memory": "likes rust"}),
            ),
            AgentChunk::text_start("t1"),
            AgentChunk::text_delta("t1", "Hello"),
            AgentChunk::text_delta("t1", ", world"),
            AgentChunk::text_end("t1"),
        ]
        .iter()
        .map(|chunk| chunk.encode().unwrap())
        .collect()
    }

    #[test]
    fn test_fold_builds_display_model() {
        let mut fold = ConversationFold::with_prompt("remember that I like rust");
        for (seq, payload) in records().iter().enumerate() {
            assert!(fold.apply(seq as u64, payload).unwrap());
        }

        assert_eq!(fold.entries().len(), 3);
        assert_eq!(
            fold.entries()[1],
            ConversationEntry::Tool {
                id: "call-1".into(),
                tool: Some(ToolCall {
                    name: "write_memory".into(),
                    input: json!({"memory": "likes rust"}),
                    output: json!({"success": true, "memory": "likes rust"}),
                }),
            }
        );
        assert_eq!(fold.assistant_text(), "Hello, world");
        assert_eq!(fold.next_sequence(), 6);
    }

    #[test]
    fn test_overlapping_replay_is_a_no_op() {
        let payloads = records();
        let mut fold = ConversationFold::with_prompt("hi");
        for (seq, payload) in payloads.iter().enumerate().take(4) {
            fold.apply(seq as u64, payload).unwrap();
        }
        // resumed from offset 2: records 2 and 3 arrive a second time
        for (seq, payload) in payloads.iter().enumerate().skip(2) {
            fold.apply(seq as u64, payload).unwrap();
        }
        assert_eq!(fold.assistant_text(), "Hello, world");
    }

    #[test]
    fn test_dynamic_results_and_unknown_tags_are_ignored() {
        let mut fold = ConversationFold::new();
        fold.apply(0, &AgentChunk::tool_input_start("c1", "search").encode().unwrap())
            .unwrap();
        let dynamic = AgentChunk::ToolResult {
            tool_call_id: "c1".into(),
            tool_name: "search".into(),
            input: json!({}),
            output: json!([]),
            dynamic: true,
        };
        fold.apply(1, &dynamic.encode().unwrap()).unwrap();
        fold.apply(2, &Payload::new("finish", r#"{"type":"finish"}"#))
            .unwrap();

        assert_eq!(
            fold.entries(),
            &[ConversationEntry::Tool {
                id: "c1".into(),
                tool: None
            }]
        );
        assert_eq!(fold.next_sequence(), 3);
    }

    #[test]
    fn test_serialized_fold_round_trips() {
        let mut fold = ConversationFold::with_prompt("hi");
        for (seq, payload) in records().iter().enumerate() {
            fold.apply(seq as u64, payload).unwrap();
        }
        let json = fold.to_json().unwrap();
        let restored: ConversationFold = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, fold);
        assert_eq!(restored.to_json().unwrap(), json);
    }
}
