//! Demo streams served by the `river` binary
//!
//! `classifyCharacters` labels each character of a message and is not
//! resumable. `askQuestion` is a scripted agent that records a memory with
//! the `write_memory` tool and then answers in a text span.

use chrono::Utc;
use river_core::CodecRegistry;
use river_sdk::protocol::{TEXT_DELTA, TEXT_END, TEXT_START, TOOL_INPUT_START, TOOL_RESULT};
use river_sdk::{
    AgentChunk, ChunkSink, ProducerContext, ProducerError, StreamDefinition, StreamRouter,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

pub const ASK_QUESTION: &str = "askQuestion";
pub const CLASSIFY_CHARACTERS: &str = "classifyCharacters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterKind {
    Vowel,
    Consonant,
    Special,
}

/// One classified character
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterClass {
    pub character: String,
    #[serde(rename = "type")]
    pub kind: CharacterKind,
}

impl CharacterKind {
    pub const ALL: [CharacterKind; 3] = [Self::Vowel, Self::Consonant, Self::Special];

    /// Chunk tag, same as the serialized `type`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vowel => "vowel",
            Self::Consonant => "consonant",
            Self::Special => "special",
        }
    }
}

pub fn classify(character: char) -> CharacterKind {
    match character.to_ascii_lowercase() {
        'a' | 'e' | 'i' | 'o' | 'u' => CharacterKind::Vowel,
        c if c.is_ascii_alphabetic() => CharacterKind::Consonant,
        _ => CharacterKind::Special,
    }
}

#[derive(Debug, Deserialize)]
struct ClassifyInput {
    message: String,
}

#[derive(Debug, Deserialize)]
struct QuestionInput {
    question: String,
}

/// Delays between emitted chunks
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub per_character: Duration,
    pub per_word: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            per_character: Duration::from_millis(15),
            per_word: Duration::from_millis(40),
        }
    }
}

/// Tags the demo routes write as JSON bodies
pub fn chunk_codecs() -> CodecRegistry<Value> {
    let agent = [TEXT_START, TEXT_DELTA, TEXT_END, TOOL_INPUT_START, TOOL_RESULT];
    let characters = CharacterKind::ALL.map(|kind| kind.as_str());
    agent
        .into_iter()
        .chain(characters)
        .fold(CodecRegistry::new(), |registry, tag| {
            registry.register_json(tag)
        })
}

pub fn demo_router() -> StreamRouter {
    router_with_pacing(Pacing::default())
}

pub fn router_with_pacing(pacing: Pacing) -> StreamRouter {
    StreamRouter::new()
        .route(ASK_QUESTION, ask_question(pacing.per_word))
        .route(CLASSIFY_CHARACTERS, classify_characters(pacing.per_character))
}

fn classify_characters(delay: Duration) -> StreamDefinition {
    StreamDefinition::sink(
        move |input: ClassifyInput, ctx: ProducerContext, sink: ChunkSink<CharacterClass>| async move {
            for character in input.message.chars() {
                if ctx.is_cancelled() {
                    break;
                }
                sink.append_chunk(&CharacterClass {
                    character: character.to_string(),
                    kind: classify(character),
                })
                .await?;
                tokio::time::sleep(delay).await;
            }
            Ok(())
        },
    )
    .resumable(false)
}

fn ask_question(delay: Duration) -> StreamDefinition {
    StreamDefinition::sink(
        move |input: QuestionInput, ctx: ProducerContext, sink: ChunkSink<AgentChunk>| async move {
            answer(input.question, ctx, sink, delay).await
        },
    )
}

async fn answer(
    question: String,
    ctx: ProducerContext,
    sink: ChunkSink<AgentChunk>,
    delay: Duration,
) -> Result<(), ProducerError> {
    let call_id = format!("call-{}", ctx.session_id);
    let text_id = format!("text-{}", ctx.session_id);

    let memory = format!(
        "# Question asked\n\n**{}**\n\n### Question\n{}",
        Utc::now().format("%Y-%m-%d"),
        question
    );
    let input = json!({ "memory": memory });
    sink.append_chunk(&AgentChunk::tool_input_start(&call_id, "write_memory"))
        .await?;
    sink.append_chunk(&AgentChunk::tool_result(
        &call_id,
        "write_memory",
        input,
        json!({ "success": true, "memory": memory }),
    ))
    .await?;

    sink.append_chunk(&AgentChunk::text_start(&text_id)).await?;
    let reply = format!("You asked: {}. That is a good question.", question.trim());
    for (i, word) in reply.split(' ').enumerate() {
        if ctx.is_cancelled() {
            break;
        }
        tokio::time::sleep(delay).await;
        let text = if i == 0 {
            word.to_string()
        } else {
            format!(" {}", word)
        };
        sink.append_chunk(&AgentChunk::text_delta(&text_id, text))
            .await?;
    }
    sink.append_chunk(&AgentChunk::text_end(&text_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let kinds: Vec<_> = "aB? e".chars().map(classify).collect();
        assert_eq!(
            kinds,
            vec![
                CharacterKind::Vowel,
                CharacterKind::Consonant,
                CharacterKind::Special,
                CharacterKind::Special,
                CharacterKind::Vowel,
            ]
        );
    }

    #[test]
    fn test_character_tags_match_serialized_type() {
        for kind in CharacterKind::ALL {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
            assert!(chunk_codecs().is_registered(kind.as_str()));
        }
    }

    #[test]
    fn test_demo_routes() {
        let router = demo_router();
        assert!(router.get(ASK_QUESTION).unwrap().is_resumable());
        assert!(!router.get(CLASSIFY_CHARACTERS).unwrap().is_resumable());
        assert!(
            router
                .get(CLASSIFY_CHARACTERS)
                .unwrap()
                .validate(&json!({"question": "x"}))
                .is_err()
        );
    }
}
