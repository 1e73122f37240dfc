//! Console rendering of delivery events

use async_trait::async_trait;
use river_core::{CodecRegistry, Payload};
use river_sdk::protocol::decode_agent_chunk;
use river_sdk::{
    AgentChunk, DeliveredChunk, FatalErrorFrame, ResumptionToken, RiverError, SessionId,
    StreamCallbacks, StreamInfo, StreamOutcome, agent_codecs,
};
use serde_json::{Value, json};
use std::io::Write;
use tokio::sync::oneshot;

/// Prints events as they arrive, either human readable or as JSON lines
pub struct EventPrinter {
    json: bool,
    codecs: CodecRegistry<AgentChunk>,
    chunks: usize,
    detach_after: Option<usize>,
    detach: Option<oneshot::Sender<()>>,
    in_text: bool,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            codecs: agent_codecs(),
            chunks: 0,
            detach_after: None,
            detach: None,
            in_text: false,
        }
    }

    /// Signal the returned receiver once `count` chunks were printed
    pub fn detach_after(&mut self, count: usize) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.detach_after = Some(count);
        self.detach = Some(tx);
        rx
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    fn line(&mut self, event: &str, data: Value) {
        if self.json {
            println!("{}", json!({ "event": event, "data": data }));
        }
    }

    fn end_text(&mut self) {
        if self.in_text {
            println!();
            self.in_text = false;
        }
    }

    fn render_chunk(&mut self, sequence: u64, payload: &Payload) {
        match decode_agent_chunk(&self.codecs, payload) {
            Ok(Some(AgentChunk::TextDelta { text, .. })) => {
                if !self.in_text {
                    print!("assistant: ");
                    self.in_text = true;
                }
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            Ok(Some(AgentChunk::TextStart { .. })) => {}
            Ok(Some(AgentChunk::TextEnd { .. })) => self.end_text(),
            Ok(Some(AgentChunk::ToolInputStart { tool_name, .. })) => {
                self.end_text();
                println!("[{}] calling {}", sequence, tool_name);
            }
            Ok(Some(AgentChunk::ToolResult {
                tool_name, output, ..
            })) => {
                self.end_text();
                println!("[{}] {} returned {}", sequence, tool_name, output);
            }
            Ok(None) | Err(_) => {
                self.end_text();
                println!("[{}] {} {}", sequence, payload.tag, payload.body);
            }
        }
    }
}

#[async_trait]
impl StreamCallbacks for EventPrinter {
    async fn on_start(&mut self, session_id: &SessionId) {
        if !self.json {
            println!("session {}", session_id);
        }
    }

    async fn on_info(&mut self, info: &StreamInfo) {
        if self.json {
            self.line("info", serde_json::to_value(info).unwrap_or_default());
        } else if let Some(token) = &info.resumption_token {
            println!("resume with: river resume {}", token);
        }
    }

    async fn on_chunk(&mut self, chunk: &DeliveredChunk) {
        self.chunks += 1;
        if self.json {
            self.line("chunk", serde_json::to_value(chunk).unwrap_or_default());
        } else {
            self.render_chunk(chunk.sequence, &chunk.payload);
        }

        if self.detach_after.is_some_and(|limit| self.chunks >= limit) {
            if let Some(tx) = self.detach.take() {
                let _ = tx.send(());
            }
        }
    }

    async fn on_fatal_error(&mut self, frame: &FatalErrorFrame) {
        self.end_text();
        if self.json {
            self.line("fatal-error", serde_json::to_value(frame).unwrap_or_default());
        } else {
            eprintln!(
                "stream failed: {} ({})",
                frame.message,
                frame.classification.as_str()
            );
        }
    }

    async fn on_error(&mut self, error: &RiverError) {
        self.end_text();
        if self.json {
            self.line(
                "error",
                json!({
                    "classification": error.classification().map(|c| c.as_str()),
                    "message": error.to_string(),
                }),
            );
        }
    }

    async fn on_success(&mut self) {
        self.end_text();
        self.line("end", json!({ "reason": "completed" }));
    }

    async fn on_abort(&mut self) {
        self.end_text();
        self.line("end", json!({ "reason": "aborted" }));
    }
}

/// Final status line for a driven stream
pub fn report(outcome: &StreamOutcome, json: bool) {
    if json {
        return;
    }
    match outcome {
        StreamOutcome::Completed => println!("done"),
        StreamOutcome::Aborted { detail } => match detail {
            Some(detail) => println!("aborted: {}", detail),
            None => println!("aborted"),
        },
        StreamOutcome::Failed(_) => {}
        StreamOutcome::Detached { resumption_token } => print_detached(resumption_token.as_ref()),
    }
}

fn print_detached(token: Option<&ResumptionToken>) {
    match token {
        Some(token) => println!("detached, resume with: river resume {}", token),
        None => println!("detached, this stream cannot be resumed"),
    }
}
