//! River SDK
//!
//! Building blocks for applications on top of the River stream engine:
//!
//! - [`StreamRouter`] maps stream names to producers with typed input
//!   validation and a per-route resumable flag
//! - [`AgentChunk`] is the tool-call sub-protocol carried inside data chunks
//! - [`ConversationFold`] folds an agent stream into a chat display model
//! - [`StreamCallbacks`] and [`CallbackSet`] adapt a subscription to
//!   callback style consumers
//! - [`RiverClient`] binds a router to an engine
//!
//! # Example
//!
//! ```no_run
//! use river_sdk::{
//!     AgentChunk, ChunkSink, ConversationFold, RequestContext, RiverClient, RiverConfig,
//!     StreamDefinition, StreamRouter,
//! };
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Deserialize)]
//! struct Question {
//!     question: String,
//! }
//!
//! # async fn demo() -> river_sdk::RiverResult<()> {
//! let router = StreamRouter::new().route(
//!     "askQuestion",
//!     StreamDefinition::sink(|input: Question, _ctx, sink: ChunkSink<AgentChunk>| async move {
//!         sink.append_chunk(&AgentChunk::text_start("t1")).await?;
//!         sink.append_chunk(&AgentChunk::text_delta("t1", input.question)).await
//!     }),
//! );
//! let client = RiverClient::from_config(&RiverConfig::default(), router).await?;
//!
//! let mut fold = ConversationFold::with_prompt("hello");
//! client
//!     .start_with_callbacks(
//!         "askQuestion",
//!         json!({"question": "hello"}),
//!         RequestContext::new(),
//!         &mut fold,
//!     )
//!     .await?;
//! println!("{}", fold.assistant_text());
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod client;
pub mod fold;
pub mod protocol;
pub mod router;

pub use callbacks::{CallbackSet, StreamCallbacks, StreamOutcome, drive, drive_until};
pub use client::RiverClient;
pub use fold::{ConversationEntry, ConversationFold, ToolCall};
pub use protocol::{AgentChunk, agent_codecs};
pub use router::{StreamDefinition, StreamRouter};

// Re-export commonly used types from core
pub use river_core::{
    ChunkSink, DeliveredChunk, DeliveryEvent, EndFrame, EndReason, ErrorClassification,
    FatalErrorFrame, ProducerContext, ProducerError, RequestContext, ResumptionToken, RiverConfig,
    RiverError, RiverResult, SessionId, StreamEngine, StreamInfo, Subscription,
};
