//! River core: a resumable, persisted, multi-consumer chunk stream engine.
//!
//! A [`StreamEngine`] starts a [`Producer`] on a background runner that
//! appends every chunk to a durable per-session log before pulling the next.
//! Any number of [`Subscription`]s replay that log from an offset and then
//! tail it live; a [`ResumptionToken`] lets a consumer that disconnected pick
//! up exactly where it left off.

pub mod auth;
pub mod backend;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod frames;
pub mod producer;
pub mod recovery;
pub mod registry;
pub mod runner;
pub mod store;
pub mod subscription;
pub mod token;
pub mod types;

pub use auth::{
    AllowAll, Authorization, AuthorizationGate, DenyAll, FnGate, RequestContext,
    SharedSecretGate,
};
pub use backend::{BackendError, BackendKind, FileBackend, LogBackend, MemoryBackend};
pub use codec::{ChunkCodec, CodecError, CodecRegistry, Decoded, JsonCodec, Payload};
pub use config::{LoggingConfig, RiverConfig};
pub use engine::{StartRequest, StreamEngine, SweepOutcome};
pub use error::{ErrorClassification, RiverError, RiverResult};
pub use frames::{EndFrame, EndReason, FatalErrorFrame};
pub use producer::{
    ChunkSink, Emission, EmissionStream, FnProducer, Producer, ProducerContext, ProducerError,
    SinkProducer,
};
pub use registry::{OwnershipGuard, SessionRegistry};
pub use runner::{AbortReason, RunnerState};
pub use store::{LogStore, SessionSummary};
pub use subscription::{DeliveredChunk, DeliveryEvent, StreamInfo, Subscription};
pub use token::ResumptionToken;
pub use types::{ChunkRecord, FrameKind, Sequence, SessionId, SessionMeta, SessionStatus};
