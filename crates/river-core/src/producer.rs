//! Producer capability
//!
//! A producer turns a start input into a lazy sequence of emissions. The
//! engine pulls from it one item at a time and persists each item before
//! pulling the next, so a producer never runs ahead of the log.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::codec::{ChunkCodec, CodecError, JsonCodec, Payload};
use crate::error::RiverError;
use crate::types::SessionId;

/// One item yielded by a producer
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// Application chunk, persisted as a `data` record
    Chunk(Payload),
    /// Out-of-band notice, persisted as an `info` record
    Info(Payload),
}

/// Producer failures. Any of these fails the session.
#[derive(Debug, Error, Clone)]
pub enum ProducerError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ProducerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<ProducerError> for RiverError {
    fn from(error: ProducerError) -> Self {
        match error {
            ProducerError::InvalidInput(message) => RiverError::InvalidInput(message),
            other => RiverError::producer(other.to_string()),
        }
    }
}

pub type EmissionStream = BoxStream<'static, Result<Emission, ProducerError>>;

/// What a producer knows about the run it feeds
#[derive(Debug, Clone)]
pub struct ProducerContext {
    pub session_id: SessionId,
    /// Router key the run was started under
    pub stream: String,
    cancel: CancellationToken,
}

impl ProducerContext {
    pub fn new(session_id: SessionId, stream: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            session_id,
            stream: stream.into(),
            cancel,
        }
    }

    /// Set once the run is aborted. Long-running producers should check it
    /// between units of work.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Source of chunks for one session
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, input: Value, ctx: ProducerContext) -> Result<EmissionStream, ProducerError>;
}

/// Producer built from a closure returning a stream
pub struct FnProducer<F> {
    f: F,
}

impl<F, S> FnProducer<F>
where
    F: Fn(Value, ProducerContext) -> S + Send + Sync,
    S: Stream<Item = Result<Emission, ProducerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, S> Producer for FnProducer<F>
where
    F: Fn(Value, ProducerContext) -> S + Send + Sync,
    S: Stream<Item = Result<Emission, ProducerError>> + Send + 'static,
{
    async fn produce(&self, input: Value, ctx: ProducerContext) -> Result<EmissionStream, ProducerError> {
        Ok((self.f)(input, ctx).boxed())
    }
}

/// Handle an imperative producer writes chunks into.
///
/// The channel behind it is bounded, so `append_chunk` waits while the
/// engine is still persisting earlier chunks.
pub struct ChunkSink<T> {
    tx: mpsc::Sender<Result<Emission, ProducerError>>,
    codec: JsonCodec<T>,
}

impl<T> Clone for ChunkSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<T> fmt::Debug for ChunkSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T> ChunkSink<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    async fn send(&self, item: Result<Emission, ProducerError>) -> Result<(), ProducerError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| ProducerError::failed("stream is closed"))
    }

    /// Append one typed chunk
    pub async fn append_chunk(&self, chunk: &T) -> Result<(), ProducerError> {
        let payload = self.codec.encode(chunk)?;
        self.send(Ok(Emission::Chunk(payload))).await
    }

    /// Append an already encoded payload
    pub async fn append_payload(&self, payload: Payload) -> Result<(), ProducerError> {
        self.send(Ok(Emission::Chunk(payload))).await
    }

    /// Emit an out-of-band notice
    pub async fn send_info<I: Serialize>(&self, tag: &str, info: &I) -> Result<(), ProducerError> {
        let payload = Payload::json(tag, info)?;
        self.send(Ok(Emission::Info(payload))).await
    }

    /// Fail the run. Nothing sent afterwards is persisted.
    pub async fn fail(&self, message: impl Into<String>) -> Result<(), ProducerError> {
        self.send(Err(ProducerError::failed(message))).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Producer driven by an async function that writes into a [`ChunkSink`].
///
/// The function runs on its own task; the run completes when it returns
/// `Ok(())` and fails when it returns an error.
pub struct SinkProducer<T, F> {
    f: Arc<F>,
    capacity: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F, Fut> SinkProducer<T, F>
where
    T: Serialize + serde::de::DeserializeOwned + Send + 'static,
    F: Fn(Value, ProducerContext, ChunkSink<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProducerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            capacity: 16,
            _marker: PhantomData,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl<T, F, Fut> Producer for SinkProducer<T, F>
where
    T: Serialize + serde::de::DeserializeOwned + Send + 'static,
    F: Fn(Value, ProducerContext, ChunkSink<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProducerError>> + Send + 'static,
{
    async fn produce(&self, input: Value, ctx: ProducerContext) -> Result<EmissionStream, ProducerError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let sink = ChunkSink {
            tx: tx.clone(),
            codec: JsonCodec::new(),
        };
        let f = self.f.clone();

        tokio::spawn(async move {
            if let Err(e) = f(input, ctx, sink).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
        .boxed())
    }
}

/// Producer that replays a fixed list of emissions. Handy for tests and demos.
pub fn from_emissions(emissions: Vec<Result<Emission, ProducerError>>) -> impl Producer {
    FnProducer::new(move |_input: Value, _ctx: ProducerContext| {
        stream::iter(emissions.clone())
    })
}
