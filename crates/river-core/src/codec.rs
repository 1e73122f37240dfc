//! Chunk codec
//!
//! Application chunks are stored as a tagged union: a short `tag` naming the
//! chunk variant plus an opaque, storage-safe `body`. The engine never looks
//! inside the body. Consumers decode with a [`CodecRegistry`], which hands back
//! payloads with unregistered tags verbatim instead of failing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use thiserror::Error;

/// Tag used when a chunk does not name its own variant
pub const DEFAULT_TAG: &str = "chunk";

/// Codec failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode chunk: {0}")]
    Encode(String),

    #[error("Failed to decode chunk tagged {tag:?}: {message}")]
    Decode { tag: String, message: String },
}

/// Serialized chunk as it is written to the log
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload {
    pub tag: String,
    /// JSON text of the chunk
    pub body: String,
}

impl Payload {
    pub fn new(tag: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            body: body.into(),
        }
    }

    /// Serialize any value as a payload with an explicit tag
    pub fn json<T: Serialize + ?Sized>(tag: impl Into<String>, value: &T) -> Result<Self, CodecError> {
        let body = serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Self::new(tag, body))
    }

    /// Deserialize the body into `T`
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_str(&self.body).map_err(|e| CodecError::Decode {
            tag: self.tag.clone(),
            message: e.to_string(),
        })
    }
}

/// Encodes typed chunks to payloads and back
pub trait ChunkCodec: Send + Sync {
    type Chunk;

    fn encode(&self, chunk: &Self::Chunk) -> Result<Payload, CodecError>;

    fn decode(&self, payload: &Payload) -> Result<Self::Chunk, CodecError>;
}

/// JSON codec for serde types.
///
/// The tag is taken from the chunk's `"type"` field when it serializes to an
/// object that has one (the common shape for streamed model events), and
/// falls back to a fixed default otherwise.
#[derive(Debug)]
pub struct JsonCodec<T> {
    default_tag: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self::with_default_tag(DEFAULT_TAG)
    }

    pub fn with_default_tag(tag: impl Into<String>) -> Self {
        Self {
            default_tag: tag.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::with_default_tag(self.default_tag.clone())
    }
}

impl<T> ChunkCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    type Chunk = T;

    fn encode(&self, chunk: &T) -> Result<Payload, CodecError> {
        let value = serde_json::to_value(chunk).map_err(|e| CodecError::Encode(e.to_string()))?;
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or(&self.default_tag)
            .to_string();
        Ok(Payload::new(tag, value.to_string()))
    }

    fn decode(&self, payload: &Payload) -> Result<T, CodecError> {
        payload.parse()
    }
}

/// Result of decoding through a registry
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// A registered decoder understood the payload
    Known(T),
    /// No decoder is registered for this tag; the payload is passed through
    Opaque(Payload),
}

type Decoder<T> = Box<dyn Fn(&Payload) -> Result<T, CodecError> + Send + Sync>;

/// Per-tag decoder table
pub struct CodecRegistry<T> {
    decoders: HashMap<String, Decoder<T>>,
}

impl<T> CodecRegistry<T> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a decoder function for a tag
    pub fn register<F>(mut self, tag: impl Into<String>, decoder: F) -> Self
    where
        F: Fn(&Payload) -> Result<T, CodecError> + Send + Sync + 'static,
    {
        self.decoders.insert(tag.into(), Box::new(decoder));
        self
    }

    /// Register a serde decoder for a tag
    pub fn register_json(self, tag: impl Into<String>) -> Self
    where
        T: DeserializeOwned + 'static,
    {
        self.register(tag, |payload: &Payload| payload.parse::<T>())
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    pub fn decode(&self, payload: &Payload) -> Result<Decoded<T>, CodecError> {
        match self.decoders.get(&payload.tag) {
            Some(decoder) => decoder(payload).map(Decoded::Known),
            None => Ok(Decoded::Opaque(payload.clone())),
        }
    }
}

impl<T> Default for CodecRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
