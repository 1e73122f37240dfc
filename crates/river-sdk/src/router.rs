//! Named stream routes
//!
//! A [`StreamRouter`] maps stream names to producers. Each route validates
//! its JSON input against a typed schema before anything is persisted, and
//! declares whether sessions started through it can be resumed.

use river_core::producer::{ChunkSink, Producer, ProducerContext, ProducerError, SinkProducer};
use river_core::{RequestContext, RiverError, RiverResult, StartRequest};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type InputCheck = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// One routable stream: a producer plus its input check
#[derive(Clone)]
pub struct StreamDefinition {
    producer: Arc<dyn Producer>,
    check: InputCheck,
    resumable: bool,
}

impl StreamDefinition {
    /// Build a route from an async function that receives its decoded input
    /// and writes typed chunks into a sink.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use river_sdk::{AgentChunk, ChunkSink, StreamDefinition};
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct Question {
    ///     question: String,
    /// }
    ///
    /// let route = StreamDefinition::sink(|input: Question, _ctx, sink: ChunkSink<AgentChunk>| async move {
    ///     sink.append_chunk(&AgentChunk::text_start("t1")).await?;
    ///     sink.append_chunk(&AgentChunk::text_delta("t1", input.question)).await?;
    ///     sink.append_chunk(&AgentChunk::text_end("t1")).await
    /// });
    /// ```
    pub fn sink<I, T, F, Fut>(f: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(I, ProducerContext, ChunkSink<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProducerError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let producer = SinkProducer::new(move |input: Value, ctx: ProducerContext, sink: ChunkSink<T>| {
            let f = f.clone();
            async move {
                let input = decode_input::<I>(input)?;
                f(input, ctx, sink).await
            }
        });

        Self {
            producer: Arc::new(producer),
            check: typed_check::<I>(),
            resumable: true,
        }
    }

    /// Wrap an existing producer. Its input is validated as `I`.
    pub fn from_producer<I>(producer: Arc<dyn Producer>) -> Self
    where
        I: DeserializeOwned + 'static,
    {
        Self {
            producer,
            check: typed_check::<I>(),
            resumable: true,
        }
    }

    pub fn resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable
    }

    pub fn producer(&self) -> Arc<dyn Producer> {
        self.producer.clone()
    }

    /// Check `input` against the route's input type
    pub fn validate(&self, input: &Value) -> RiverResult<()> {
        (self.check)(input).map_err(RiverError::InvalidInput)
    }
}

impl fmt::Debug for StreamDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDefinition")
            .field("resumable", &self.resumable)
            .finish_non_exhaustive()
    }
}

fn decode_input<I: DeserializeOwned>(input: Value) -> Result<I, ProducerError> {
    serde_json::from_value(input).map_err(|e| ProducerError::InvalidInput(e.to_string()))
}

fn typed_check<I: DeserializeOwned + 'static>() -> InputCheck {
    Arc::new(|value: &Value| {
        serde_json::from_value::<I>(value.clone())
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
}

/// Stream name to definition table
#[derive(Debug, Clone, Default)]
pub struct StreamRouter {
    routes: BTreeMap<String, StreamDefinition>,
}

impl StreamRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. A later route with the same name replaces the earlier one.
    pub fn route(mut self, name: impl Into<String>, definition: StreamDefinition) -> Self {
        self.routes.insert(name.into(), definition);
        self
    }

    pub fn get(&self, name: &str) -> RiverResult<&StreamDefinition> {
        self.routes
            .get(name)
            .ok_or_else(|| RiverError::UnknownStream(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve a route and validate the input, producing an engine request.
    ///
    /// Fails with `UnknownStream` or `InvalidInput` before anything reaches
    /// the store.
    pub fn start_request(
        &self,
        name: &str,
        input: Value,
        context: RequestContext,
    ) -> RiverResult<StartRequest> {
        let definition = self.get(name)?;
        definition.validate(&input)?;
        tracing::debug!(stream = name, resumable = definition.resumable, "Routing start request");

        Ok(StartRequest::new(name, definition.producer())
            .with_input(input)
            .with_context(context)
            .with_resumable(definition.resumable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AgentChunk;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Message {
        message: String,
    }

    fn echo() -> StreamDefinition {
        StreamDefinition::sink(|input: Message, _ctx, sink: ChunkSink<AgentChunk>| async move {
            sink.append_chunk(&AgentChunk::text_delta("t1", input.message))
                .await
        })
    }

    #[test]
    fn test_start_request_carries_route_settings() {
        let router = StreamRouter::new().route("echo", echo().resumable(false));
        let request = router
            .start_request("echo", json!({"message": "hi"}), RequestContext::new())
            .unwrap();
        assert_eq!(request.stream, "echo");
        assert!(!request.resumable);
        assert_eq!(request.input, json!({"message": "hi"}));
    }

    #[test]
    fn test_invalid_input_is_rejected_before_start() {
        let router = StreamRouter::new().route("echo", echo());
        let Err(err) = router.start_request("echo", json!({"msg": 1}), RequestContext::new())
        else {
            panic!("input without a message should be rejected");
        };
        assert!(matches!(err, RiverError::InvalidInput(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_unknown_stream() {
        let router = StreamRouter::new().route("echo", echo());
        assert!(matches!(
            router.start_request("nope", Value::Null, RequestContext::new()),
            Err(RiverError::UnknownStream(_))
        ));
        assert_eq!(router.names().collect::<Vec<_>>(), vec!["echo"]);
    }
}
