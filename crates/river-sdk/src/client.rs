//! SDK client: a router bound to an engine

use river_core::{
    RequestContext, RiverConfig, RiverResult, SessionId, StreamEngine, Subscription,
};
use serde_json::Value;
use std::future::Future;
use tracing::{info, instrument};

use crate::callbacks::{StreamCallbacks, StreamOutcome, drive_until};
use crate::router::StreamRouter;

/// Starts routed streams on an engine and reattaches to them
///
/// # Example
///
/// ```no_run
/// use river_sdk::{RequestContext, RiverClient, RiverConfig, StreamRouter};
/// use serde_json::json;
///
/// # async fn demo(router: StreamRouter) -> river_sdk::RiverResult<()> {
/// let client = RiverClient::from_config(&RiverConfig::default(), router).await?;
/// let subscription = client
///     .start("askQuestion", json!({"question": "hi"}), RequestContext::new())
///     .await?;
/// let token = subscription.resumption_token();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RiverClient {
    engine: StreamEngine,
    router: StreamRouter,
}

impl RiverClient {
    pub fn new(engine: StreamEngine, router: StreamRouter) -> Self {
        Self { engine, router }
    }

    /// Build the engine from configuration
    pub async fn from_config(config: &RiverConfig, router: StreamRouter) -> RiverResult<Self> {
        let engine = StreamEngine::from_config(config).await?;
        Ok(Self::new(engine, router))
    }

    pub fn engine(&self) -> &StreamEngine {
        &self.engine
    }

    pub fn router(&self) -> &StreamRouter {
        &self.router
    }

    /// Start the stream routed under `name`
    #[instrument(skip(self, input, context))]
    pub async fn start(
        &self,
        name: &str,
        input: Value,
        context: RequestContext,
    ) -> RiverResult<Subscription> {
        let request = self.router.start_request(name, input, context)?;
        let subscription = self.engine.start(request).await?;
        info!(session_id = %subscription.session_id(), "Stream started");
        Ok(subscription)
    }

    pub async fn resume(&self, token: &str) -> RiverResult<Subscription> {
        self.engine.resume(token).await
    }

    pub fn abort(&self, session_id: &SessionId) -> bool {
        self.engine.abort(session_id)
    }

    /// Start a stream and feed it to `callbacks`. A rejected start is
    /// reported through `on_error` and returned.
    pub async fn start_with_callbacks<C>(
        &self,
        name: &str,
        input: Value,
        context: RequestContext,
        callbacks: &mut C,
    ) -> RiverResult<StreamOutcome>
    where
        C: StreamCallbacks + ?Sized,
    {
        self.start_with_callbacks_until(name, input, context, callbacks, std::future::pending())
            .await
    }

    /// [`start_with_callbacks`](Self::start_with_callbacks) that detaches
    /// when `abort` resolves
    pub async fn start_with_callbacks_until<C, A>(
        &self,
        name: &str,
        input: Value,
        context: RequestContext,
        callbacks: &mut C,
        abort: A,
    ) -> RiverResult<StreamOutcome>
    where
        C: StreamCallbacks + ?Sized,
        A: Future<Output = ()> + Send,
    {
        match self.start(name, input, context).await {
            Ok(subscription) => Ok(drive_until(subscription, callbacks, abort).await),
            Err(e) => {
                callbacks.on_error(&e).await;
                Err(e)
            }
        }
    }

    /// Resume from a token and feed the rest of the stream to `callbacks`
    pub async fn resume_with_callbacks<C>(
        &self,
        token: &str,
        callbacks: &mut C,
    ) -> RiverResult<StreamOutcome>
    where
        C: StreamCallbacks + ?Sized,
    {
        match self.resume(token).await {
            Ok(subscription) => {
                Ok(drive_until(subscription, callbacks, std::future::pending()).await)
            }
            Err(e) => {
                callbacks.on_error(&e).await;
                Err(e)
            }
        }
    }
}
