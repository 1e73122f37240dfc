//! Callback adapters over a delivery-event sequence

use async_trait::async_trait;
use futures::StreamExt;
use river_core::{
    DeliveredChunk, DeliveryEvent, EndReason, FatalErrorFrame, ResumptionToken, RiverError,
    SessionId, StreamInfo, Subscription,
};
use std::future::{Future, pending};
use tracing::debug;

/// How a driven subscription ended
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed,
    /// The run was aborted server side
    Aborted { detail: Option<String> },
    Failed(FatalErrorFrame),
    /// The consumer stopped reading first. The run keeps going and can be
    /// resumed with the token when the session is resumable.
    Detached {
        resumption_token: Option<ResumptionToken>,
    },
}

impl StreamOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StreamOutcome::Completed)
    }
}

/// Stream event callbacks. Every method defaults to a no-op.
#[async_trait]
pub trait StreamCallbacks: Send {
    /// Called once the subscription is open, before any event
    async fn on_start(&mut self, session_id: &SessionId) {
        let _ = session_id;
    }

    async fn on_info(&mut self, info: &StreamInfo) {
        let _ = info;
    }

    async fn on_chunk(&mut self, chunk: &DeliveredChunk) {
        let _ = chunk;
    }

    /// The session failed; no more events follow
    async fn on_fatal_error(&mut self, frame: &FatalErrorFrame) {
        let _ = frame;
    }

    /// Start or resume was rejected, or the sequence ended without a terminal
    /// event
    async fn on_error(&mut self, error: &RiverError) {
        let _ = error;
    }

    async fn on_success(&mut self) {}

    /// The run was aborted server side or the consumer detached
    async fn on_abort(&mut self) {}
}

type Handler<T> = Box<dyn FnMut(&T) + Send>;

/// Closure based [`StreamCallbacks`]
///
/// ```no_run
/// use river_sdk::CallbackSet;
///
/// let mut text = String::new();
/// let callbacks = CallbackSet::new()
///     .on_chunk(move |chunk| text.push_str(&chunk.payload.body))
///     .on_success(|| println!("done"));
/// ```
#[derive(Default)]
pub struct CallbackSet {
    start: Option<Handler<SessionId>>,
    info: Option<Handler<StreamInfo>>,
    chunk: Option<Handler<DeliveredChunk>>,
    fatal_error: Option<Handler<FatalErrorFrame>>,
    error: Option<Handler<RiverError>>,
    success: Option<Box<dyn FnMut() + Send>>,
    abort: Option<Box<dyn FnMut() + Send>>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl FnMut(&SessionId) + Send + 'static) -> Self {
        self.start = Some(Box::new(f));
        self
    }

    pub fn on_info(mut self, f: impl FnMut(&StreamInfo) + Send + 'static) -> Self {
        self.info = Some(Box::new(f));
        self
    }

    pub fn on_chunk(mut self, f: impl FnMut(&DeliveredChunk) + Send + 'static) -> Self {
        self.chunk = Some(Box::new(f));
        self
    }

    pub fn on_fatal_error(mut self, f: impl FnMut(&FatalErrorFrame) + Send + 'static) -> Self {
        self.fatal_error = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&RiverError) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.success = Some(Box::new(f));
        self
    }

    pub fn on_abort(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.abort = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl StreamCallbacks for CallbackSet {
    async fn on_start(&mut self, session_id: &SessionId) {
        if let Some(f) = self.start.as_mut() {
            f(session_id);
        }
    }

    async fn on_info(&mut self, info: &StreamInfo) {
        if let Some(f) = self.info.as_mut() {
            f(info);
        }
    }

    async fn on_chunk(&mut self, chunk: &DeliveredChunk) {
        if let Some(f) = self.chunk.as_mut() {
            f(chunk);
        }
    }

    async fn on_fatal_error(&mut self, frame: &FatalErrorFrame) {
        if let Some(f) = self.fatal_error.as_mut() {
            f(frame);
        }
    }

    async fn on_error(&mut self, error: &RiverError) {
        if let Some(f) = self.error.as_mut() {
            f(error);
        }
    }

    async fn on_success(&mut self) {
        if let Some(f) = self.success.as_mut() {
            f();
        }
    }

    async fn on_abort(&mut self) {
        if let Some(f) = self.abort.as_mut() {
            f();
        }
    }
}

/// Feed every event of `subscription` to `callbacks` until a terminal event
pub async fn drive<C>(subscription: Subscription, callbacks: &mut C) -> StreamOutcome
where
    C: StreamCallbacks + ?Sized,
{
    drive_until(subscription, callbacks, pending()).await
}

/// Like [`drive`], but detaches as soon as `abort` resolves. Detaching only
/// drops this subscription; the run itself continues.
pub async fn drive_until<C, A>(
    mut subscription: Subscription,
    callbacks: &mut C,
    abort: A,
) -> StreamOutcome
where
    C: StreamCallbacks + ?Sized,
    A: Future<Output = ()> + Send,
{
    let session_id = subscription.session_id().clone();
    callbacks.on_start(&session_id).await;
    tokio::pin!(abort);

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut abort => {
                debug!(session_id = %session_id, "Consumer detached");
                subscription.abort();
                callbacks.on_abort().await;
                return StreamOutcome::Detached {
                    resumption_token: subscription.resumption_token(),
                };
            }
            event = subscription.next() => event,
        };

        let Some(event) = event else {
            let error = RiverError::internal("subscription ended without a terminal event");
            callbacks.on_error(&error).await;
            return StreamOutcome::Detached {
                resumption_token: subscription.resumption_token(),
            };
        };

        match event {
            DeliveryEvent::Info(info) => callbacks.on_info(&info).await,
            DeliveryEvent::Chunk(chunk) => callbacks.on_chunk(&chunk).await,
            DeliveryEvent::FatalError(frame) => {
                callbacks.on_fatal_error(&frame).await;
                return StreamOutcome::Failed(frame);
            }
            DeliveryEvent::End(end) => {
                return match end.reason {
                    EndReason::Completed => {
                        callbacks.on_success().await;
                        StreamOutcome::Completed
                    }
                    EndReason::Aborted => {
                        callbacks.on_abort().await;
                        StreamOutcome::Aborted { detail: end.detail }
                    }
                };
            }
        }
    }
}
