//! Subscription multiplexer
//!
//! A subscription replays a session log from an offset and then tails live
//! appends through the same cursor, so the switch from history to live is
//! invisible to the consumer. It always ends with exactly one terminal event.
//! When the log will never get one (the runner died, the session vanished)
//! the subscription synthesizes it.

mod events;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use events::{DeliveredChunk, DeliveryEvent, StreamInfo};

use crate::error::{ErrorClassification, RiverError, RiverResult};
use crate::frames::{EndFrame, FatalErrorFrame};
use crate::registry::SessionRegistry;
use crate::runner::{Presence, PresenceGuard};
use crate::store::{LogStore, TailItem};
use crate::token::ResumptionToken;
use crate::types::{ChunkRecord, FrameKind, Sequence, SessionId, SessionMeta, SessionStatus};

/// How a subscription is opened
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Lead with an `info` event announcing the resumption token
    pub announce: bool,
    /// Count this subscription as an attached consumer of the run
    pub presence: Option<Presence>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announce(mut self, announce: bool) -> Self {
        self.announce = announce;
        self
    }

    pub fn with_presence(mut self, presence: Presence) -> Self {
        self.presence = Some(presence);
        self
    }
}

/// Opens subscriptions over the shared log store
#[derive(Clone)]
pub struct SubscriptionMultiplexer {
    store: LogStore,
    registry: SessionRegistry,
}

impl SubscriptionMultiplexer {
    pub fn new(store: LogStore, registry: SessionRegistry) -> Self {
        Self { store, registry }
    }

    /// Open a subscription at `offset`, the next sequence the consumer has
    /// not seen. Offsets past the end of the log are rejected as malformed.
    pub async fn open(
        &self,
        session_id: &SessionId,
        offset: Sequence,
        options: OpenOptions,
    ) -> RiverResult<Subscription> {
        let meta = self
            .store
            .session(session_id)
            .await?
            .ok_or_else(|| RiverError::terminated(session_id, "session is unknown or past its retention window"))?;
        let length = self.store.length(session_id).await?;
        if offset > length {
            return Err(RiverError::malformed_token(format!(
                "offset {} is past the end of the log ({} records)",
                offset, length
            )));
        }

        let cursor = Arc::new(AtomicU64::new(offset));
        let cancel = CancellationToken::new();
        let announce = options.announce.then(|| StreamInfo {
            session_id: session_id.clone(),
            resumption_token: meta
                .resumable
                .then(|| ResumptionToken::new(session_id.clone(), offset)),
            notice: None,
        });

        debug!(session_id = %session_id, offset, length, "Subscription opened");

        let state = DeliveryState {
            store: self.store.clone(),
            registry: self.registry.clone(),
            tail: self.store.follow(session_id, offset),
            session_id: session_id.clone(),
            resumable: meta.resumable,
            cursor: cursor.clone(),
            cancel: cancel.clone(),
            announce,
            done: false,
        };
        let events = stream::unfold(state, |mut state| async move {
            let event = state.step().await?;
            Some((event, state))
        })
        .boxed();

        Ok(Subscription {
            session_id: session_id.clone(),
            resumable: meta.resumable,
            cursor,
            cancel,
            events,
            presence: options.presence.as_ref().map(Presence::attach),
        })
    }
}

/// One consumer's view of a session.
///
/// Dropping or [aborting](Self::abort) a subscription detaches only this
/// consumer; the run keeps going.
pub struct Subscription {
    session_id: SessionId,
    resumable: bool,
    cursor: Arc<AtomicU64>,
    cancel: CancellationToken,
    events: BoxStream<'static, DeliveryEvent>,
    presence: Option<PresenceGuard>,
}

impl Subscription {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Token resuming right after the last delivered record
    pub fn resumption_token(&self) -> Option<ResumptionToken> {
        self.resumable.then(|| {
            ResumptionToken::new(self.session_id.clone(), self.cursor.load(Ordering::Acquire))
        })
    }

    /// Detach. The sequence ends at its next poll without a terminal event.
    pub fn abort(&mut self) {
        self.cancel.cancel();
        self.presence.take();
    }
}

impl Stream for Subscription {
    type Item = DeliveryEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.events.poll_next_unpin(cx);
        if let Poll::Ready(None) = polled {
            this.presence.take();
        }
        polled
    }
}

struct DeliveryState {
    store: LogStore,
    registry: SessionRegistry,
    tail: BoxStream<'static, RiverResult<TailItem>>,
    session_id: SessionId,
    resumable: bool,
    cursor: Arc<AtomicU64>,
    cancel: CancellationToken,
    announce: Option<StreamInfo>,
    done: bool,
}

impl DeliveryState {
    async fn step(&mut self) -> Option<DeliveryEvent> {
        if self.done {
            return None;
        }
        if let Some(info) = self.announce.take() {
            return Some(DeliveryEvent::Info(info));
        }

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                item = self.tail.next() => Some(item),
            };

            let event = match item {
                None => {
                    debug!(session_id = %self.session_id, "Subscription detached");
                    self.done = true;
                    return None;
                }
                Some(Some(Ok(TailItem::Record(record)))) => Some(self.deliver(record)),
                Some(Some(Ok(TailItem::Idle))) => self.check_liveness().await,
                Some(Some(Err(e))) => {
                    warn!(session_id = %self.session_id, error = %e, "Tail failed, closing subscription");
                    Some(fatal_from_error(&e))
                }
                // The tail only ends after a terminal record or an error.
                Some(None) => {
                    self.done = true;
                    return None;
                }
            };

            if let Some(event) = event {
                if event.is_terminal() {
                    self.done = true;
                }
                return Some(event);
            }
        }
    }

    fn token_after(&self, sequence: Sequence) -> Option<ResumptionToken> {
        self.resumable
            .then(|| ResumptionToken::new(self.session_id.clone(), sequence + 1))
    }

    fn deliver(&self, record: ChunkRecord) -> DeliveryEvent {
        self.cursor.store(record.sequence + 1, Ordering::Release);
        match record.kind {
            FrameKind::Data => DeliveryEvent::Chunk(DeliveredChunk {
                sequence: record.sequence,
                resumption_token: self.token_after(record.sequence),
                payload: record.payload,
            }),
            FrameKind::Info => DeliveryEvent::Info(StreamInfo {
                session_id: self.session_id.clone(),
                resumption_token: self.token_after(record.sequence),
                notice: Some(record.payload),
            }),
            FrameKind::FatalError => DeliveryEvent::FatalError(
                FatalErrorFrame::from_payload(&record.payload).unwrap_or_else(|e| {
                    warn!(session_id = %self.session_id, error = %e, "Unreadable fatal-error record");
                    FatalErrorFrame::new(ErrorClassification::ProducerFailure, "session failed")
                }),
            ),
            FrameKind::End => DeliveryEvent::End(
                EndFrame::from_payload(&record.payload).unwrap_or_else(|e| {
                    warn!(session_id = %self.session_id, error = %e, "Unreadable end record");
                    EndFrame::completed()
                }),
            ),
        }
    }

    /// Called when the tail has been idle for a poll interval. Returns a
    /// synthesized terminal event when the log will never be closed.
    async fn check_liveness(&mut self) -> Option<DeliveryEvent> {
        let meta = match self.store.session(&self.session_id).await {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                return Some(fatal_from_error(&RiverError::terminated(
                    &self.session_id,
                    "session was deleted",
                )));
            }
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "Liveness check failed");
                return None;
            }
        };

        if meta.status.is_terminal() {
            if self.has_unread().await {
                return None;
            }
            warn!(
                session_id = %self.session_id,
                status = %meta.status,
                "Session finished without a terminal record"
            );
            return Some(terminal_from_status(&meta));
        }

        if self.within_first_lease(&meta) {
            return None;
        }
        let active = self.registry.is_active(&self.session_id).await;
        match active {
            Ok(true) => None,
            Ok(false) if self.has_unread().await => None,
            Ok(false) => {
                warn!(session_id = %self.session_id, "Session runner is gone, reporting abandonment");
                Some(fatal_from_error(&RiverError::SessionAbandoned {
                    session_id: self.session_id.to_string(),
                }))
            }
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "Lease check failed");
                None
            }
        }
    }

    fn within_first_lease(&self, meta: &SessionMeta) -> bool {
        let ttl = chrono::Duration::from_std(self.registry.config().lease_ttl)
            .unwrap_or(chrono::Duration::MAX);
        meta.created_at
            .checked_add_signed(ttl)
            .is_some_and(|deadline| deadline > chrono::Utc::now())
            && meta.last_append_at.is_none()
    }

    /// Records landed after the tail last looked. The runner appends its
    /// terminal record before releasing the lease, so this closes the race
    /// between the final append and the lease check.
    async fn has_unread(&mut self) -> bool {
        let cursor = self.cursor.load(Ordering::Acquire);
        self.store
            .length(&self.session_id)
            .await
            .map(|length| length > cursor)
            .unwrap_or(true)
    }
}

fn fatal_from_error(error: &RiverError) -> DeliveryEvent {
    let classification = error
        .classification()
        .unwrap_or(ErrorClassification::StoreUnavailable);
    DeliveryEvent::FatalError(FatalErrorFrame::new(classification, error.to_string()))
}

fn terminal_from_status(meta: &SessionMeta) -> DeliveryEvent {
    match meta.status {
        SessionStatus::Completed | SessionStatus::Running => DeliveryEvent::End(EndFrame::completed()),
        SessionStatus::Aborted => DeliveryEvent::End(EndFrame::aborted("session aborted")),
        SessionStatus::Failed => DeliveryEvent::FatalError(FatalErrorFrame::new(
            meta.terminal.unwrap_or(ErrorClassification::StoreUnavailable),
            "session failed before its terminal record was written",
        )),
    }
}
