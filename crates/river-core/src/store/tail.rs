//! Live tailing over a session log

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::trace;

use super::LogStore;
use crate::error::{RiverError, RiverResult};
use crate::types::{ChunkRecord, Sequence, SessionId};

/// Item produced by a live tail
#[derive(Debug, Clone, PartialEq)]
pub enum TailItem {
    Record(ChunkRecord),
    /// A poll interval passed with nothing new
    Idle,
}

struct TailState {
    store: LogStore,
    id: SessionId,
    next: Sequence,
    buffer: VecDeque<ChunkRecord>,
    length_rx: Option<watch::Receiver<u64>>,
    finished: bool,
}

impl TailState {
    async fn step(&mut self) -> Option<RiverResult<TailItem>> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(record) = self.buffer.pop_front() {
                if record.sequence != self.next {
                    self.finished = true;
                    return Some(Err(RiverError::internal(format!(
                        "log for {} skipped from sequence {} to {}",
                        self.id, self.next, record.sequence
                    ))));
                }
                self.next += 1;
                if record.kind.is_terminal() {
                    self.finished = true;
                }
                return Some(Ok(TailItem::Record(record)));
            }

            // Subscribe before reading so an append landing between the read
            // and the wait still wakes us.
            if self.length_rx.is_none() {
                match self.store.backend().watch(&self.id).await {
                    Ok(rx) => self.length_rx = Some(rx),
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e.into()));
                    }
                }
            }
            if let Some(rx) = self.length_rx.as_mut() {
                rx.borrow_and_update();
            }

            let batch = self.store.config().read_batch_size.max(1);
            match self.store.read_page(&self.id, self.next, batch).await {
                Ok(page) if !page.is_empty() => {
                    self.buffer.extend(page);
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }

            let poll = self.store.config().poll_interval;
            let woke = match self.length_rx.as_mut() {
                Some(rx) => tokio::select! {
                    changed = rx.changed() => Some(changed.is_ok()),
                    _ = sleep(poll) => None,
                },
                None => {
                    sleep(poll).await;
                    None
                }
            };

            match woke {
                Some(true) => continue,
                Some(false) => {
                    // Sender gone: the session was deleted or the backend
                    // closed. Fall back to polling.
                    self.length_rx = None;
                    sleep(poll).await;
                }
                None => {}
            }
            trace!(session_id = %self.id, next = self.next, "Tail idle");
            return Some(Ok(TailItem::Idle));
        }
    }
}

pub(super) fn follow(
    store: LogStore,
    id: SessionId,
    from: Sequence,
) -> BoxStream<'static, RiverResult<TailItem>> {
    let state = TailState {
        store,
        id,
        next: from,
        buffer: VecDeque::new(),
        length_rx: None,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        let item = state.step().await?;
        Some((item, state))
    })
    .boxed()
}
