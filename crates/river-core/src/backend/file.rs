//! Filesystem backend
//!
//! One directory per session under the base path:
//!
//! ```text
//! <base>/<session-id>/meta.json   session metadata, replaced atomically
//! <base>/<session-id>/log.jsonl   one ChunkRecord per line, append-only
//! <base>/<session-id>/lease.json  current ownership lease, if any
//! ```
//!
//! Each process keeps a byte-offset index of the log per session, extended
//! from the last indexed offset whenever the file grows, so page reads seek
//! straight to their first record.
//!
//! Change notification only covers appends made through this process; readers
//! in other processes fall back to polling the log length.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use super::r#trait::LogBackend;
use super::types::{BackendError, BackendKind, Lease, LeaseOutcome};
use crate::types::{ChunkRecord, Sequence, SessionId, SessionMeta};

const META_FILE: &str = "meta.json";
const LOG_FILE: &str = "log.jsonl";
const LEASE_FILE: &str = "lease.json";

/// Byte offsets of the complete records in a log file
#[derive(Debug, Clone, Default)]
struct LogIndex {
    /// Start of each record, indexed by sequence
    offsets: Vec<u64>,
    /// End of the last complete record
    bytes: u64,
}

impl LogIndex {
    fn records(&self) -> u64 {
        self.offsets.len() as u64
    }

    /// Index the complete lines of `tail`, which starts at `self.bytes`.
    /// Bytes after the last newline stay unindexed until the line completes.
    fn extend(&mut self, tail: &[u8]) {
        let mut line_start = 0;
        for (pos, byte) in tail.iter().enumerate() {
            if *byte == b'\n' {
                self.offsets.push(self.bytes + line_start as u64);
                line_start = pos + 1;
            }
        }
        self.bytes += line_start as u64;
    }

    /// Byte span holding up to `limit` records starting at `from`
    fn span(&self, from: Sequence, limit: usize) -> Option<(u64, u64)> {
        let first = usize::try_from(from).ok()?;
        let start = *self.offsets.get(first)?;
        let end = first
            .checked_add(limit)
            .and_then(|last| self.offsets.get(last))
            .copied()
            .unwrap_or(self.bytes);
        (end > start).then_some((start, end))
    }
}

struct SessionState {
    /// Serializes appends and lease changes made by this process
    lock: Mutex<LogIndex>,
    length_tx: watch::Sender<u64>,
}

/// Backend storing each session as a directory of JSON files
pub struct FileBackend {
    base_path: PathBuf,
    states: DashMap<SessionId, Arc<SessionState>>,
    closed: AtomicBool,
}

impl FileBackend {
    /// Backend rooted at `~/.river/streams`
    pub fn new() -> Result<Self, BackendError> {
        Ok(Self::with_path(default_base_path()?))
    }

    pub fn with_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            states: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn check_open(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Unavailable("file backend is closed".to_string()));
        }
        Ok(())
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.base_path.join(id.as_str())
    }

    fn meta_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(META_FILE)
    }

    fn log_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(LOG_FILE)
    }

    fn lease_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join(LEASE_FILE)
    }

    async fn ensure_session(&self, id: &SessionId) -> Result<(), BackendError> {
        self.check_open()?;
        match fs::metadata(self.session_dir(id)).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(BackendError::Corrupt(format!(
                "{} is not a directory",
                self.session_dir(id).display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackendError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn state(&self, id: &SessionId) -> Result<Arc<SessionState>, BackendError> {
        if let Some(state) = self.states.get(id) {
            return Ok(state.clone());
        }
        self.ensure_session(id).await?;
        let mut index = LogIndex::default();
        self.refresh_index(id, &mut index).await?;
        let state = self
            .states
            .entry(id.clone())
            .or_insert_with(|| {
                let (length_tx, _) = watch::channel(index.records());
                Arc::new(SessionState {
                    lock: Mutex::new(index),
                    length_tx,
                })
            })
            .clone();
        Ok(state)
    }

    /// Bring `index` up to date with the log on disk and return the file size.
    /// Growth is read from the last indexed offset; a log that shrank is
    /// indexed again from the start.
    async fn refresh_index(
        &self,
        id: &SessionId,
        index: &mut LogIndex,
    ) -> Result<u64, BackendError> {
        let path = self.log_path(id);
        let on_disk = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                *index = LogIndex::default();
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        if on_disk == index.bytes {
            return Ok(on_disk);
        }
        if on_disk < index.bytes {
            debug!(session_id = %id, "Log shrank, rebuilding index");
            *index = LogIndex::default();
        }

        let mut file = fs::File::open(&path).await?;
        file.seek(SeekFrom::Start(index.bytes)).await?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail).await?;

        let read_from = index.bytes;
        index.extend(&tail);
        Ok(read_from + tail.len() as u64)
    }

    /// Cut a torn trailing line left by a crash mid-write so the next append
    /// starts on a clean line.
    async fn truncate_torn(
        &self,
        id: &SessionId,
        index: &LogIndex,
        on_disk: u64,
    ) -> Result<(), BackendError> {
        if on_disk <= index.bytes {
            return Ok(());
        }
        warn!(
            session_id = %id,
            torn_bytes = on_disk - index.bytes,
            "Truncating torn record at end of log"
        );
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.log_path(id))
            .await?;
        file.set_len(index.bytes).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn read_lease(&self, id: &SessionId) -> Result<Option<Lease>, BackendError> {
        match fs::read(self.lease_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn log_modified(&self, id: &SessionId) -> Option<DateTime<Utc>> {
        let meta = fs::metadata(self.log_path(id)).await.ok()?;
        if meta.len() == 0 {
            return None;
        }
        meta.modified().ok().map(DateTime::<Utc>::from)
    }
}

fn default_base_path() -> Result<PathBuf, BackendError> {
    Ok(dirs::home_dir()
        .ok_or_else(|| BackendError::Unavailable("home directory is not available".to_string()))?
        .join(".river")
        .join("streams"))
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_data().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl LogBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.check_open()?;
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| BackendError::Unavailable(format!("{}: {}", self.base_path.display(), e)))?;
        Ok(())
    }

    async fn create_session(&self, meta: &SessionMeta) -> Result<(), BackendError> {
        self.check_open()?;
        fs::create_dir_all(&self.base_path).await?;

        let dir = self.session_dir(&meta.id);
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BackendError::AlreadyExists(meta.id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        fs::File::create(self.log_path(&meta.id)).await?;
        write_atomic(&self.meta_path(&meta.id), &serde_json::to_vec_pretty(meta)?).await?;
        debug!(session_id = %meta.id, path = ?dir, "Created session directory");
        Ok(())
    }

    async fn load_session(&self, id: &SessionId) -> Result<Option<SessionMeta>, BackendError> {
        self.check_open()?;
        let bytes = match fs::read(self.meta_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut meta: SessionMeta = serde_json::from_slice(&bytes)?;
        if let Some(modified) = self.log_modified(id).await {
            meta.last_append_at = Some(modified);
        }
        Ok(Some(meta))
    }

    async fn update_session(&self, meta: &SessionMeta) -> Result<(), BackendError> {
        self.ensure_session(&meta.id).await?;
        write_atomic(&self.meta_path(&meta.id), &serde_json::to_vec_pretty(meta)?).await
    }

    async fn append(&self, id: &SessionId, record: &ChunkRecord) -> Result<(), BackendError> {
        let state = self.state(id).await?;
        let mut index = state.lock.lock().await;

        let on_disk = self.refresh_index(id, &mut index).await?;
        if record.sequence != index.records() {
            return Err(BackendError::SequenceConflict {
                session_id: id.to_string(),
                expected: record.sequence,
                actual: index.records(),
            });
        }
        self.truncate_torn(id, &index, on_disk).await?;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.log_path(id))
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;

        let offset = index.bytes;
        index.offsets.push(offset);
        index.bytes += line.len() as u64;
        state.length_tx.send_replace(index.records());
        Ok(())
    }

    async fn read_range(
        &self,
        id: &SessionId,
        from: Sequence,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, BackendError> {
        self.ensure_session(id).await?;
        let state = self.state(id).await?;
        let span = {
            let mut index = state.lock.lock().await;
            self.refresh_index(id, &mut index).await?;
            index.span(from, limit)
        };
        let Some((start, end)) = span else {
            return Ok(Vec::new());
        };

        // Only complete lines are indexed, so the span never includes a torn tail.
        let mut file = fs::File::open(self.log_path(id)).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut bytes = vec![0; (end - start) as usize];
        file.read_exact(&mut bytes).await?;

        let mut records = Vec::new();
        let lines = bytes[..bytes.len() - 1].split(|b| *b == b'\n');
        for (sequence, line) in (from..).zip(lines) {
            let record: ChunkRecord = serde_json::from_slice(line).map_err(|e| {
                BackendError::Corrupt(format!("{} line {}: {}", id, sequence + 1, e))
            })?;
            if record.sequence != sequence {
                return Err(BackendError::Corrupt(format!(
                    "{} line {} carries sequence {}",
                    id,
                    sequence + 1,
                    record.sequence
                )));
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn length(&self, id: &SessionId) -> Result<u64, BackendError> {
        self.ensure_session(id).await?;
        let state = self.state(id).await?;
        let mut index = state.lock.lock().await;
        self.refresh_index(id, &mut index).await?;

        // Appends from other processes only show up here
        let records = index.records();
        state.length_tx.send_if_modified(|current| {
            let changed = *current != records;
            *current = records;
            changed
        });
        Ok(records)
    }

    async fn watch(&self, id: &SessionId) -> Result<watch::Receiver<u64>, BackendError> {
        Ok(self.state(id).await?.length_tx.subscribe())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, BackendError> {
        self.check_open()?;
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(id) = SessionId::parse(&name) else {
                continue;
            };
            match self.load_session(&id).await {
                Ok(Some(meta)) => sessions.push(meta),
                Ok(None) => {}
                Err(e) => warn!("Failed to read session metadata from {:?}: {}", entry.path(), e),
            }
        }

        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn delete_session(&self, id: &SessionId) -> Result<bool, BackendError> {
        self.check_open()?;
        self.states.remove(id);
        match fs::remove_dir_all(self.session_dir(id)).await {
            Ok(()) => {
                debug!(session_id = %id, "Deleted session directory");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn acquire_lease(
        &self,
        id: &SessionId,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseOutcome, BackendError> {
        let state = self.state(id).await?;
        let _guard = state.lock.lock().await;

        let outcome = match self.read_lease(id).await? {
            None => LeaseOutcome::Acquired,
            Some(current) if current.owner == owner => LeaseOutcome::Acquired,
            Some(current) if current.is_expired() => LeaseOutcome::Reclaimed {
                previous_owner: current.owner,
            },
            Some(current) => {
                return Ok(LeaseOutcome::Held {
                    owner: current.owner,
                    expires_at: current.expires_at,
                });
            }
        };

        let lease = Lease::new(owner, ttl);
        write_atomic(&self.lease_path(id), &serde_json::to_vec(&lease)?).await?;
        Ok(outcome)
    }

    async fn renew_lease(
        &self,
        id: &SessionId,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        let state = self.state(id).await?;
        let _guard = state.lock.lock().await;

        match self.read_lease(id).await? {
            Some(mut lease) if lease.owner == owner => {
                lease.renew(ttl);
                write_atomic(&self.lease_path(id), &serde_json::to_vec(&lease)?).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, id: &SessionId, owner: &str) -> Result<bool, BackendError> {
        let state = match self.state(id).await {
            Ok(state) => state,
            Err(BackendError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let _guard = state.lock.lock().await;

        match self.read_lease(id).await? {
            Some(lease) if lease.owner == owner => match fs::remove_file(self.lease_path(id)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            },
            _ => Ok(false),
        }
    }

    async fn lease(&self, id: &SessionId) -> Result<Option<Lease>, BackendError> {
        self.ensure_session(id).await?;
        self.read_lease(id).await
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::Release);
        self.states.clear();
        Ok(())
    }
}
