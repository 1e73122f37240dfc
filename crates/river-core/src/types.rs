//! Session and chunk record data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::codec::Payload;
use crate::error::{ErrorClassification, RiverError};

/// Position of a record inside a session log. Gapless, starting at zero.
pub type Sequence = u64;

const MAX_SESSION_ID_LEN: usize = 128;

/// Opaque session identifier.
///
/// Restricted to `[A-Za-z0-9_-]` so it is safe to use as a storage key or a
/// directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse and validate a client-supplied session id
    pub fn parse(raw: &str) -> Result<Self, RiverError> {
        if raw.is_empty() || raw.len() > MAX_SESSION_ID_LEN {
            return Err(RiverError::InvalidInput(format!(
                "session id must be 1..={} characters",
                MAX_SESSION_ID_LEN
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(RiverError::InvalidInput(format!(
                "session id contains invalid characters: {:?}",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = RiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = RiverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reserved frame kinds layered over the opaque payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameKind {
    Data,
    Info,
    FatalError,
    End,
}

impl FrameKind {
    /// `end` and `fatal-error` close a session log
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FatalError | Self::End)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Info => "info",
            Self::FatalError => "fatal-error",
            Self::End => "end",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry of a session log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub sequence: Sequence,
    pub kind: FrameKind,
    pub payload: Payload,
    pub appended_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub fn new(sequence: Sequence, kind: FrameKind, payload: Payload) -> Self {
        Self {
            sequence,
            kind,
            payload,
            appended_at: Utc::now(),
        }
    }

    /// Same position and content, ignoring the append timestamp.
    /// Used to recognize a retried append that already landed.
    pub fn same_content(&self, other: &ChunkRecord) -> bool {
        self.sequence == other.sequence && self.kind == other.kind && self.payload == other.payload
    }
}

/// Persisted session metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub id: SessionId,
    /// Router key of the producer that feeds this session
    pub stream: String,
    pub status: SessionStatus,
    /// Whether resumption tokens are announced and accepted
    pub resumable: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_append_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Classification of the fatal-error frame that closed the log, if any
    #[serde(default)]
    pub terminal: Option<ErrorClassification>,
}

impl SessionMeta {
    pub fn new(id: SessionId, stream: impl Into<String>, resumable: bool) -> Self {
        Self {
            id,
            stream: stream.into(),
            status: SessionStatus::Running,
            resumable,
            created_at: Utc::now(),
            last_append_at: None,
            finished_at: None,
            terminal: None,
        }
    }

    /// Move to a terminal status. Returns false if already terminal.
    pub fn finish(&mut self, status: SessionStatus, terminal: Option<ErrorClassification>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.terminal = terminal;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Most recent activity, used by the retention policy
    pub fn last_activity(&self) -> DateTime<Utc> {
        [Some(self.created_at), self.last_append_at, self.finished_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.created_at)
    }
}
