//! Runner states

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::SessionStatus;

/// Lifecycle of one stream run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    /// Authorization and ownership are being settled
    Starting,
    /// Pulling from the producer and appending
    Running,
    Completed,
    Failed,
    Aborted,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Starting => write!(f, "starting"),
            RunnerState::Running => write!(f, "running"),
            RunnerState::Completed => write!(f, "completed"),
            RunnerState::Failed => write!(f, "failed"),
            RunnerState::Aborted => write!(f, "aborted"),
        }
    }
}

impl RunnerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunnerState::Completed | RunnerState::Failed | RunnerState::Aborted
        )
    }

    /// Persisted session status for a terminal state
    pub fn session_status(&self) -> Option<SessionStatus> {
        match self {
            RunnerState::Completed => Some(SessionStatus::Completed),
            RunnerState::Failed => Some(SessionStatus::Failed),
            RunnerState::Aborted => Some(SessionStatus::Aborted),
            RunnerState::Starting | RunnerState::Running => None,
        }
    }
}

/// Why a run was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortReason {
    /// Explicit abort request
    Requested,
    /// No subscriber attached for longer than the detached grace
    ConsumersGone,
    /// The run outlived its lifetime budget
    BudgetExceeded,
    /// The engine is shutting down
    Shutdown,
}

impl AbortReason {
    pub fn description(&self) -> &'static str {
        match self {
            AbortReason::Requested => "abort requested",
            AbortReason::ConsumersGone => "no consumer attached within the detached grace period",
            AbortReason::BudgetExceeded => "run exceeded its maximum duration",
            AbortReason::Shutdown => "engine shutting down",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_map_to_status() {
        assert_eq!(RunnerState::Starting.session_status(), None);
        assert_eq!(
            RunnerState::Aborted.session_status(),
            Some(SessionStatus::Aborted)
        );
        assert!(RunnerState::Failed.is_terminal());
        assert!(!RunnerState::Running.is_terminal());
    }
}
