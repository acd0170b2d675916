//! Per-package sync state tracking
//!
//! Each package walks `Pending → ReadingVersions → Classifying → Resolving →
//! Publishing → RereadingSecondary → Reclassifying → Done`, leaving early to
//! `Skipped` or `Failed`. Transitions are kept in memory with timestamps so a
//! failure can be reported together with the phase it happened in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync phase of a single package
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Pending,
    ReadingVersions,
    Classifying,
    Resolving,
    Publishing,
    RereadingSecondary,
    Reclassifying,
    Done,
    Skipped,
    Failed,
}

impl SyncState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::Done | SyncState::Skipped | SyncState::Failed)
    }

    /// States reachable from `self`
    fn successors(self) -> &'static [SyncState] {
        use SyncState::*;
        match self {
            Pending => &[ReadingVersions],
            ReadingVersions => &[Classifying, Failed],
            Classifying => &[Resolving, Skipped, Failed],
            Resolving => &[Publishing, Skipped, Failed],
            Publishing => &[RereadingSecondary, Failed],
            RereadingSecondary => &[Reclassifying, Failed],
            Reclassifying => &[Done, Failed],
            Done | Skipped | Failed => &[],
        }
    }
}

/// State transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub from: SyncState,
    pub to: SyncState,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Tracks one package through a run
#[derive(Debug, Clone)]
pub struct SyncStateMachine {
    package_id: String,
    current_state: SyncState,
    transitions: Vec<StateTransition>,
    error: Option<String>,
}

impl SyncStateMachine {
    pub fn new(package_id: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            current_state: SyncState::Pending,
            transitions: Vec::new(),
            error: None,
        }
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    pub fn get_state(&self) -> SyncState {
        self.current_state
    }

    /// Move to `to`; returns false and leaves the state untouched when the
    /// transition is not allowed
    pub fn transition(&mut self, to: SyncState) -> bool {
        self.transition_with_note(to, None)
    }

    pub fn transition_with_note(&mut self, to: SyncState, note: Option<String>) -> bool {
        if !self.current_state.successors().contains(&to) {
            tracing::debug!(
                id = %self.package_id,
                from = ?self.current_state,
                to = ?to,
                "ignoring invalid state transition"
            );
            return false;
        }

        self.transitions.push(StateTransition {
            from: self.current_state,
            to,
            timestamp: Utc::now(),
            note,
        });
        self.current_state = to;
        true
    }

    /// Fail from the current phase; returns the phase that failed
    pub fn fail(&mut self, error: impl Into<String>) -> SyncState {
        let phase = self.current_state;
        let error = error.into();
        self.transition_with_note(SyncState::Failed, Some(error.clone()));
        self.error = Some(error);
        phase
    }

    /// Phase in which the package failed, if it did
    pub fn failed_phase(&self) -> Option<SyncState> {
        self.transitions
            .iter()
            .rev()
            .find(|t| t.to == SyncState::Failed)
            .map(|t| t.from)
    }

    pub fn get_last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Milliseconds between the first and the last transition
    pub fn get_elapsed_time(&self) -> i64 {
        match (self.transitions.first(), self.transitions.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
            _ => 0,
        }
    }

    pub fn get_history(&self) -> String {
        self.transitions
            .iter()
            .map(|t| {
                let note = t
                    .note
                    .as_ref()
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default();
                format!("{}: {:?} → {:?}{}", t.timestamp.to_rfc3339(), t.from, t.to, note)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
