use std::fmt;

use keel_core::PermissionDecision;
use keel_tools::{ToolCallRequest, ToolChunk, ToolFailure, ToolOutput};
use serde::Serialize;

/// Lifecycle of one call in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryState {
    Queued,
    Validating,
    AwaitingPermission,
    Running,
    Streaming,
    Done,
    Failed,
    Cancelled,
}

impl EntryState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Validating => "validating",
            Self::AwaitingPermission => "awaiting-permission",
            Self::Running => "running",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a call ended.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Completed(ToolOutput),
    Failed(ToolFailure),
    Cancelled,
}

impl CallOutcome {
    #[must_use]
    pub fn state(&self) -> EntryState {
        match self {
            Self::Completed(_) => EntryState::Done,
            Self::Failed(_) => EntryState::Failed,
            Self::Cancelled => EntryState::Cancelled,
        }
    }

    /// Terminal chunk to outcome. Cancellation reported by the tool is kept
    /// apart from other failures.
    #[must_use]
    pub fn from_chunk(chunk: ToolChunk) -> Option<Self> {
        match chunk {
            ToolChunk::Progress(_) => None,
            ToolChunk::Result(output) => Some(Self::Completed(output)),
            ToolChunk::Failed(failure) if failure.kind == keel_tools::FailureKind::Cancelled => {
                Some(Self::Cancelled)
            }
            ToolChunk::Failed(failure) => Some(Self::Failed(failure)),
        }
    }
}

/// Scheduler-side record for one request, alive until its result is
/// delivered.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub request: ToolCallRequest,
    pub decision: Option<PermissionDecision>,
    pub state: EntryState,
    pub chunks: Vec<ToolChunk>,
}

impl QueueEntry {
    #[must_use]
    pub fn new(request: ToolCallRequest) -> Self {
        Self {
            request,
            decision: None,
            state: EntryState::Queued,
            chunks: Vec::new(),
        }
    }

    /// Move to `next`. Terminal states are sticky; returns whether the state
    /// changed.
    pub fn transition(&mut self, next: EntryState) -> bool {
        if self.state.is_terminal() || self.state == next {
            return false;
        }
        tracing::trace!(
            tool_use_id = %self.request.tool_use_id,
            from = %self.state,
            to = %next,
            "entry state"
        );
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use keel_tools::FailureKind;

    use super::*;

    fn entry() -> QueueEntry {
        QueueEntry::new(ToolCallRequest {
            tool_use_id: "toolu_1".into(),
            tool_id: "bash".into(),
            input: serde_json::json!({ "command": "ls" }),
            index: 0,
            turn_id: "turn".into(),
        })
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut e = entry();
        assert!(e.transition(EntryState::Validating));
        assert!(!e.transition(EntryState::Validating));
        assert!(e.transition(EntryState::Cancelled));
        assert!(!e.transition(EntryState::Running));
        assert_eq!(e.state, EntryState::Cancelled);
    }

    #[test]
    fn cancelled_failure_becomes_cancelled_outcome() {
        let outcome = CallOutcome::from_chunk(ToolChunk::Failed(ToolFailure::cancelled())).unwrap();
        assert!(matches!(outcome, CallOutcome::Cancelled));
        assert_eq!(outcome.state(), EntryState::Cancelled);

        let failed = CallOutcome::from_chunk(ToolChunk::Failed(ToolFailure::new(
            FailureKind::Execution,
            "boom",
        )))
        .unwrap();
        assert_eq!(failed.state(), EntryState::Failed);
        assert!(CallOutcome::from_chunk(ToolChunk::Progress("x".into())).is_none());
    }

    #[test]
    fn state_names_are_kebab_case() {
        assert_eq!(EntryState::AwaitingPermission.to_string(), "awaiting-permission");
        assert_eq!(
            serde_json::to_value(EntryState::AwaitingPermission).unwrap(),
            "awaiting-permission"
        );
    }
}
