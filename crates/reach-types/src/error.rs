//! Workspace-wide error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::SeqNo;

/// Every failure the stack can surface.
///
/// The split between recoverable and fatal conditions drives the Task
/// Engine's retry policy; see [`ReachError::is_recoverable`].
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReachError {
    /// The control channel is unavailable.
    #[error("Link down: {0}")]
    LinkDown(String),

    /// No confirming state arrived before the command deadline.
    #[error("Command {seq} timed out after {timeout_ms} ms")]
    CommandTimeout { seq: SeqNo, timeout_ms: u64 },

    /// A stop pre-empted the command before it completed.
    #[error("Command {seq} cancelled by stop")]
    Cancelled { seq: SeqNo },

    /// The Follower refused the command.
    #[error("Command {seq} rejected: {reason}")]
    CommandRejected { seq: SeqNo, reason: String },

    /// The planner could not route to the goal.
    #[error("No path: {0}")]
    NoPath(String),

    #[error("Precondition not met for '{0}'")]
    PreconditionUnmet(String),

    /// The action ran but did not achieve its goal.
    #[error("Postcondition violated for '{0}'")]
    PostconditionViolation(String),

    /// A Manager's composition policy was not satisfied.
    #[error("Task '{task}' failed: {reason}")]
    TaskFailed { task: String, reason: String },

    /// A map snapshot was written by an incompatible format version.
    #[error("Snapshot version mismatch: found {found}, supported {supported}")]
    VersionMismatch { found: u16, supported: u16 },

    #[error("Hardware fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ReachError {
    /// True when a bounded local retry may succeed.
    ///
    /// Link loss, cancellation, refusal and data-format failures are fatal to
    /// the attempt and propagate without retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReachError::CommandTimeout { .. }
                | ReachError::NoPath(_)
                | ReachError::PreconditionUnmet(_)
                | ReachError::PostconditionViolation(_)
                | ReachError::TaskFailed { .. }
        )
    }

    pub fn is_link_down(&self) -> bool {
        matches!(self, ReachError::LinkDown(_))
    }
}

impl From<std::io::Error> for ReachError {
    fn from(e: std::io::Error) -> Self {
        ReachError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_follows_taxonomy() {
        assert!(ReachError::NoPath("blocked".into()).is_recoverable());
        assert!(ReachError::CommandTimeout { seq: 1, timeout_ms: 10 }.is_recoverable());
        assert!(ReachError::PostconditionViolation("grasp".into()).is_recoverable());
        assert!(!ReachError::LinkDown("eof".into()).is_recoverable());
        assert!(!ReachError::VersionMismatch { found: 9, supported: 1 }.is_recoverable());
        assert!(!ReachError::Cancelled { seq: 2 }.is_recoverable());
    }

    #[test]
    fn display_names_the_condition() {
        let err = ReachError::CommandTimeout { seq: 12, timeout_ms: 500 };
        assert!(err.to_string().contains("12"));
        let err = ReachError::HardwareFault {
            component: "lift".into(),
            details: "overcurrent".into(),
        };
        assert!(err.to_string().contains("lift"));
    }

    #[test]
    fn error_json_roundtrip() {
        let err = ReachError::CommandRejected { seq: 4, reason: "joint limit".into() };
        let json = serde_json::to_string(&err).unwrap();
        let back: ReachError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
