//! Sequence-numbered directives sent from the Robot Client to the Follower.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::Pose2;
use crate::state::ControlMode;

/// Command sequence number. Strictly increasing per client; `0` is never
/// issued, so a fresh Follower reports `last_executed_seq == 0`.
pub type SeqNo = u64;

/// What the Follower is being asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum CommandKind {
    /// Drive the base to `target`; when `relative` the target is a delta in
    /// the robot's current frame.
    BaseMove { target: Pose2, relative: bool },
    /// Move the arm joints (see [`ARM_JOINT_NAMES`][crate::ARM_JOINT_NAMES]).
    ArmMove { joints: Vec<f32> },
    /// Drive the gripper to a normalised aperture.
    Gripper { position: f32 },
    /// Switch posture between navigation and manipulation.
    SetMode { mode: ControlMode },
    /// Cancel whatever is in flight and hold position.
    Stop,
}

impl CommandKind {
    /// True for commands that put actuators in motion.
    pub fn is_motion(&self) -> bool {
        !matches!(self, CommandKind::Stop)
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            CommandKind::BaseMove { .. } => "base_move",
            CommandKind::ArmMove { .. } => "arm_move",
            CommandKind::Gripper { .. } => "gripper",
            CommandKind::SetMode { .. } => "set_mode",
            CommandKind::Stop => "stop",
        }
    }
}

/// A directive consumed exactly once by the Follower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub seq: SeqNo,
    pub kind: CommandKind,
    pub issued_at: DateTime<Utc>,
}

impl Command {
    pub fn new(seq: SeqNo, kind: CommandKind) -> Self {
        Self {
            seq,
            kind,
            issued_at: Utc::now(),
        }
    }
}

/// Follower verdict on a received command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AckStatus {
    /// The command was applied to the body.
    Accepted,
    /// Duplicate or out-of-order sequence number; silently ignored.
    Discarded,
    /// A safety rule refused the command.
    Rejected(String),
}

/// Acknowledgement sent back on the command stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub seq: SeqNo,
    pub status: AckStatus,
    pub timestamp: DateTime<Utc>,
}

impl CommandAck {
    pub fn new(seq: SeqNo, status: AckStatus) -> Self {
        Self {
            seq,
            status,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kind_is_tagged_on_the_wire() {
        let cmd = Command::new(
            3,
            CommandKind::BaseMove {
                target: Pose2::new(1.0, 0.0, 0.0),
                relative: true,
            },
        );
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""kind":"base_move""#), "{json}");
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn stop_is_not_motion() {
        assert!(!CommandKind::Stop.is_motion());
        assert!(CommandKind::Gripper { position: 0.5 }.is_motion());
    }

    #[test]
    fn rejected_ack_carries_reason() {
        let ack = CommandAck::new(9, AckStatus::Rejected("joint limit".into()));
        let json = serde_json::to_string(&ack).unwrap();
        let back: CommandAck = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, AckStatus::Rejected("joint limit".into()));
    }
}
