//! The telemetry snapshot published by the Follower.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::SeqNo;
use crate::geometry::Pose2;

/// Names of the arm joints, in the order they appear in
/// [`RobotState::joint_positions`] and in `ArmMove` commands.
pub const ARM_JOINT_NAMES: [&str; 5] = ["lift", "arm", "wrist_yaw", "wrist_pitch", "wrist_roll"];

/// Normalised gripper aperture of a fully open gripper.
pub const GRIPPER_OPEN: f32 = 1.0;
/// Normalised gripper aperture of a fully closed gripper.
pub const GRIPPER_CLOSED: f32 = 0.0;

/// Index of `name` within [`ARM_JOINT_NAMES`], case-insensitive.
pub fn joint_index(name: &str) -> Option<usize> {
    ARM_JOINT_NAMES
        .iter()
        .position(|j| j.eq_ignore_ascii_case(name))
}

/// Posture the robot is currently configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Head forward, arm stowed, base under velocity control.
    #[default]
    Navigation,
    /// Arm deployed, camera on the workspace.
    Manipulation,
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMode::Navigation => write!(f, "navigation"),
            ControlMode::Manipulation => write!(f, "manipulation"),
        }
    }
}

/// Gripper aperture plus whether something is held between the fingers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GripperState {
    /// Normalised aperture in `[GRIPPER_CLOSED, GRIPPER_OPEN]`.
    pub position: f32,
    /// `true` when the fingers stopped on an object before fully closing.
    pub holding: bool,
}

/// Timestamped robot snapshot.
///
/// Produced by the Follower at its publish rate and never mutated after
/// emission; a newer snapshot always supersedes an older one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub timestamp: DateTime<Utc>,
    /// Monotonic telemetry counter assigned by the Follower.
    pub seq_id: u64,
    pub base_pose: Pose2,
    pub joint_positions: Vec<f32>,
    pub joint_velocities: Vec<f32>,
    pub gripper: GripperState,
    pub control_mode: ControlMode,
    /// Sequence number of the most recent command the Follower executed.
    pub last_executed_seq: SeqNo,
    /// `true` once the most recent motion command has settled at its target.
    pub at_goal: bool,
    pub battery_percent: u8,
    /// Active fault flags; empty when healthy.
    pub faults: Vec<String>,
}

impl RobotState {
    /// True once command `seq` (or a later one) has executed and the robot
    /// has settled.
    pub fn settled_after(&self, seq: SeqNo) -> bool {
        self.last_executed_seq >= seq && self.at_goal
    }

    pub fn has_faults(&self) -> bool {
        !self.faults.is_empty()
    }

    /// Position of the named arm joint, if known.
    pub fn joint(&self, name: &str) -> Option<f32> {
        joint_index(name).and_then(|i| self.joint_positions.get(i).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RobotState {
        RobotState {
            timestamp: Utc::now(),
            seq_id: 7,
            base_pose: Pose2::new(1.0, 2.0, 0.5),
            joint_positions: vec![0.6, 0.1, 0.0, 0.0, 0.0],
            joint_velocities: vec![0.0; 5],
            gripper: GripperState { position: GRIPPER_OPEN, holding: false },
            control_mode: ControlMode::Navigation,
            last_executed_seq: 4,
            at_goal: true,
            battery_percent: 90,
            faults: vec![],
        }
    }

    #[test]
    fn settled_after_requires_seq_and_goal() {
        let mut s = sample();
        assert!(s.settled_after(4));
        assert!(s.settled_after(3));
        assert!(!s.settled_after(5));
        s.at_goal = false;
        assert!(!s.settled_after(4));
    }

    #[test]
    fn joint_lookup_is_case_insensitive() {
        let s = sample();
        assert_eq!(s.joint("LIFT"), Some(0.6));
        assert_eq!(s.joint("elbow"), None);
    }

    #[test]
    fn state_json_roundtrip() {
        let s = sample();
        let json = serde_json::to_string(&s).unwrap();
        let back: RobotState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
