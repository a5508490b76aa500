//! Generic `RobotBody` trait for the on-robot side of the control channel.
//!
//! The Follower only ever talks to this trait, so a real driver stack and the
//! kinematic [`SimBody`][crate::sim::SimBody] are interchangeable.

use reach_types::{CameraPose, CommandKind, ControlMode, GripperState, Pose2, ReachError};
use std::time::Duration;

/// Everything the body can report about itself at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyState {
    pub base_pose: Pose2,
    pub joint_positions: Vec<f32>,
    pub joint_velocities: Vec<f32>,
    pub gripper: GripperState,
    pub control_mode: ControlMode,
    /// `true` when no commanded motion is still converging.
    pub at_goal: bool,
    pub battery_percent: u8,
    pub faults: Vec<String>,
    /// Head camera placement derived from the base pose and posture.
    pub camera_pose: CameraPose,
}

/// A mobile manipulator body (base, arm, gripper).
///
/// Commands are applied as targets; [`step`][RobotBody::step] advances the
/// hardware (or simulation) towards them.
pub trait RobotBody: Send {
    /// Accept `command` as the new target for the relevant actuators.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::HardwareFault`] if the command cannot be applied
    /// (e.g. wrong joint count).
    fn apply(&mut self, command: &CommandKind) -> Result<(), ReachError>;

    /// Cancel every outstanding target and hold the current configuration.
    fn halt(&mut self);

    /// Advance the body by `dt`.
    fn step(&mut self, dt: Duration);

    fn snapshot(&self) -> BodyState;
}
