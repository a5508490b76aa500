//! `reach-types` – shared vocabulary of the reach stack.
//!
//! Every other crate speaks in these types: the Follower publishes
//! [`RobotState`], the Robot Client issues [`Command`]s, the Voxel Map and
//! planner work in [`Pose2`] / [`Point3`], and every fallible operation
//! returns a [`ReachError`].
//!
//! # Modules
//!
//! - [`geometry`] – planar poses, 3-D points and angle helpers.
//! - [`state`] – the telemetry snapshot published by the Follower.
//! - [`command`] – sequence-numbered directives and their acknowledgements.
//! - [`frame`] – camera frames carried on the telemetry stream.
//! - [`error`] – the workspace-wide error taxonomy.

pub mod command;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod state;

pub use command::{AckStatus, Command, CommandAck, CommandKind, SeqNo};
pub use error::ReachError;
pub use frame::{CameraIntrinsics, CameraPose, ImageFrame};
pub use geometry::{Point3, Pose2, angle_difference, wrap_angle};
pub use state::{ARM_JOINT_NAMES, ControlMode, GRIPPER_CLOSED, GRIPPER_OPEN, GripperState, RobotState, joint_index};
