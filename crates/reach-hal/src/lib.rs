//! `reach-hal` – on-robot hardware abstraction.
//!
//! - [`body`] – the [`RobotBody`] trait the Follower drives.
//! - [`camera`] – the [`Camera`] trait and a ray-cast simulated camera.
//! - [`sim`] – [`SimBody`], a kinematic simulator of base, arm and gripper.
//! - [`world`] – [`SimWorld`], the static box scene the simulator lives in.

pub mod body;
pub mod camera;
pub mod sim;
pub mod world;

pub use body::{BodyState, RobotBody};
pub use camera::{Camera, SimCamera};
pub use sim::{SimBody, SimBodyConfig};
pub use world::{SimBox, SimWorld};
