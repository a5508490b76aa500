//! Concrete operations used by the built-in tasks.
//!
//! | Operation | Action |
//! |---|---|
//! | [`SetModeOperation`] | switch posture and wait for it |
//! | [`NavigateOperation`] | plan to a pose and follow the waypoints |
//! | [`ExploreFrontierOperation`] | drive to the best reachable frontier |
//! | [`SearchForObjectOperation`] | find a reachable instance of a category, exploring when none is known |
//! | [`GoToObjectOperation`] | approach the selected object to standoff distance |
//! | [`GraspObjectOperation`] | open, reach, close, lift |
//! | [`WaitOperation`] | sleep so fresh frames reach the map |

mod grasp;
mod mode;
mod navigate;
mod search;
mod wait;

pub use grasp::GraspObjectOperation;
pub use mode::SetModeOperation;
pub use navigate::{ExploreFrontierOperation, NavigateOperation};
pub use search::{GoToObjectOperation, SearchForObjectOperation};
pub use wait::WaitOperation;

use reach_planner::Goal;
use reach_types::{ControlMode, Pose2, ReachError};

use crate::context::TaskContext;

/// Latest base pose, or link-down when no telemetry has been seen.
pub(crate) fn current_pose(ctx: &TaskContext) -> Result<Pose2, ReachError> {
    ctx.client
        .get_state()
        .map(|s| s.base_pose)
        .ok_or_else(|| ReachError::LinkDown("no robot state cached".into()))
}

/// Switch posture unless the robot is already in `mode`.
pub(crate) async fn ensure_mode(ctx: &TaskContext, mode: ControlMode) -> Result<(), ReachError> {
    if ctx.client.get_state().is_some_and(|s| s.control_mode == mode) {
        return Ok(());
    }
    ctx.client.set_mode(mode).await.map(|_| ())
}

/// Plan from the current pose against the map as it is right now.
pub(crate) fn plan(ctx: &TaskContext, goal: &Goal) -> Result<Vec<Pose2>, ReachError> {
    let start = current_pose(ctx)?;
    let map = ctx.map.read();
    ctx.planner.plan(&map, &start, goal)
}
