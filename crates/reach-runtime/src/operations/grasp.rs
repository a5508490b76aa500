use async_trait::async_trait;
use reach_perception::Instance;
use reach_types::{ARM_JOINT_NAMES, ControlMode, Pose2, ReachError};
use tracing::info;

use super::{current_pose, ensure_mode};
use crate::context::{TaskConfig, TaskContext, WorldView};
use crate::operation::Operation;

/// Highest lift position the arm accepts.
const LIFT_MAX: f32 = 1.1;

/// Picks up the current object.
///
/// Opens the gripper, turns the base towards the object, raises the lift to
/// the object's height, extends the arm, closes and lifts. Succeeds only when
/// the gripper reports that it is holding something.
#[derive(Default)]
pub struct GraspObjectOperation;

impl GraspObjectOperation {
    pub fn new() -> Self {
        Self
    }
}

/// Arm extension needed to put the fingers over `object` from `pose`.
fn required_extension(object: &Instance, pose: &Pose2, cfg: &TaskConfig) -> f32 {
    let c = object.centre();
    (c.x - pose.x).hypot(c.y - pose.y) - cfg.arm_base_offset
}

fn arm_pose(lift: f32, extension: f32) -> Vec<f32> {
    let mut joints = vec![0.0; ARM_JOINT_NAMES.len()];
    joints[0] = lift.clamp(0.0, LIFT_MAX);
    joints[1] = extension;
    joints
}

#[async_trait]
impl Operation for GraspObjectOperation {
    fn name(&self) -> &str {
        "grasp_object"
    }

    fn precondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        let pose = world.pose()?;
        let object = world.current_object()?;
        if world.state.as_ref().is_some_and(|s| s.gripper.holding) {
            return Err("gripper already holding something".into());
        }
        let needed = required_extension(object, &pose, world.config);
        if needed > world.config.max_arm_extension + world.config.position_tolerance {
            return Err(format!("object needs {needed:.2} m of reach"));
        }
        Ok(())
    }

    async fn action(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        let centre = {
            let view = ctx.view();
            view.current_object().map_err(ReachError::PreconditionUnmet)?.centre()
        };
        let cfg = ctx.config.clone();

        ensure_mode(ctx, ControlMode::Manipulation).await?;
        ctx.client.open_gripper().await?;

        let pose = current_pose(ctx)?;
        let facing = Pose2::new(pose.x, pose.y, pose.bearing_to(centre.x, centre.y));
        ctx.client.move_to(facing).await?;

        let lift = centre.z - cfg.gripper_height_offset;
        let extension = ((centre.x - pose.x).hypot(centre.y - pose.y) - cfg.arm_base_offset)
            .clamp(0.0, cfg.max_arm_extension);
        info!(lift, extension, "reaching for object");
        ctx.client.move_arm(arm_pose(lift, 0.0)).await?;
        ctx.client.move_arm(arm_pose(lift, extension)).await?;

        let state = ctx.client.close_gripper().await?;
        if !state.gripper.holding {
            // Leave the postcondition to report the miss.
            return Ok(());
        }
        ctx.client.move_arm(arm_pose(lift + cfg.lift_after_grasp, extension)).await?;
        ctx.client.move_arm(arm_pose(lift + cfg.lift_after_grasp, 0.0)).await?;
        Ok(())
    }

    fn postcondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        match &world.state {
            Some(s) if s.gripper.holding => Ok(()),
            Some(_) => Err("gripper closed on nothing".into()),
            None => Err("no robot state".into()),
        }
    }
}
