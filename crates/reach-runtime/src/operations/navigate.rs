use async_trait::async_trait;
use reach_planner::Goal;
use reach_types::{ControlMode, Pose2, ReachError};
use tracing::{debug, info};

use super::{current_pose, ensure_mode, plan};
use crate::context::{TaskContext, WorldView};
use crate::operation::Operation;

/// Drive to a pose over a freshly planned path.
pub struct NavigateOperation {
    target: Pose2,
}

impl NavigateOperation {
    pub fn new(target: Pose2) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Operation for NavigateOperation {
    fn name(&self) -> &str {
        "navigate"
    }

    fn precondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        world.pose().map(|_| ())
    }

    async fn action(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        ensure_mode(ctx, ControlMode::Navigation).await?;
        let path = plan(ctx, &Goal::Pose(self.target))?;
        info!(x = self.target.x, y = self.target.y, waypoints = path.len(), "navigating");
        ctx.client.execute_trajectory(&path).await?;
        Ok(())
    }

    fn postcondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        let pose = world.pose()?;
        let dist = pose.distance_to(&self.target);
        if dist > world.config.position_tolerance {
            return Err(format!("{dist:.2} m from target"));
        }
        let heading = pose.heading_error(&self.target);
        if heading > world.config.heading_tolerance {
            return Err(format!("heading off by {heading:.2} rad"));
        }
        Ok(())
    }
}

/// Drive to the best reachable frontier.
///
/// Fails recoverably when the same frontier keeps being chosen, which means
/// driving there no longer reveals anything new.
#[derive(Default)]
pub struct ExploreFrontierOperation {
    target: Option<Pose2>,
}

impl ExploreFrontierOperation {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Map column of a frontier goal, as remembered by the repeat guard.
pub(crate) fn frontier_label(target: &Pose2, resolution: f32) -> String {
    format!(
        "{},{}",
        (target.x / resolution).floor() as i32,
        (target.y / resolution).floor() as i32
    )
}

/// Plan to a frontier, record it with the repeat guard and drive there.
pub(crate) async fn explore_step(ctx: &mut TaskContext) -> Result<Pose2, ReachError> {
    ensure_mode(ctx, ControlMode::Navigation).await?;
    let path = plan(ctx, &Goal::Frontier)?;
    let target = match path.last() {
        Some(p) => *p,
        None => current_pose(ctx)?,
    };
    let label = frontier_label(&target, ctx.map.read().resolution());
    if ctx.memory.frontier_guard.record(label.clone()) {
        ctx.memory.frontier_guard.reset();
        return Err(ReachError::TaskFailed {
            task: "explore_frontier".into(),
            reason: format!("frontier {label} chosen repeatedly"),
        });
    }
    debug!(frontier = %label, waypoints = path.len(), "exploring");
    ctx.client.execute_trajectory(&path).await?;
    Ok(target)
}

#[async_trait]
impl Operation for ExploreFrontierOperation {
    fn name(&self) -> &str {
        "explore_frontier"
    }

    fn precondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        world.pose().map(|_| ())
    }

    async fn action(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        self.target = Some(explore_step(ctx).await?);
        Ok(())
    }

    fn postcondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        let Some(target) = self.target else {
            return Err("no frontier reached".into());
        };
        let dist = world.pose()?.distance_to(&target);
        if dist > world.config.position_tolerance {
            return Err(format!("{dist:.2} m short of the frontier"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationRun, OperationStatus};
    use crate::test_support::sim_context;
    use reach_perception::Observation;
    use reach_types::Point3;

    /// A wall of points at x = 1 from y = -1 to 1, seen from the origin.
    fn wall() -> Observation {
        let mut points = Vec::new();
        for i in 0..40 {
            for k in 0..20 {
                points.push(Point3::new(1.0, -1.0 + i as f32 * 0.05, k as f32 * 0.05 + 0.025));
            }
        }
        Observation::new(Point3::new(0.0, 0.0, 1.0), points, chrono::Utc::now())
    }

    #[tokio::test]
    async fn navigates_around_an_obstacle() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        ctx.client.wait_for_state(std::time::Duration::from_secs(2)).await?;
        ctx.map.insert(&wall());
        ctx.map.insert(&wall());
        let target = Pose2::new(1.6, 0.0, 0.0);
        let mut run = OperationRun::new(NavigateOperation::new(target));
        run.execute(&mut ctx).await?;
        assert_eq!(run.status(), OperationStatus::Succeeded);
        Ok(())
    }

    #[tokio::test]
    async fn blocked_target_is_a_recoverable_failure() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        ctx.client.wait_for_state(std::time::Duration::from_secs(2)).await?;
        ctx.map.insert(&wall());
        ctx.map.insert(&wall());
        let mut run = OperationRun::new(NavigateOperation::new(Pose2::new(1.0, 0.0, 0.0)));
        let err = run.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReachError::NoPath(_)));
        assert!(err.is_recoverable());
        assert_eq!(run.status(), OperationStatus::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn explores_then_detects_a_repeated_frontier() -> Result<(), Box<dyn std::error::Error>> {
        let (mut ctx, _sim) = sim_context().await?;
        ctx.client.wait_for_state(std::time::Duration::from_secs(2)).await?;
        ctx.map.insert(&wall());
        ctx.map.insert(&wall());

        let mut run = OperationRun::new(ExploreFrontierOperation::new());
        run.execute(&mut ctx).await?;
        assert_eq!(run.status(), OperationStatus::Succeeded);

        // Pretend the next frontier has already been chosen twice in a row.
        let next = plan(&ctx, &Goal::Frontier)?;
        let target = *next.last().ok_or("empty frontier path")?;
        let label = frontier_label(&target, ctx.map.read().resolution());
        for _ in 1..ctx.config.frontier_repeat_limit {
            ctx.memory.frontier_guard.record(label.clone());
        }
        let before = current_pose(&ctx)?;
        let mut run = OperationRun::new(ExploreFrontierOperation::new());
        let err = run.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ReachError::TaskFailed { .. }), "{err}");
        assert!(err.is_recoverable());
        assert_eq!(current_pose(&ctx)?, before, "a stuck explore must not drive");
        Ok(())
    }
}
