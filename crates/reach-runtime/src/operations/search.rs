//! Finding an object of a category and approaching it.

use std::time::Duration;

use async_trait::async_trait;
use reach_perception::{Instance, InstanceId};
use reach_planner::Goal;
use reach_types::{ControlMode, Pose2, ReachError};
use tracing::{debug, info, warn};

use super::navigate::explore_step;
use super::{current_pose, ensure_mode, plan};
use crate::context::{TaskContext, WorldView};
use crate::operation::Operation;

/// Selects a reachable instance of `category` as the task's current object.
///
/// Each round looks for the nearest known instance that is not marked
/// unreachable and checks that the planner can route to it. An instance the
/// planner cannot reach is marked unreachable. When nothing usable is known
/// the robot explores one frontier and looks again, up to the search budget.
pub struct SearchForObjectOperation {
    name: String,
    category: String,
}

impl SearchForObjectOperation {
    pub fn new(category: impl Into<String>) -> Self {
        let category = category.into();
        Self { name: format!("search({category})"), category }
    }

    fn nearest_candidate(&self, ctx: &TaskContext, from: &Pose2) -> Option<InstanceId> {
        let map = ctx.map.read();
        map.instances_of(&self.category)
            .filter(|i| !ctx.memory.unreachable.contains(&i.id))
            .map(|i| (i.extent.planar_distance(from.x, from.y), i.id))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id)
    }
}

#[async_trait]
impl Operation for SearchForObjectOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn precondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        world.pose().map(|_| ())
    }

    async fn action(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        ctx.memory.target_category = Some(self.category.clone());
        ctx.memory.current_object = None;
        let settle = Duration::from_millis(ctx.config.settle_ms);

        for round in 0..ctx.config.search_budget.max(1) {
            let pose = current_pose(ctx)?;
            while let Some(id) = self.nearest_candidate(ctx, &pose) {
                let goal = Goal::Instance { id, standoff: ctx.config.standoff };
                match plan(ctx, &goal) {
                    Ok(_) => {
                        info!(category = %self.category, instance = id, round, "object found");
                        ctx.memory.current_object = Some(id);
                        return Ok(());
                    }
                    Err(ReachError::NoPath(why)) => {
                        debug!(instance = id, %why, "instance unreachable");
                        ctx.memory.unreachable.insert(id);
                    }
                    Err(e) => return Err(e),
                }
            }
            match explore_step(ctx).await {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    debug!(round, error = %e, "no frontier to explore, waiting for the map");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(settle).await;
        }
        warn!(category = %self.category, budget = ctx.config.search_budget, "search exhausted");
        Err(ReachError::NoPath(format!(
            "no reachable {} after {} search rounds",
            self.category, ctx.config.search_budget
        )))
    }

    fn postcondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        let object = world.current_object()?;
        if object.category != self.category {
            return Err(format!("selected a {} instead of a {}", object.category, self.category));
        }
        Ok(())
    }
}

/// Drives to standoff distance from the current object, facing it.
#[derive(Default)]
pub struct GoToObjectOperation;

impl GoToObjectOperation {
    pub fn new() -> Self {
        Self
    }
}

/// Planar gap between the base and the object's footprint.
pub(crate) fn gap_to(object: &Instance, pose: &Pose2) -> f32 {
    object.extent.planar_distance(pose.x, pose.y)
}

#[async_trait]
impl Operation for GoToObjectOperation {
    fn name(&self) -> &str {
        "go_to_object"
    }

    fn precondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        world.pose()?;
        world.current_object().map(|_| ())
    }

    async fn action(&mut self, ctx: &mut TaskContext) -> Result<(), ReachError> {
        let Some(id) = ctx.memory.current_object else {
            return Err(ReachError::PreconditionUnmet("go_to_object: no object selected".into()));
        };
        ensure_mode(ctx, ControlMode::Navigation).await?;
        let path = match plan(ctx, &Goal::Instance { id, standoff: ctx.config.standoff }) {
            Ok(path) => path,
            Err(e @ ReachError::NoPath(_)) => {
                ctx.memory.unreachable.insert(id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        info!(instance = id, waypoints = path.len(), "approaching object");
        ctx.client.execute_trajectory(&path).await?;
        Ok(())
    }

    fn postcondition(&self, world: &WorldView<'_>) -> Result<(), String> {
        let pose = world.pose()?;
        let gap = gap_to(world.current_object()?, &pose);
        let limit = world.config.standoff + world.config.position_tolerance;
        if gap > limit {
            return Err(format!("{gap:.2} m from the object, need {limit:.2}"));
        }
        Ok(())
    }
}
