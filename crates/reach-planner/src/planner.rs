//! Stateless motion planner.
//!
//! [`MotionPlanner::plan`] is a pure function of the map, the start pose and
//! the [`Goal`]: it reads the [`VoxelMap`] through a ground-plane projection,
//! never mutates it, and keeps nothing between calls, so replanning after
//! every map refinement is expected.
//!
//! | Goal | Plans to |
//! |------|----------|
//! | [`Goal::Pose`] | the goal cell; the last waypoint carries the goal heading |
//! | [`Goal::Instance`] | the nearest free cell within `standoff` of the instance footprint, facing it |
//! | [`Goal::Frontier`] | the first reachable frontier in [`VoxelMap::query_frontier`] order |
//!
//! A goal that cannot be reached fails with [`ReachError::NoPath`], which
//! callers treat as recoverable (re-explore, then retry).

use reach_perception::{InstanceId, VoxelMap};
use reach_types::{Pose2, ReachError};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::astar::{SearchFailure, octile, search, shortcut};
use crate::grid::{Cell, TraversabilityGrid};

/// Where the robot should end up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Goal {
    Pose(Pose2),
    Instance { id: InstanceId, standoff: f32 },
    Frontier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Footprint radius used to inflate obstacles (metres).
    pub robot_radius: f32,
    /// Height band, above the floor, that can collide with the robot.
    pub min_height: f32,
    pub max_height: f32,
    /// Cells at or above this confidence block a column.
    pub obstacle_threshold: f32,
    /// Whether unobserved columns may be driven through.
    pub unknown_traversable: bool,
    pub max_iterations: usize,
    /// How far past the known map the search may wander (metres).
    pub search_margin: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            robot_radius: 0.25,
            min_height: 0.1,
            max_height: 1.6,
            obstacle_threshold: 0.65,
            unknown_traversable: true,
            max_iterations: 200_000,
            search_margin: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MotionPlanner {
    cfg: PlannerConfig,
}

impl MotionPlanner {
    pub fn new(cfg: PlannerConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.cfg
    }

    /// Waypoints from `start` (exclusive) to the goal (inclusive).
    #[instrument(skip(self, map), fields(cells = map.len()))]
    pub fn plan(&self, map: &VoxelMap, start: &Pose2, goal: &Goal) -> Result<Vec<Pose2>, ReachError> {
        match *goal {
            Goal::Pose(target) => self.plan_to_pose(map, start, target),
            Goal::Instance { id, standoff } => self.plan_to_instance(map, start, id, standoff),
            Goal::Frontier => self.plan_to_frontier(map, start),
        }
    }

    /// True when a robot centred at `(x, y)` would be clear of obstacles.
    pub fn is_traversable(&self, map: &VoxelMap, x: f32, y: f32) -> bool {
        let probe = [
            (x / map.resolution()).floor() as i32,
            (y / map.resolution()).floor() as i32,
        ];
        TraversabilityGrid::build(map, &self.cfg, &[probe]).is_traversable(probe)
    }

    fn plan_to_pose(&self, map: &VoxelMap, start: &Pose2, target: Pose2) -> Result<Vec<Pose2>, ReachError> {
        let res = map.resolution();
        let s = cell_at(start.x, start.y, res);
        let g = cell_at(target.x, target.y, res);
        let grid = TraversabilityGrid::build(map, &self.cfg, &[s, g]);
        if s == g {
            return Ok(vec![target]);
        }
        if !grid.is_traversable(g) {
            return Err(ReachError::NoPath(format!(
                "goal ({:.2}, {:.2}) is blocked",
                target.x, target.y
            )));
        }
        let (tree, outcome) = search(&grid, s, |c| c == g, |c| octile(c, g), self.cfg.max_iterations);
        let reached = outcome.map_err(|f| no_path(f, tree.expanded))?;
        let mut waypoints = self.waypoints(&grid, start, &tree.path_to(reached));
        if let Some(last) = waypoints.last_mut() {
            *last = target;
        }
        Ok(waypoints)
    }

    fn plan_to_instance(
        &self,
        map: &VoxelMap,
        start: &Pose2,
        id: InstanceId,
        standoff: f32,
    ) -> Result<Vec<Pose2>, ReachError> {
        let instance = map
            .query_instance(id)
            .ok_or_else(|| ReachError::NoPath(format!("unknown instance {id}")))?;
        let extent = instance.extent;
        let res = map.resolution();
        let s = cell_at(start.x, start.y, res);
        let anchor = cell_at(extent.centre().x, extent.centre().y, res);
        let grid = TraversabilityGrid::build(map, &self.cfg, &[s, anchor]);

        let ring = |c: Cell| {
            let (x, y) = grid.centre(c);
            extent.planar_distance(x, y) <= standoff
        };
        let (cx, cy) = (extent.centre().x, extent.centre().y);
        let facing = |x: f32, y: f32| Pose2::new(x, y, Pose2::new(x, y, 0.0).bearing_to(cx, cy));

        if ring(s) {
            return Ok(vec![facing(start.x, start.y)]);
        }
        let heuristic = |c: Cell| {
            let (x, y) = grid.centre(c);
            ((extent.planar_distance(x, y) - standoff) / res).max(0.0)
        };
        let (tree, outcome) = search(&grid, s, ring, heuristic, self.cfg.max_iterations);
        let reached = outcome.map_err(|f| no_path(f, tree.expanded))?;
        let mut waypoints = self.waypoints(&grid, start, &tree.path_to(reached));
        if let Some(last) = waypoints.last_mut() {
            *last = facing(last.x, last.y);
        }
        debug!(instance = id, waypoints = waypoints.len(), "planned to instance");
        Ok(waypoints)
    }

    fn plan_to_frontier(&self, map: &VoxelMap, start: &Pose2) -> Result<Vec<Pose2>, ReachError> {
        let frontier = map.query_frontier(start);
        if frontier.is_empty() {
            return Err(ReachError::NoPath("no frontier left".into()));
        }
        let res = map.resolution();
        let s = cell_at(start.x, start.y, res);
        let grid = TraversabilityGrid::build(map, &self.cfg, &[s]);
        // One flood, then the first frontier it touched.
        let (tree, _) = search(&grid, s, |_| false, |_| 0.0, self.cfg.max_iterations);
        let target = frontier
            .iter()
            .map(|f| f.column)
            .find(|c| *c != s && tree.reached(*c))
            .ok_or_else(|| {
                ReachError::NoPath(format!("none of {} frontier cells reachable", frontier.len()))
            })?;
        Ok(self.waypoints(&grid, start, &tree.path_to(target)))
    }

    /// Shortcut the cell chain and turn it into headed waypoints.
    fn waypoints(&self, grid: &TraversabilityGrid, start: &Pose2, cells: &[Cell]) -> Vec<Pose2> {
        let kept = shortcut(grid, cells);
        let mut out = Vec::with_capacity(kept.len().saturating_sub(1));
        let (mut px, mut py) = (start.x, start.y);
        for c in kept.iter().skip(1) {
            let (x, y) = grid.centre(*c);
            let theta = Pose2::new(px, py, 0.0).bearing_to(x, y);
            out.push(Pose2::new(x, y, theta));
            (px, py) = (x, y);
        }
        out
    }
}

fn cell_at(x: f32, y: f32, resolution: f32) -> Cell {
    [(x / resolution).floor() as i32, (y / resolution).floor() as i32]
}

fn no_path(failure: SearchFailure, expanded: usize) -> ReachError {
    match failure {
        SearchFailure::Exhausted => ReachError::NoPath(format!("goal unreachable after {expanded} expansions")),
        SearchFailure::IterationLimit => ReachError::NoPath(format!("search gave up after {expanded} expansions")),
    }
}
