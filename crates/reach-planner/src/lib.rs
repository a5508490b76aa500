//! `reach-planner` – collision-free paths over the voxel map.
//!
//! - [`planner`] – [`MotionPlanner`] and [`Goal`].
//! - [`grid`] – the inflated ground-plane projection planned on.
//! - [`astar`] – 8-connected A* and path shortcutting.

pub mod astar;
pub mod grid;
pub mod planner;

pub use grid::TraversabilityGrid;
pub use planner::{Goal, MotionPlanner, PlannerConfig};
