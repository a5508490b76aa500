//! Ground-plane traversability grid derived from a [`VoxelMap`].

use std::collections::{HashMap, HashSet};

use reach_perception::{CellClass, VoxelMap};

use crate::planner::PlannerConfig;

pub type Cell = [i32; 2];

/// Planar projection of the map with obstacles inflated by the robot radius.
///
/// The grid is bounded by the known columns plus a margin so that searches
/// through unknown space terminate.
#[derive(Debug, Clone)]
pub struct TraversabilityGrid {
    resolution: f32,
    columns: HashMap<Cell, CellClass>,
    inflated: HashSet<Cell>,
    unknown_traversable: bool,
    min: Cell,
    max: Cell,
}

impl TraversabilityGrid {
    pub fn build(map: &VoxelMap, cfg: &PlannerConfig, must_cover: &[Cell]) -> Self {
        let resolution = map.resolution();
        let columns = map.project_columns(cfg.min_height, cfg.max_height, cfg.obstacle_threshold);
        let robot_radius = cfg.robot_radius;

        let reach = (robot_radius / resolution).ceil() as i32;
        let limit = robot_radius * robot_radius;
        let offsets: Vec<Cell> = (-reach..=reach)
            .flat_map(|dx| (-reach..=reach).map(move |dy| [dx, dy]))
            .filter(|[dx, dy]| {
                let (fx, fy) = (*dx as f32 * resolution, *dy as f32 * resolution);
                fx * fx + fy * fy <= limit
            })
            .collect();
        let mut inflated = HashSet::new();
        for (col, class) in &columns {
            if *class == CellClass::Occupied {
                inflated.extend(offsets.iter().map(|[dx, dy]| [col[0] + dx, col[1] + dy]));
            }
        }

        let pad = (cfg.search_margin / resolution).ceil() as i32;
        let mut min = [i32::MAX, i32::MAX];
        let mut max = [i32::MIN, i32::MIN];
        for c in columns.keys().chain(must_cover.iter()) {
            min = [min[0].min(c[0]), min[1].min(c[1])];
            max = [max[0].max(c[0]), max[1].max(c[1])];
        }
        Self {
            resolution,
            columns,
            inflated,
            unknown_traversable: cfg.unknown_traversable,
            min: [min[0].saturating_sub(pad), min[1].saturating_sub(pad)],
            max: [max[0].saturating_add(pad), max[1].saturating_add(pad)],
        }
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    pub fn cell_of(&self, x: f32, y: f32) -> Cell {
        [(x / self.resolution).floor() as i32, (y / self.resolution).floor() as i32]
    }

    pub fn centre(&self, c: Cell) -> (f32, f32) {
        ((c[0] as f32 + 0.5) * self.resolution, (c[1] as f32 + 0.5) * self.resolution)
    }

    pub fn in_bounds(&self, c: Cell) -> bool {
        c[0] >= self.min[0] && c[0] <= self.max[0] && c[1] >= self.min[1] && c[1] <= self.max[1]
    }

    pub fn class(&self, c: Cell) -> CellClass {
        self.columns.get(&c).copied().unwrap_or(CellClass::Unknown)
    }

    pub fn is_traversable(&self, c: Cell) -> bool {
        self.is_passable(c) && !self.inflated.contains(&c)
    }

    /// Like [`is_traversable`](Self::is_traversable) but ignoring inflation.
    pub fn is_passable(&self, c: Cell) -> bool {
        self.in_bounds(c)
            && match self.class(c) {
                CellClass::Free => true,
                CellClass::Unknown => self.unknown_traversable,
                CellClass::Occupied => false,
            }
    }

    /// True when every cell on the segment `a → b` is traversable, ignoring
    /// the cell `exempt` (the start, which may sit inside inflation).
    pub fn line_of_sight(&self, a: (f32, f32), b: (f32, f32), exempt: Cell) -> bool {
        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let length = (dx * dx + dy * dy).sqrt();
        let steps = ((length / (self.resolution * 0.5)).ceil() as usize).max(1);
        (0..=steps).all(|i| {
            let t = i as f32 / steps as f32;
            let c = self.cell_of(a.0 + dx * t, a.1 + dy * t);
            c == exempt || self.is_traversable(c)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reach_perception::{Observation, VoxelMapConfig};
    use reach_types::Point3;

    #[test]
    fn obstacles_are_inflated_by_robot_radius() {
        let mut map = VoxelMap::new(VoxelMapConfig::default());
        let p = Point3::new(0.525, 0.525, 0.5);
        let obs = Observation::new(Point3::new(p.x, p.y, 3.0), vec![p], Utc::now());
        map.insert(&obs);
        map.insert(&obs);

        let cfg = PlannerConfig { robot_radius: 0.1, ..Default::default() };
        let grid = TraversabilityGrid::build(&map, &cfg, &[[0, 0]]);
        assert_eq!(grid.class([10, 10]), CellClass::Occupied);
        assert!(!grid.is_traversable([10, 10]));
        assert!(!grid.is_traversable([12, 10]));
        assert!(grid.is_passable([12, 10]));
        // Diagonal offset of 0.14 m is outside the 0.1 m radius.
        assert!(grid.is_traversable([12, 12]));
    }

    #[test]
    fn bounds_follow_known_cells_plus_margin() {
        let map = VoxelMap::new(VoxelMapConfig::default());
        let cfg = PlannerConfig { search_margin: 0.1, ..Default::default() };
        let grid = TraversabilityGrid::build(&map, &cfg, &[[0, 0]]);
        assert!(grid.is_traversable([2, -2]));
        assert!(!grid.is_traversable([3, 0]));
    }
}
