//! Sparse Voxel Map.
//!
//! Fuses [`Observation`]s into a hash map of [`VoxelCell`]s keyed by integer
//! coordinate. Every cell stores an occupancy confidence in `[floor, ceil]`
//! that starts at the 0.5 prior ("unknown") and is refined incrementally:
//!
//! ```text
//! hit:   c ← c + w_hit  · (ceil − c)
//! miss:  c ← c − w_miss · (c − floor)
//! ```
//!
//! Each update moves the confidence by a fraction of the remaining headroom,
//! so repeating identical evidence changes it by less every time and not at
//! all once it has snapped onto the ceiling. Cells that go unobserved for
//! longer than `staleness_secs` drift back towards 0.5 on [`VoxelMap::decay`]:
//! stale evidence becomes *unknown*, never *free*.
//!
//! | Class | Confidence |
//! |-------|------------|
//! | [`CellClass::Occupied`] | `≥ occupied_threshold` |
//! | [`CellClass::Free`]     | `≤ free_threshold` |
//! | [`CellClass::Unknown`]  | anything else, or no cell |
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use reach_perception::{Aabb, Observation, VoxelMap, VoxelMapConfig};
//! use reach_types::Point3;
//!
//! let mut map = VoxelMap::new(VoxelMapConfig::default());
//! let obs = Observation::new(
//!     Point3::new(0.0, 0.0, 0.5),
//!     vec![Point3::new(1.02, 0.01, 0.51)],
//!     Utc::now(),
//! );
//! map.insert(&obs);
//!
//! let region = Aabb::new(Point3::new(0.9, -0.1, 0.4), Point3::new(1.1, 0.1, 0.6));
//! assert_eq!(map.query_obstacles(&region).len(), 1);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use reach_types::{Point3, Pose2};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::geometry::{Aabb, VoxelKey, ray_voxels};
use crate::instance::{Evidence, Instance, InstanceId, InstanceTable};
use crate::observation::Observation;

/// Confidence of a cell nobody has observed.
pub const PRIOR: f32 = 0.5;

/// Number of bearing sectors used to break frontier ties.
pub const SECTORS: usize = 8;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Fusion, decay and association constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelMapConfig {
    /// Edge length of a voxel (metres).
    pub resolution: f32,
    pub w_hit: f32,
    pub w_miss: f32,
    pub ceiling: f32,
    pub floor: f32,
    /// Distance to ceiling/floor under which the confidence snaps onto it.
    pub saturation_epsilon: f32,
    pub occupied_threshold: f32,
    pub free_threshold: f32,
    pub staleness_secs: f64,
    /// Fraction of the distance to 0.5 recovered per `decay` call.
    pub decay_rate: f32,
    pub merge_overlap: f32,
    pub merge_feature_similarity: f32,
    /// Points farther than this from the sensor are ignored.
    pub max_ray_length: f32,
    /// Height band projected when computing frontiers.
    pub frontier_min_z: f32,
    pub frontier_max_z: f32,
    /// Visits remembered for frontier tie-breaking.
    pub visit_history: usize,
}

impl Default for VoxelMapConfig {
    fn default() -> Self {
        Self {
            resolution: 0.05,
            w_hit: 0.35,
            w_miss: 0.3,
            ceiling: 0.97,
            floor: 0.12,
            saturation_epsilon: 1e-3,
            occupied_threshold: 0.65,
            free_threshold: 0.35,
            staleness_secs: 30.0,
            decay_rate: 0.1,
            merge_overlap: 0.3,
            merge_feature_similarity: 0.8,
            max_ray_length: 6.0,
            frontier_min_z: 0.1,
            frontier_max_z: 1.5,
            visit_history: 256,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cells
// ────────────────────────────────────────────────────────────────────────────

/// Evidence held for one voxel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelCell {
    pub occupancy: f32,
    pub last_seen: DateTime<Utc>,
    pub instances: BTreeSet<InstanceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellClass {
    Occupied,
    Free,
    Unknown,
}

/// Counters returned by [`VoxelMap::insert`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertSummary {
    pub hits: usize,
    pub misses: usize,
    pub skipped_points: usize,
    pub instances: Vec<InstanceId>,
}

/// A free column on the boundary of unexplored space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frontier {
    pub column: [i32; 2],
    /// Column centre at the bottom of the frontier band.
    pub position: Point3,
    pub distance: f32,
    pub sector: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct Visit {
    pub pose: Pose2,
    pub at: DateTime<Utc>,
}

/// Summary counts, e.g. for a CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStats {
    pub cells: usize,
    pub occupied: usize,
    pub free: usize,
    pub unknown: usize,
    pub instances: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// VoxelMap
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VoxelMap {
    pub(crate) cfg: VoxelMapConfig,
    pub(crate) cells: HashMap<VoxelKey, VoxelCell>,
    pub(crate) table: InstanceTable,
    pub(crate) visits: VecDeque<Visit>,
}

impl VoxelMap {
    pub fn new(cfg: VoxelMapConfig) -> Self {
        Self {
            cfg,
            cells: HashMap::new(),
            table: InstanceTable::default(),
            visits: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &VoxelMapConfig {
        &self.cfg
    }

    pub fn resolution(&self) -> f32 {
        self.cfg.resolution
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn key_of(&self, p: Point3) -> VoxelKey {
        VoxelKey::containing(p, self.cfg.resolution)
    }

    pub fn cell(&self, key: &VoxelKey) -> Option<&VoxelCell> {
        self.cells.get(key)
    }

    pub fn occupancy(&self, key: &VoxelKey) -> f32 {
        self.cells.get(key).map_or(PRIOR, |c| c.occupancy)
    }

    pub fn classify(&self, key: &VoxelKey) -> CellClass {
        self.classify_confidence(self.occupancy(key))
    }

    pub fn classify_confidence(&self, c: f32) -> CellClass {
        if c >= self.cfg.occupied_threshold {
            CellClass::Occupied
        } else if c <= self.cfg.free_threshold {
            CellClass::Free
        } else {
            CellClass::Unknown
        }
    }

    /// Iterate every stored cell.
    pub fn cells(&self) -> impl Iterator<Item = (&VoxelKey, &VoxelCell)> {
        self.cells.iter()
    }

    // ── Fusion ───────────────────────────────────────────────────────────────

    /// Fuse one observation.
    ///
    /// Cells between the source and each point receive miss evidence, the
    /// cell holding the point receives hit evidence. A cell is updated at
    /// most once per observation and a hit wins over a miss. Labelled points
    /// are then associated with instances.
    pub fn insert(&mut self, obs: &Observation) -> InsertSummary {
        let res = self.cfg.resolution;
        let mut summary = InsertSummary::default();
        let mut hits: HashMap<VoxelKey, Vec<usize>> = HashMap::new();
        let mut misses: HashSet<VoxelKey> = HashSet::new();
        let mut ray = Vec::new();

        for (i, p) in obs.points.iter().enumerate() {
            let finite = p.x.is_finite() && p.y.is_finite() && p.z.is_finite();
            if !finite || p.distance_to(&obs.source) > self.cfg.max_ray_length {
                summary.skipped_points += 1;
                continue;
            }
            hits.entry(VoxelKey::containing(*p, res)).or_default().push(i);
            ray.clear();
            ray_voxels(obs.source, *p, res, &mut ray);
            misses.extend(ray.iter().copied());
        }
        misses.retain(|k| !hits.contains_key(k));

        for key in &misses {
            self.fuse(*key, false, obs.timestamp);
        }
        for key in hits.keys() {
            self.fuse(*key, true, obs.timestamp);
        }
        summary.hits = hits.len();
        summary.misses = misses.len();

        for det in &obs.detections {
            let members: Vec<usize> = obs
                .points_of(det.local_id)
                .filter(|i| hits.contains_key(&VoxelKey::containing(obs.points[*i], res)))
                .collect();
            let Some(extent) = Aabb::enclosing(members.iter().map(|&i| obs.points[i])) else {
                continue;
            };
            let cells: BTreeSet<VoxelKey> = members
                .iter()
                .map(|&i| VoxelKey::containing(obs.points[i], res))
                .collect();
            let evidence = Evidence {
                category: &det.category,
                cells: cells.clone(),
                extent,
                points: members.len() as u64,
                embedding: det.embedding.as_deref(),
                timestamp: obs.timestamp,
            };
            let id = self.table.associate(
                evidence,
                self.cfg.merge_overlap,
                self.cfg.merge_feature_similarity,
                res,
            );
            for key in cells {
                if let Some(cell) = self.cells.get_mut(&key) {
                    cell.instances.insert(id);
                }
            }
            summary.instances.push(id);
        }

        trace!(hits = summary.hits, misses = summary.misses, "fused observation");
        summary
    }

    fn fuse(&mut self, key: VoxelKey, hit: bool, at: DateTime<Utc>) {
        let cfg = &self.cfg;
        let cell = self.cells.entry(key).or_insert_with(|| VoxelCell {
            occupancy: PRIOR,
            last_seen: at,
            instances: BTreeSet::new(),
        });
        let c = cell.occupancy;
        let mut next = if hit {
            c + cfg.w_hit * (cfg.ceiling - c)
        } else {
            c - cfg.w_miss * (c - cfg.floor)
        };
        if cfg.ceiling - next < cfg.saturation_epsilon {
            next = cfg.ceiling;
        } else if next - cfg.floor < cfg.saturation_epsilon {
            next = cfg.floor;
        }
        cell.occupancy = next;
        cell.last_seen = cell.last_seen.max(at);
    }

    /// Relax cells unseen for longer than the staleness threshold towards
    /// unknown. Stale cells that land in the unknown band and carry no
    /// instance are dropped. Returns the number of cells dropped.
    pub fn decay(&mut self, now: DateTime<Utc>) -> usize {
        let staleness = chrono::Duration::milliseconds((self.cfg.staleness_secs * 1000.0) as i64);
        let (rate, eps) = (self.cfg.decay_rate, self.cfg.saturation_epsilon);
        let (occ, free) = (self.cfg.occupied_threshold, self.cfg.free_threshold);
        let before = self.cells.len();
        self.cells.retain(|_, cell| {
            if now - cell.last_seen <= staleness {
                return true;
            }
            let mut c = cell.occupancy + rate * (PRIOR - cell.occupancy);
            if (c - PRIOR).abs() < eps {
                c = PRIOR;
            }
            cell.occupancy = c;
            let unknown = c > free && c < occ;
            !(unknown && cell.instances.is_empty())
        });
        let dropped = before - self.cells.len();
        if dropped > 0 {
            debug!(dropped, remaining = self.cells.len(), "decayed stale cells");
        }
        dropped
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Occupied cells whose centre lies in `region`, sorted by key.
    pub fn query_obstacles(&self, region: &Aabb) -> Vec<VoxelKey> {
        let res = self.cfg.resolution;
        let mut out: Vec<VoxelKey> = self
            .cells
            .iter()
            .filter(|(k, c)| {
                self.classify_confidence(c.occupancy) == CellClass::Occupied
                    && region.contains_point(k.centre(res))
            })
            .map(|(k, _)| *k)
            .collect();
        out.sort_unstable();
        out
    }

    pub fn query_instance(&self, id: InstanceId) -> Option<&Instance> {
        self.table.instances.get(&id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.table.instances.values()
    }

    pub fn instances_of<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Instance> + 'a {
        self.instances().filter(move |i| i.category == category)
    }

    /// Project the cells whose centre lies in `[min_z, max_z]` onto the
    /// ground plane. A column is occupied when any of its cells reaches
    /// `obstacle_threshold`, free when it holds free cells and none are
    /// occupied. Columns absent from the result are unknown.
    pub fn project_columns(
        &self,
        min_z: f32,
        max_z: f32,
        obstacle_threshold: f32,
    ) -> HashMap<[i32; 2], CellClass> {
        let res = self.cfg.resolution;
        let mut columns: HashMap<[i32; 2], CellClass> = HashMap::new();
        for (key, cell) in &self.cells {
            let z = key.centre(res).z;
            if z < min_z || z > max_z {
                continue;
            }
            let class = if cell.occupancy >= obstacle_threshold {
                CellClass::Occupied
            } else {
                self.classify_confidence(cell.occupancy)
            };
            let slot = columns.entry(key.column()).or_insert(CellClass::Unknown);
            *slot = match (*slot, class) {
                (CellClass::Occupied, _) | (_, CellClass::Occupied) => CellClass::Occupied,
                (CellClass::Free, _) | (_, CellClass::Free) => CellClass::Free,
                _ => CellClass::Unknown,
            };
        }
        columns.retain(|_, c| *c != CellClass::Unknown);
        columns
    }

    /// Free columns bordering both free and unknown space, nearest first.
    ///
    /// Distances are compared in whole voxels; ties go to the bearing sector
    /// the robot visited least recently, never-visited first.
    pub fn query_frontier(&self, pose: &Pose2) -> Vec<Frontier> {
        let res = self.cfg.resolution;
        let columns = self.project_columns(
            self.cfg.frontier_min_z,
            self.cfg.frontier_max_z,
            self.cfg.occupied_threshold,
        );
        let class = |c: [i32; 2]| columns.get(&c).copied().unwrap_or(CellClass::Unknown);
        let sector_age = self.sector_last_visits(pose);

        let mut frontier: Vec<(i64, Option<DateTime<Utc>>, Frontier)> = columns
            .iter()
            .filter(|(_, c)| **c == CellClass::Free)
            .filter_map(|(&col, _)| {
                let around = [[1, 0], [-1, 0], [0, 1], [0, -1]]
                    .map(|[dx, dy]| class([col[0] + dx, col[1] + dy]));
                let touches_unknown = around.contains(&CellClass::Unknown);
                let touches_free = around.contains(&CellClass::Free);
                (touches_unknown && touches_free).then_some(col)
            })
            .map(|col| {
                let x = (col[0] as f32 + 0.5) * res;
                let y = (col[1] as f32 + 0.5) * res;
                let distance = ((x - pose.x).powi(2) + (y - pose.y).powi(2)).sqrt();
                let sector = sector_of(pose.bearing_to(x, y));
                let f = Frontier {
                    column: col,
                    position: Point3::new(x, y, self.cfg.frontier_min_z),
                    distance,
                    sector,
                };
                ((distance / res).round() as i64, sector_age[sector], f)
            })
            .collect();
        frontier.sort_by(|a, b| (a.0, a.1, a.2.column).cmp(&(b.0, b.1, b.2.column)));
        frontier.into_iter().map(|(_, _, f)| f).collect()
    }

    /// Remember that the robot was at `pose` at `at`.
    pub fn record_visit(&mut self, pose: Pose2, at: DateTime<Utc>) {
        self.visits.push_back(Visit { pose, at });
        while self.visits.len() > self.cfg.visit_history {
            self.visits.pop_front();
        }
    }

    /// Most recent visit time per bearing sector as seen from `pose`.
    fn sector_last_visits(&self, pose: &Pose2) -> [Option<DateTime<Utc>>; SECTORS] {
        let mut out = [None; SECTORS];
        for v in &self.visits {
            if pose.distance_to(&v.pose) < self.cfg.resolution {
                continue;
            }
            let s = sector_of(pose.bearing_to(v.pose.x, v.pose.y));
            out[s] = out[s].max(Some(v.at));
        }
        out
    }

    pub fn stats(&self) -> MapStats {
        let mut stats = MapStats {
            cells: self.cells.len(),
            instances: self.table.instances.len(),
            ..Default::default()
        };
        for cell in self.cells.values() {
            match self.classify_confidence(cell.occupancy) {
                CellClass::Occupied => stats.occupied += 1,
                CellClass::Free => stats.free += 1,
                CellClass::Unknown => stats.unknown += 1,
            }
        }
        stats
    }
}

fn sector_of(bearing: f32) -> usize {
    let turn = bearing.rem_euclid(std::f32::consts::TAU) / std::f32::consts::TAU;
    ((turn * SECTORS as f32) as usize).min(SECTORS - 1)
}
