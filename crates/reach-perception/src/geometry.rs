//! Integer voxel keys and axis-aligned boxes.

use reach_types::Point3;
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// VoxelKey
// ────────────────────────────────────────────────────────────────────────────

/// Integer coordinate of a voxel at a fixed resolution.
///
/// Voxel `(i, j, k)` covers `[i·r, (i+1)·r) × [j·r, (j+1)·r) × [k·r, (k+1)·r)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoxelKey {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelKey {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The voxel containing `p`.
    pub fn containing(p: Point3, resolution: f32) -> Self {
        Self {
            x: (p.x / resolution).floor() as i32,
            y: (p.y / resolution).floor() as i32,
            z: (p.z / resolution).floor() as i32,
        }
    }

    /// Centre of the voxel in world coordinates.
    pub fn centre(&self, resolution: f32) -> Point3 {
        Point3::new(
            (self.x as f32 + 0.5) * resolution,
            (self.y as f32 + 0.5) * resolution,
            (self.z as f32 + 0.5) * resolution,
        )
    }

    /// World-space box covered by the voxel.
    pub fn bounds(&self, resolution: f32) -> Aabb {
        let min = Point3::new(
            self.x as f32 * resolution,
            self.y as f32 * resolution,
            self.z as f32 * resolution,
        );
        Aabb::new(min, min + Point3::new(resolution, resolution, resolution))
    }

    pub fn column(&self) -> [i32; 2] {
        [self.x, self.y]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3,
    pub max: Point3,
}

impl Aabb {
    /// Create a bounding box from two opposite corners, normalised so that
    /// `min ≤ max` per axis.
    pub fn new(a: Point3, b: Point3) -> Self {
        Self {
            min: Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Degenerate box around a single point.
    pub fn point(p: Point3) -> Self {
        Self { min: p, max: p }
    }

    pub fn centre(&self) -> Point3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Point3 {
        self.max - self.min
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains_point(&self, p: Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// True when `other` overlaps (intersects or touches) this box.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: Point3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    pub fn expanded(&self, margin: f32) -> Aabb {
        let m = Point3::new(margin, margin, margin);
        Aabb { min: self.min - m, max: self.max + m }
    }

    /// Planar distance from `(x, y)` to the box footprint; zero inside.
    pub fn planar_distance(&self, x: f32, y: f32) -> f32 {
        let dx = (self.min.x - x).max(0.0).max(x - self.max.x);
        let dy = (self.min.y - y).max(0.0).max(y - self.max.y);
        (dx * dx + dy * dy).sqrt()
    }

    /// Bounding box of a non-empty point set.
    pub fn enclosing(points: impl IntoIterator<Item = Point3>) -> Option<Aabb> {
        points
            .into_iter()
            .map(Aabb::point)
            .reduce(|acc, b| acc.union(&b))
    }
}

/// Voxels crossed by the segment `from → to`, excluding the voxel that
/// contains `to`. 3-D DDA (Amanatides & Woo).
pub fn ray_voxels(from: Point3, to: Point3, resolution: f32, out: &mut Vec<VoxelKey>) {
    let start = VoxelKey::containing(from, resolution);
    let end = VoxelKey::containing(to, resolution);
    let origin = [from.x, from.y, from.z];
    let delta = [to.x - from.x, to.y - from.y, to.z - from.z];
    let mut cell = [start.x, start.y, start.z];
    let target = [end.x, end.y, end.z];

    let mut step = [0i32; 3];
    let mut t_max = [f32::INFINITY; 3];
    let mut t_delta = [f32::INFINITY; 3];
    for axis in 0..3 {
        let d = delta[axis];
        if d > 0.0 {
            step[axis] = 1;
            t_max[axis] = ((cell[axis] + 1) as f32 * resolution - origin[axis]) / d;
            t_delta[axis] = resolution / d;
        } else if d < 0.0 {
            step[axis] = -1;
            t_max[axis] = (cell[axis] as f32 * resolution - origin[axis]) / d;
            t_delta[axis] = -resolution / d;
        }
    }

    let budget: i32 = (0..3).map(|a| (target[a] - cell[a]).abs()).sum::<i32>() + 1;
    for _ in 0..budget {
        if cell == target {
            return;
        }
        out.push(VoxelKey::new(cell[0], cell[1], cell[2]));
        let axis = if t_max[0] <= t_max[1] && t_max[0] <= t_max[2] {
            0
        } else if t_max[1] <= t_max[2] {
            1
        } else {
            2
        };
        if t_max[axis] > 1.0 {
            return;
        }
        cell[axis] += step[axis];
        t_max[axis] += t_delta[axis];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containing_floors_negative_coordinates() {
        let k = VoxelKey::containing(Point3::new(-0.01, 0.0, 0.049), 0.05);
        assert_eq!(k, VoxelKey::new(-1, 0, 0));
    }

    #[test]
    fn ray_walks_straight_line_of_cells() {
        let mut cells = Vec::new();
        ray_voxels(Point3::new(0.025, 0.025, 0.025), Point3::new(0.275, 0.025, 0.025), 0.05, &mut cells);
        let xs: Vec<i32> = cells.iter().map(|k| k.x).collect();
        assert_eq!(xs, vec![0, 1, 2, 3, 4]);
        assert!(cells.iter().all(|k| k.y == 0 && k.z == 0));
    }

    #[test]
    fn diagonal_ray_is_face_connected() {
        let mut cells = Vec::new();
        ray_voxels(Point3::new(0.01, 0.02, 0.03), Point3::new(0.43, -0.31, 0.22), 0.05, &mut cells);
        for pair in cells.windows(2) {
            let d = (pair[0].x - pair[1].x).abs() + (pair[0].y - pair[1].y).abs() + (pair[0].z - pair[1].z).abs();
            assert_eq!(d, 1);
        }
        assert!(!cells.contains(&VoxelKey::containing(Point3::new(0.43, -0.31, 0.22), 0.05)));
    }

    #[test]
    fn union_and_planar_distance() {
        let a = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let b = Aabb::point(Point3::new(2.0, -1.0, 0.5));
        let u = a.union(&b);
        assert_eq!(u.max.x, 2.0);
        assert_eq!(u.min.y, -1.0);
        assert_eq!(a.planar_distance(0.5, 0.5), 0.0);
        assert!((a.planar_distance(2.0, 0.5) - 1.0).abs() < 1e-6);
    }
}
