//! Static box world used by the simulator to render depth and to decide
//! whether a closing gripper has something between its fingers.

use reach_types::Point3;

/// An axis-aligned solid, optionally carrying a semantic label.
#[derive(Debug, Clone, PartialEq)]
pub struct SimBox {
    pub min: Point3,
    pub max: Point3,
    pub label: Option<String>,
}

impl SimBox {
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max, label: None }
    }

    pub fn labelled(min: Point3, max: Point3, label: impl Into<String>) -> Self {
        Self { min, max, label: Some(label.into()) }
    }

    pub fn centre(&self) -> Point3 {
        (self.min + self.max) * 0.5
    }

    /// Smallest horizontal width; what the fingers close onto.
    pub fn grip_width(&self) -> f32 {
        (self.max.x - self.min.x).min(self.max.y - self.min.y)
    }

    /// Slab test. Returns the entry parameter along `origin + t * dir`.
    fn intersect(&self, origin: Point3, dir: Point3) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;
        for (o, d, lo, hi) in [
            (origin.x, dir.x, self.min.x, self.max.x),
            (origin.y, dir.y, self.min.y, self.max.y),
            (origin.z, dir.z, self.min.z, self.max.z),
        ] {
            if d.abs() < 1e-9 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let (mut t0, mut t1) = ((lo - o) / d, (hi - o) / d);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }

    fn distance_to(&self, p: Point3) -> f32 {
        let dx = (self.min.x - p.x).max(0.0).max(p.x - self.max.x);
        let dy = (self.min.y - p.y).max(0.0).max(p.y - self.max.y);
        let dz = (self.min.z - p.z).max(0.0).max(p.z - self.max.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// A collection of boxes. Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct SimWorld {
    boxes: Vec<SimBox>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_box(mut self, b: SimBox) -> Self {
        self.boxes.push(b);
        self
    }

    pub fn boxes(&self) -> &[SimBox] {
        &self.boxes
    }

    /// A walled 6 m x 6 m room centred on the origin with a table carrying a
    /// cup at `(2, 0)` and a crate in the opposite corner.
    pub fn demo_room() -> Self {
        let h = 2.0;
        let (lo, hi, t) = (-3.0, 3.0, 0.1);
        SimWorld::new()
            .with_box(SimBox::new(Point3::new(lo, lo - t, 0.0), Point3::new(hi, lo, h)))
            .with_box(SimBox::new(Point3::new(lo, hi, 0.0), Point3::new(hi, hi + t, h)))
            .with_box(SimBox::new(Point3::new(lo - t, lo, 0.0), Point3::new(lo, hi, h)))
            .with_box(SimBox::new(Point3::new(hi, lo, 0.0), Point3::new(hi + t, hi, h)))
            .with_box(SimBox::labelled(
                Point3::new(1.8, -0.4, 0.0),
                Point3::new(2.4, 0.4, 0.75),
                "table",
            ))
            .with_box(SimBox::labelled(
                Point3::new(1.86, -0.04, 0.75),
                Point3::new(1.94, 0.04, 0.87),
                "cup",
            ))
            .with_box(SimBox::labelled(
                Point3::new(-2.5, -2.5, 0.0),
                Point3::new(-1.9, -1.9, 0.5),
                "crate",
            ))
    }

    /// Nearest hit along `origin + t * dir` with `t <= max_t`, as
    /// `(t, box index)`.
    pub fn raycast(&self, origin: Point3, dir: Point3, max_t: f32) -> Option<(f32, usize)> {
        self.boxes
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.intersect(origin, dir).map(|t| (t, i)))
            .filter(|(t, _)| *t <= max_t)
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }

    /// The labelled box closest to `p`, if one lies within `radius`.
    pub fn graspable_near(&self, p: Point3, radius: f32) -> Option<&SimBox> {
        self.boxes
            .iter()
            .filter(|b| b.label.is_some() && b.grip_width() < 0.15)
            .map(|b| (b.distance_to(p), b))
            .filter(|(d, _)| *d <= radius)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, b)| b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_hits_nearest_box() {
        let world = SimWorld::demo_room();
        let hit = world.raycast(Point3::new(0.0, 0.0, 0.5), Point3::new(1.0, 0.0, 0.0), 10.0);
        let (t, idx) = hit.expect("table is in front");
        assert!((t - 1.8).abs() < 1e-4);
        assert_eq!(world.boxes()[idx].label.as_deref(), Some("table"));
    }

    #[test]
    fn ray_respects_max_range() {
        let world = SimWorld::demo_room();
        let hit = world.raycast(Point3::new(0.0, 0.0, 0.5), Point3::new(1.0, 0.0, 0.0), 1.0);
        assert!(hit.is_none());
    }

    #[test]
    fn only_small_labelled_boxes_are_graspable() {
        let world = SimWorld::demo_room();
        let cup = world.graspable_near(Point3::new(1.8, 0.0, 0.8), 0.15);
        assert_eq!(cup.and_then(|b| b.label.as_deref()), Some("cup"));
        assert!(world.graspable_near(Point3::new(2.1, 0.0, 0.7), 0.02).is_none());
    }
}
