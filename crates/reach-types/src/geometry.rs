//! Planar poses and 3-D points.

use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};
use std::ops::{Add, Mul, Sub};

/// Wrap an angle into `(-π, π]`.
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Absolute shortest angular distance between `a` and `b` (radians).
pub fn angle_difference(a: f32, b: f32) -> f32 {
    wrap_angle(a - b).abs()
}

// ────────────────────────────────────────────────────────────────────────────
// Pose2
// ────────────────────────────────────────────────────────────────────────────

/// A mobile-base pose in the world frame: position in metres, heading in
/// radians measured counter-clockwise from +X.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose2 {
    pub x: f32,
    pub y: f32,
    pub theta: f32,
}

impl Pose2 {
    pub fn new(x: f32, y: f32, theta: f32) -> Self {
        Self { x, y, theta }
    }

    /// Planar Euclidean distance to `other`, ignoring heading.
    pub fn distance_to(&self, other: &Pose2) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Absolute heading error to `other`.
    pub fn heading_error(&self, other: &Pose2) -> f32 {
        angle_difference(self.theta, other.theta)
    }

    /// Apply `delta`, expressed in this pose's own frame.
    ///
    /// `Pose2::new(1.0, 0.0, 0.0)` applied to a robot facing +Y moves it one
    /// metre along +Y.
    pub fn compose(&self, delta: &Pose2) -> Pose2 {
        let (s, c) = self.theta.sin_cos();
        Pose2 {
            x: self.x + c * delta.x - s * delta.y,
            y: self.y + s * delta.x + c * delta.y,
            theta: wrap_angle(self.theta + delta.theta),
        }
    }

    /// Bearing from this pose's position towards `(x, y)`.
    pub fn bearing_to(&self, x: f32, y: f32) -> f32 {
        (y - self.y).atan2(x - self.x)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Point3
// ────────────────────────────────────────────────────────────────────────────

/// A point in 3-D world space (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Point3) -> f32 {
        (*self - *other).norm()
    }

    pub fn dot(&self, other: &Point3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn norm(&self) -> f32 {
        self.dot(self).sqrt()
    }
}

impl Add for Point3 {
    type Output = Point3;
    fn add(self, rhs: Point3) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3 {
    type Output = Point3;
    fn sub(self, rhs: Point3) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Point3 {
    type Output = Point3;
    fn mul(self, k: f32) -> Point3 {
        Point3::new(self.x * k, self.y * k, self.z * k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_angle_stays_in_range() {
        for raw in [-10.0f32, -PI, -1.0, 0.0, 1.0, PI, 7.5, 100.0] {
            let w = wrap_angle(raw);
            assert!(w > -PI - 1e-5 && w <= PI + 1e-5, "{raw} wrapped to {w}");
        }
        assert!((wrap_angle(TAU + 0.5) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn angle_difference_takes_short_way_round() {
        let d = angle_difference(PI - 0.1, -PI + 0.1);
        assert!((d - 0.2).abs() < 1e-4);
    }

    #[test]
    fn compose_applies_delta_in_local_frame() {
        let facing_y = Pose2::new(1.0, 1.0, PI / 2.0);
        let moved = facing_y.compose(&Pose2::new(1.0, 0.0, 0.0));
        assert!((moved.x - 1.0).abs() < 1e-5);
        assert!((moved.y - 2.0).abs() < 1e-5);
        assert!((moved.theta - PI / 2.0).abs() < 1e-5);
    }

    #[test]
    fn distance_ignores_heading() {
        let a = Pose2::new(0.0, 0.0, 0.0);
        let b = Pose2::new(3.0, 4.0, 2.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn point_arithmetic() {
        let p = Point3::new(1.0, 2.0, 2.0);
        assert!((p.norm() - 3.0).abs() < 1e-6);
        assert_eq!(p + p * 2.0 - p, Point3::new(2.0, 4.0, 4.0));
    }
}
