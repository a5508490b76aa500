//! Camera frames streamed alongside telemetry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::Point3;

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

/// Camera placement in the world frame at capture time.
///
/// The optical axis points along `yaw` in the ground plane, tilted by
/// `pitch` (negative looks down).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: Point3,
    pub yaw: f32,
    pub pitch: f32,
}

impl CameraPose {
    /// Unit vector along the optical axis.
    pub fn forward(&self) -> Point3 {
        let (sp, cp) = self.pitch.sin_cos();
        let (sy, cy) = self.yaw.sin_cos();
        Point3::new(cp * cy, cp * sy, sp)
    }

    /// Unit vector pointing to the image's +u direction.
    pub fn right(&self) -> Point3 {
        let (sy, cy) = self.yaw.sin_cos();
        Point3::new(sy, -cy, 0.0)
    }

    /// Unit vector pointing to the image's -v direction.
    pub fn up(&self) -> Point3 {
        let (sp, cp) = self.pitch.sin_cos();
        let (sy, cy) = self.yaw.sin_cos();
        Point3::new(-sp * cy, -sp * sy, cp)
    }

    /// World-frame ray through pixel `(u, v)`, scaled so its optical-axis
    /// component is 1. Multiplying by a depth reading yields the world offset
    /// of the observed point from [`CameraPose::position`].
    pub fn pixel_ray(&self, k: &CameraIntrinsics, u: f32, v: f32) -> Point3 {
        let a = (u - k.cx) / k.fx;
        let b = (v - k.cy) / k.fy;
        self.forward() + self.right() * a - self.up() * b
    }
}

/// One RGB-D frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    /// Frame counter assigned by the camera driver.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Packed RGB24, `width * height * 3` bytes (may be empty for depth-only
    /// sensors).
    pub rgb: Vec<u8>,
    /// Depth in metres, `width * height` entries; `0.0` marks no return.
    pub depth: Vec<f32>,
    pub intrinsics: CameraIntrinsics,
    pub camera_pose: CameraPose,
}

impl ImageFrame {
    /// Depth at pixel `(u, v)`, if inside the image.
    pub fn depth_at(&self, u: u32, v: u32) -> Option<f32> {
        if u >= self.width || v >= self.height {
            return None;
        }
        self.depth.get((v * self.width + u) as usize).copied()
    }
}
