//! Generic `Camera` trait plus a ray-cast RGB-D camera over a [`SimWorld`].

use std::sync::Arc;

use chrono::Utc;
use reach_types::{CameraIntrinsics, CameraPose, ImageFrame, ReachError};

use crate::world::SimWorld;

/// A depth camera mounted on the robot head.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"head_rgbd"`.
    fn id(&self) -> &str;

    /// Capture the next frame as seen from `pose`.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::HardwareFault`] if the frame cannot be captured.
    fn capture(&mut self, pose: &CameraPose) -> Result<ImageFrame, ReachError>;
}

/// Camera that renders depth and a flat-shaded colour image by ray casting
/// into a [`SimWorld`].
pub struct SimCamera {
    id: String,
    world: Arc<SimWorld>,
    width: u32,
    height: u32,
    intrinsics: CameraIntrinsics,
    max_range: f32,
    seq: u64,
}

impl SimCamera {
    /// 48 x 36 pixels with a 60° horizontal field of view and a 4 m range.
    pub fn new(id: impl Into<String>, world: Arc<SimWorld>) -> Self {
        let (width, height) = (48u32, 36u32);
        let fx = (width as f32 / 2.0) / (30f32).to_radians().tan();
        Self {
            id: id.into(),
            world,
            width,
            height,
            intrinsics: CameraIntrinsics {
                fx,
                fy: fx,
                cx: (width as f32 - 1.0) / 2.0,
                cy: (height as f32 - 1.0) / 2.0,
            },
            max_range: 4.0,
            seq: 0,
        }
    }

    pub fn with_max_range(mut self, max_range: f32) -> Self {
        self.max_range = max_range;
        self
    }

    pub fn intrinsics(&self) -> CameraIntrinsics {
        self.intrinsics
    }

    /// Index of the box seen at every pixel (row-major), `None` where the
    /// ray escapes. Serves as ground-truth segmentation for the simulator.
    pub fn render_hits(&self, pose: &CameraPose) -> Vec<Option<(f32, usize)>> {
        render_hits(&self.world, pose, &self.intrinsics, self.width, self.height, self.max_range)
    }
}

/// Ray-cast every pixel of a `width` x `height` image into `world`.
pub fn render_hits(
    world: &SimWorld,
    pose: &CameraPose,
    k: &CameraIntrinsics,
    width: u32,
    height: u32,
    max_range: f32,
) -> Vec<Option<(f32, usize)>> {
    let mut out = Vec::with_capacity((width * height) as usize);
    for v in 0..height {
        for u in 0..width {
            let ray = pose.pixel_ray(k, u as f32, v as f32);
            out.push(world.raycast(pose.position, ray, max_range));
        }
    }
    out
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self, pose: &CameraPose) -> Result<ImageFrame, ReachError> {
        let hits = self.render_hits(pose);
        let mut depth = Vec::with_capacity(hits.len());
        let mut rgb = Vec::with_capacity(hits.len() * 3);
        for hit in &hits {
            match hit {
                Some((t, idx)) => {
                    depth.push(*t);
                    let shade = match self.world.boxes()[*idx].label {
                        Some(_) => [200, 60, 40],
                        None => [128, 128, 128],
                    };
                    rgb.extend_from_slice(&shade);
                }
                None => {
                    depth.push(0.0);
                    rgb.extend_from_slice(&[0, 0, 0]);
                }
            }
        }
        self.seq += 1;
        Ok(ImageFrame {
            seq: self.seq,
            timestamp: Utc::now(),
            width: self.width,
            height: self.height,
            rgb,
            depth,
            intrinsics: self.intrinsics,
            camera_pose: *pose,
        })
    }
}
