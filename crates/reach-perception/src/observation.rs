//! Observations: the transient unit of evidence fused into the voxel map.
//!
//! An [`Observation`] is a batch of world-frame points taken from one sensor
//! origin at one instant, optionally labelled with instance [`Detection`]s.
//! Depth frames are back-projected with [`Observation::from_depth_frame`];
//! attaching semantics is the job of a [`Segmenter`], which the map treats
//! as a black box.

use chrono::{DateTime, Utc};
use reach_types::{ImageFrame, Point3, ReachError};

/// One object hypothesis inside a single observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Identifier local to the observation; points refer to it via labels.
    pub local_id: u32,
    pub category: String,
    /// Appearance feature vector, if the segmenter provides one.
    pub embedding: Option<Vec<f32>>,
}

/// Per-pixel output of a [`Segmenter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    /// Row-major, `width × height`; `None` for background.
    pub labels: Vec<Option<u32>>,
    pub detections: Vec<Detection>,
}

/// Attaches instance detections to a captured frame.
pub trait Segmenter: Send {
    fn segment(&mut self, frame: &ImageFrame) -> Result<Segmentation, ReachError>;
}

/// World-frame points observed from `source` at `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub points: Vec<Point3>,
    /// Same length as `points`; the detection each point belongs to.
    pub labels: Vec<Option<u32>>,
    pub detections: Vec<Detection>,
    pub source: Point3,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    /// Unlabelled point batch.
    pub fn new(source: Point3, points: Vec<Point3>, timestamp: DateTime<Utc>) -> Self {
        let labels = vec![None; points.len()];
        Self { points, labels, detections: Vec::new(), source, timestamp }
    }

    /// Attach labels and detections. Fails when the label count does not
    /// match the point count.
    pub fn with_labels(
        mut self,
        labels: Vec<Option<u32>>,
        detections: Vec<Detection>,
    ) -> Result<Self, ReachError> {
        if labels.len() != self.points.len() {
            return Err(ReachError::Serialization(format!(
                "{} labels for {} points",
                labels.len(),
                self.points.len()
            )));
        }
        self.labels = labels;
        self.detections = detections;
        Ok(self)
    }

    /// Back-project every `stride`-th pixel with a depth return.
    pub fn from_depth_frame(frame: &ImageFrame, stride: u32) -> Self {
        Self::back_project(frame, stride, None)
    }

    /// Back-project and carry the segmentation labels of each sampled pixel.
    pub fn from_segmented_frame(frame: &ImageFrame, stride: u32, seg: &Segmentation) -> Self {
        Self::back_project(frame, stride, Some(seg))
    }

    fn back_project(frame: &ImageFrame, stride: u32, seg: Option<&Segmentation>) -> Self {
        let stride = stride.max(1);
        let pose = &frame.camera_pose;
        let mut points = Vec::new();
        let mut labels = Vec::new();
        for v in (0..frame.height).step_by(stride as usize) {
            for u in (0..frame.width).step_by(stride as usize) {
                let Some(depth) = frame.depth_at(u, v).filter(|d| d.is_finite() && *d > 0.0) else {
                    continue;
                };
                let ray = pose.pixel_ray(&frame.intrinsics, u as f32, v as f32);
                points.push(pose.position + ray * depth);
                let idx = (v * frame.width + u) as usize;
                labels.push(seg.and_then(|s| s.labels.get(idx).copied().flatten()));
            }
        }
        let detections = match seg {
            Some(s) => s
                .detections
                .iter()
                .filter(|d| labels.contains(&Some(d.local_id)))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Self { points, labels, detections, source: pose.position, timestamp: frame.timestamp }
    }

    /// Indices of the points labelled with `local_id`.
    pub fn points_of(&self, local_id: u32) -> impl Iterator<Item = usize> + '_ {
        self.labels
            .iter()
            .enumerate()
            .filter_map(move |(i, l)| (*l == Some(local_id)).then_some(i))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
