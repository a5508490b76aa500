//! Feeds camera frames from the Robot Client into the shared voxel map.
//!
//! The updater runs as its own task for the lifetime of a task run. Each
//! frame is back-projected, optionally segmented, and fused on the blocking
//! pool so that a slow insert never stalls telemetry or command handling.
//! When the updater falls behind, the frame stream drops the oldest frames.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reach_hal::SimWorld;
use reach_hal::camera::render_hits;
use reach_middleware::RobotClient;
use reach_perception::{Detection, Observation, Segmentation, Segmenter, SharedVoxelMap};
use reach_types::{ImageFrame, ReachError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often stale cells are decayed.
const DECAY_PERIOD: Duration = Duration::from_secs(1);

/// Counters reported when the updater stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdaterStats {
    pub frames: u64,
    pub points: u64,
    pub instances: u64,
    /// Frames the stream discarded because the updater lagged.
    pub dropped: u64,
}

pub struct MapUpdater {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<UpdaterStats>,
}

impl MapUpdater {
    /// Start consuming `client`'s frame stream. Every `stride`-th pixel is
    /// back-projected.
    pub fn spawn(
        client: &RobotClient,
        map: SharedVoxelMap,
        segmenter: Option<Box<dyn Segmenter>>,
        stride: u32,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(run(client.clone(), map, segmenter, stride, rx));
        Self { shutdown, task }
    }

    /// Stop after the frame in progress and report what was fused.
    pub async fn stop(self) -> UpdaterStats {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "map updater task ended abnormally");
                UpdaterStats::default()
            }
        }
    }
}

async fn run(
    client: RobotClient,
    map: SharedVoxelMap,
    mut segmenter: Option<Box<dyn Segmenter>>,
    stride: u32,
    mut shutdown: watch::Receiver<bool>,
) -> UpdaterStats {
    let mut frames = client.stream_images();
    let mut stats = UpdaterStats::default();
    let mut last_decay = tokio::time::Instant::now();
    info!(stride, segmented = segmenter.is_some(), "map updater started");

    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = frames.next() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let pose = client.get_state().map(|s| s.base_pose);
        let job_map = map.clone();
        let job = tokio::task::spawn_blocking(move || {
            let result = fuse_frame(&job_map, &frame, segmenter.as_deref_mut(), stride);
            (segmenter, result)
        });
        let result = match job.await {
            Ok((returned, result)) => {
                segmenter = returned;
                result
            }
            Err(e) => {
                warn!(error = %e, "frame fusion panicked, updater stopping");
                break;
            }
        };
        match result {
            Ok((points, instances)) => {
                stats.frames += 1;
                stats.points += points as u64;
                stats.instances += instances as u64;
            }
            Err(e) => warn!(error = %e, "frame skipped"),
        }
        if let Some(pose) = pose {
            map.record_visit(pose, Utc::now());
        }
        if last_decay.elapsed() >= DECAY_PERIOD {
            let dropped = map.decay(Utc::now());
            if dropped > 0 {
                debug!(dropped, "stale cells forgotten");
            }
            last_decay = tokio::time::Instant::now();
        }
    }

    stats.dropped = frames.dropped();
    info!(frames = stats.frames, points = stats.points, dropped = stats.dropped, "map updater stopped");
    stats
}

fn fuse_frame(
    map: &SharedVoxelMap,
    frame: &ImageFrame,
    segmenter: Option<&mut (dyn Segmenter + 'static)>,
    stride: u32,
) -> Result<(usize, usize), ReachError> {
    let obs = match segmenter {
        Some(seg) => {
            let segmentation = seg.segment(frame)?;
            Observation::from_segmented_frame(frame, stride, &segmentation)
        }
        None => Observation::from_depth_frame(frame, stride),
    };
    if obs.is_empty() {
        return Ok((0, 0));
    }
    let summary = map.insert(&obs);
    Ok((obs.len() - summary.skipped_points, summary.instances.len()))
}

/// Segmenter that reads object labels straight out of a simulated world.
///
/// Every pixel is ray-cast against the scene; pixels landing on a labelled
/// box are tagged with that box, which becomes one detection per frame.
pub struct GroundTruthSegmenter {
    world: Arc<SimWorld>,
    max_range: f32,
}

impl GroundTruthSegmenter {
    pub fn new(world: Arc<SimWorld>) -> Self {
        Self { world, max_range: 4.0 }
    }

    /// Must match the camera's range so labels line up with depth returns.
    pub fn with_max_range(mut self, max_range: f32) -> Self {
        self.max_range = max_range;
        self
    }
}

impl Segmenter for GroundTruthSegmenter {
    fn segment(&mut self, frame: &ImageFrame) -> Result<Segmentation, ReachError> {
        let hits = render_hits(
            &self.world,
            &frame.camera_pose,
            &frame.intrinsics,
            frame.width,
            frame.height,
            self.max_range,
        );
        let boxes = self.world.boxes();
        let mut detections: Vec<Detection> = Vec::new();
        let labels = hits
            .iter()
            .map(|hit| {
                let (_, idx) = (*hit)?;
                let category = boxes.get(idx)?.label.as_ref()?;
                let local_id = idx as u32;
                if !detections.iter().any(|d| d.local_id == local_id) {
                    detections.push(Detection { local_id, category: category.clone(), embedding: None });
                }
                Some(local_id)
            })
            .collect();
        Ok(Segmentation { labels, detections })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sim_context;
    use reach_hal::{Camera, SimCamera};
    use reach_types::{CameraPose, Point3};

    #[test]
    fn ground_truth_labels_the_cup_and_table() -> Result<(), ReachError> {
        let world = Arc::new(SimWorld::demo_room());
        let mut cam = SimCamera::new("head", Arc::clone(&world));
        let frame = cam.capture(&CameraPose { position: Point3::new(1.0, 0.0, 1.2), yaw: 0.0, pitch: -0.6 })?;
        let seg = GroundTruthSegmenter::new(world).segment(&frame)?;
        assert_eq!(seg.labels.len(), frame.depth.len());
        let mut categories: Vec<&str> = seg.detections.iter().map(|d| d.category.as_str()).collect();
        categories.sort_unstable();
        assert_eq!(categories, vec!["cup", "table"]);
        // Background pixels carry no label.
        for (label, depth) in seg.labels.iter().zip(&frame.depth) {
            if *depth == 0.0 {
                assert!(label.is_none());
            }
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fuses_streamed_frames_until_stopped() -> Result<(), Box<dyn std::error::Error>> {
        let (ctx, sim) = sim_context().await?;
        let updater = MapUpdater::spawn(
            &ctx.client,
            ctx.map.clone(),
            Some(Box::new(GroundTruthSegmenter::new(Arc::clone(&sim.world)))),
            2,
        );
        tokio::time::sleep(Duration::from_millis(600)).await;
        let stats = updater.stop().await;
        assert!(stats.frames > 0, "{stats:?}");
        assert!(stats.points > 0);

        let map = ctx.map.read();
        assert!(map.stats().occupied > 0);
        assert!(map.instances_of("table").next().is_some());
        Ok(())
    }
}
