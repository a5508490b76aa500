//! Single-writer / many-reader handle to a [`VoxelMap`].
//!
//! Inserts take the write lock for the whole fusion of one observation, so a
//! reader holding [`SharedVoxelMap::read`] never sees a half-fused cell.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use reach_types::Pose2;

use crate::observation::Observation;
use crate::voxel::{InsertSummary, VoxelMap};

#[derive(Debug, Clone)]
pub struct SharedVoxelMap {
    inner: Arc<RwLock<VoxelMap>>,
}

impl SharedVoxelMap {
    pub fn new(map: VoxelMap) -> Self {
        Self { inner: Arc::new(RwLock::new(map)) }
    }

    /// Consistent read view; blocks while an insert is in progress.
    pub fn read(&self) -> RwLockReadGuard<'_, VoxelMap> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, VoxelMap> {
        self.inner.write()
    }

    pub fn insert(&self, obs: &Observation) -> InsertSummary {
        self.inner.write().insert(obs)
    }

    pub fn record_visit(&self, pose: Pose2, at: DateTime<Utc>) {
        self.inner.write().record_visit(pose, at);
    }

    pub fn decay(&self, now: DateTime<Utc>) -> usize {
        self.inner.write().decay(now)
    }

    /// Deep copy of the current map.
    pub fn snapshot(&self) -> VoxelMap {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Aabb;
    use crate::voxel::VoxelMapConfig;
    use reach_types::Point3;

    #[test]
    fn readers_see_whole_observations() {
        let shared = SharedVoxelMap::new(VoxelMap::new(VoxelMapConfig::default()));
        let region = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let writer = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for i in 0..20 {
                    let y = 0.05 * i as f32 + 0.01;
                    let points = (0..10).map(|j| Point3::new(0.05 * j as f32 + 0.01, y, 0.5)).collect();
                    // Looking straight down a single row keeps rays off other rows.
                    shared.insert(&Observation::new(Point3::new(0.25, y, 0.9), points, Utc::now()));
                }
            })
        };
        for _ in 0..50 {
            let n = shared.read().query_obstacles(&region).len();
            assert_eq!(n % 10, 0, "partial observation visible: {n}");
        }
        writer.join().expect("writer thread");
        assert_eq!(shared.read().query_obstacles(&region).len(), 200);
    }
}
