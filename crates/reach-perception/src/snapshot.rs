//! Versioned binary snapshots of a [`VoxelMap`].
//!
//! ```text
//! [Header]
//! - Magic:   "RVXM" (4 bytes)
//! - Version: u16 little-endian
//! [Body]
//! - bincode-encoded SnapshotBody
//! ```
//!
//! A snapshot whose version is newer than [`FORMAT_VERSION`] is refused with
//! [`ReachError::VersionMismatch`]; nothing is partially loaded.

use std::collections::VecDeque;
use std::path::Path;

use reach_types::ReachError;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::geometry::VoxelKey;
use crate::instance::InstanceTable;
use crate::voxel::{Visit, VoxelCell, VoxelMap, VoxelMapConfig};

const MAGIC: &[u8; 4] = b"RVXM";

/// Current snapshot format version.
pub const FORMAT_VERSION: u16 = 1;

/// Oldest version this build still reads.
pub const MIN_SUPPORTED_VERSION: u16 = 1;

const HEADER_LEN: usize = MAGIC.len() + 2;

#[derive(Serialize, Deserialize)]
struct SnapshotBody {
    config: VoxelMapConfig,
    cells: Vec<(VoxelKey, VoxelCell)>,
    instances: InstanceTable,
    visits: VecDeque<Visit>,
}

impl VoxelMap {
    /// Encode the full cell set and instance table.
    pub fn serialize(&self) -> Result<Vec<u8>, ReachError> {
        let mut cells: Vec<(VoxelKey, VoxelCell)> =
            self.cells.iter().map(|(k, c)| (*k, c.clone())).collect();
        cells.sort_unstable_by_key(|(k, _)| *k);
        let body = SnapshotBody {
            config: self.cfg.clone(),
            cells,
            instances: self.table.clone(),
            visits: self.visits.clone(),
        };
        let encoded = bincode::serialize(&body).map_err(|e| ReachError::Serialization(e.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + encoded.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&encoded);
        Ok(out)
    }

    /// Decode a snapshot produced by [`VoxelMap::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<VoxelMap, ReachError> {
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(ReachError::Serialization("not a voxel map snapshot".into()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if !(MIN_SUPPORTED_VERSION..=FORMAT_VERSION).contains(&version) {
            return Err(ReachError::VersionMismatch { found: version, supported: FORMAT_VERSION });
        }
        let body: SnapshotBody = bincode::deserialize(&bytes[HEADER_LEN..])
            .map_err(|e| ReachError::Serialization(e.to_string()))?;
        Ok(VoxelMap {
            cfg: body.config,
            cells: body.cells.into_iter().collect(),
            table: body.instances,
            visits: body.visits,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReachError> {
        let bytes = self.serialize()?;
        std::fs::write(path.as_ref(), &bytes)?;
        info!(path = %path.as_ref().display(), bytes = bytes.len(), cells = self.len(), "saved voxel map");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<VoxelMap, ReachError> {
        let bytes = std::fs::read(path.as_ref())?;
        let map = VoxelMap::deserialize(&bytes)?;
        info!(path = %path.as_ref().display(), cells = map.len(), "loaded voxel map");
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Aabb;
    use crate::observation::{Detection, Observation};
    use chrono::Utc;
    use reach_types::{Point3, Pose2};

    fn populated() -> VoxelMap {
        let mut map = VoxelMap::new(VoxelMapConfig::default());
        let points: Vec<Point3> = (0..50)
            .map(|i| Point3::new(1.0 + (i % 10) as f32 * 0.03, (i / 10) as f32 * 0.04, 0.7))
            .collect();
        let labels = (0..50).map(|i| (i < 20).then_some(1)).collect();
        let obs = Observation::new(Point3::new(0.0, 0.0, 1.2), points, Utc::now())
            .with_labels(
                labels,
                vec![Detection { local_id: 1, category: "cup".into(), embedding: Some(vec![0.2, 0.9]) }],
            )
            .expect("labels match points");
        map.insert(&obs);
        map.insert(&obs);
        map.record_visit(Pose2::new(0.0, 0.0, 0.0), Utc::now());
        map
    }

    #[test]
    fn round_trip_preserves_queries() -> Result<(), Box<dyn std::error::Error>> {
        let map = populated();
        let restored = VoxelMap::deserialize(&map.serialize()?)?;

        let regions = [
            Aabb::new(Point3::new(0.0, -1.0, 0.0), Point3::new(2.0, 1.0, 2.0)),
            Aabb::new(Point3::new(1.0, 0.0, 0.6), Point3::new(1.1, 0.1, 0.8)),
            Aabb::new(Point3::new(-3.0, -3.0, -3.0), Point3::new(-2.0, -2.0, -2.0)),
        ];
        for region in &regions {
            assert_eq!(map.query_obstacles(region), restored.query_obstacles(region));
        }
        for id in 0..3 {
            assert_eq!(map.query_instance(id), restored.query_instance(id));
        }
        assert_eq!(map.stats(), restored.stats());
        assert_eq!(map.visits, restored.visits);
        Ok(())
    }

    #[test]
    fn save_and_load_through_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("room.rvxm");
        let map = populated();
        map.save(&path)?;
        let loaded = VoxelMap::load(&path)?;
        assert_eq!(loaded.len(), map.len());
        assert_eq!(loaded.config(), map.config());
        Ok(())
    }

    #[test]
    fn newer_version_is_refused() -> Result<(), Box<dyn std::error::Error>> {
        let mut bytes = populated().serialize()?;
        bytes[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        match VoxelMap::deserialize(&bytes) {
            Err(ReachError::VersionMismatch { found, supported }) => {
                assert_eq!(found, FORMAT_VERSION + 1);
                assert_eq!(supported, FORMAT_VERSION);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn bad_magic_and_truncation_are_errors() -> Result<(), Box<dyn std::error::Error>> {
        assert!(VoxelMap::deserialize(b"RV").is_err());
        assert!(VoxelMap::deserialize(b"NOPE\x01\x00").is_err());
        let bytes = populated().serialize()?;
        assert!(VoxelMap::deserialize(&bytes[..bytes.len() / 2]).is_err());
        Ok(())
    }
}
