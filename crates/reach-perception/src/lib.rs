//! `reach-perception` – the robot's spatial memory.
//!
//! Fuses noisy, asynchronous depth observations into a sparse 3-D voxel
//! map that the planner and the task engine query.
//!
//! # Modules
//!
//! - [`voxel`] – [`VoxelMap`]: confidence-weighted occupancy fusion, decay,
//!   obstacle and frontier queries.
//! - [`instance`] – object instances aggregated across observations.
//! - [`observation`] – [`Observation`]s, depth back-projection and the
//!   [`Segmenter`] seam.
//! - [`snapshot`] – versioned binary persistence.
//! - [`shared`] – [`SharedVoxelMap`], the single-writer/many-reader handle.
//! - [`geometry`] – voxel keys, boxes and ray traversal.

pub mod geometry;
pub mod instance;
pub mod observation;
pub mod shared;
pub mod snapshot;
pub mod voxel;

pub use geometry::{Aabb, VoxelKey};
pub use instance::{Instance, InstanceId, cosine_similarity};
pub use observation::{Detection, Observation, Segmentation, Segmenter};
pub use shared::SharedVoxelMap;
pub use snapshot::FORMAT_VERSION;
pub use voxel::{CellClass, Frontier, InsertSummary, MapStats, PRIOR, VoxelCell, VoxelMap, VoxelMapConfig};
