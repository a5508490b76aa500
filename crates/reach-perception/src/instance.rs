//! Instance table: object hypotheses aggregated across observations.
//!
//! A detection is merged into an existing instance of the same category
//! when either
//! - the share of its cells already owned by the instance reaches
//!   `merge_overlap`, or
//! - its embedding's cosine similarity with the instance's mean embedding
//!   reaches `merge_feature_similarity` and the two extents touch.
//!
//! Otherwise a new instance is created.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::{Aabb, VoxelKey};

pub type InstanceId = u32;

/// Aggregated evidence for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub category: String,
    pub cells: BTreeSet<VoxelKey>,
    pub extent: Aabb,
    pub point_count: u64,
    /// Running mean of the embeddings merged so far.
    pub embedding: Option<Vec<f32>>,
    pub observations: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Instance {
    /// Fraction of `cells` already owned by this instance.
    pub fn overlap_ratio(&self, cells: &BTreeSet<VoxelKey>) -> f32 {
        if cells.is_empty() {
            return 0.0;
        }
        cells.intersection(&self.cells).count() as f32 / cells.len() as f32
    }

    pub fn centre(&self) -> reach_types::Point3 {
        self.extent.centre()
    }

    fn absorb(&mut self, evidence: &Evidence) {
        self.cells.extend(evidence.cells.iter().copied());
        self.extent = self.extent.union(&evidence.extent);
        self.embedding = match (self.embedding.take(), evidence.embedding) {
            (Some(mean), Some(new)) if mean.len() == new.len() => {
                let n = self.observations as f32;
                Some(mean.iter().zip(new).map(|(m, x)| (m * n + x) / (n + 1.0)).collect())
            }
            (Some(mean), _) => Some(mean),
            (None, new) => new.map(<[f32]>::to_vec),
        };
        self.point_count += evidence.points;
        self.observations += 1;
        self.last_seen = evidence.timestamp;
    }
}

/// Cosine similarity of two equal-length vectors; `None` if either is zero
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some(dot / (na * nb))
}

/// What one detection contributed in one observation.
pub(crate) struct Evidence<'a> {
    pub category: &'a str,
    pub cells: BTreeSet<VoxelKey>,
    pub extent: Aabb,
    pub points: u64,
    pub embedding: Option<&'a [f32]>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct InstanceTable {
    pub next_id: InstanceId,
    pub instances: BTreeMap<InstanceId, Instance>,
}

impl InstanceTable {
    /// Merge `evidence` into the best matching instance or start a new one.
    pub fn associate(
        &mut self,
        evidence: Evidence<'_>,
        merge_overlap: f32,
        merge_similarity: f32,
        resolution: f32,
    ) -> InstanceId {
        let touching = evidence.extent.expanded(resolution);
        let best = self
            .instances
            .values()
            .filter(|inst| inst.category == evidence.category)
            .filter_map(|inst| {
                let overlap = inst.overlap_ratio(&evidence.cells);
                let similar = match (&inst.embedding, evidence.embedding) {
                    (Some(mean), Some(new)) => cosine_similarity(mean, new)
                        .is_some_and(|s| s >= merge_similarity && inst.extent.overlaps(&touching)),
                    _ => false,
                };
                (overlap >= merge_overlap || similar).then_some((inst.id, overlap))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id);

        if let Some(inst) = best.and_then(|id| self.instances.get_mut(&id)) {
            inst.absorb(&evidence);
            debug!(instance = inst.id, category = %inst.category, cells = inst.cells.len(), "merged detection");
            return inst.id;
        }

        let id = self.next_id;
        self.next_id += 1;
        debug!(instance = id, category = evidence.category, "new instance");
        self.instances.insert(
            id,
            Instance {
                id,
                category: evidence.category.to_string(),
                cells: evidence.cells,
                extent: evidence.extent,
                point_count: evidence.points,
                embedding: evidence.embedding.map(<[f32]>::to_vec),
                observations: 1,
                first_seen: evidence.timestamp,
                last_seen: evidence.timestamp,
            },
        );
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_types::Point3;

    fn evidence<'a>(category: &'a str, xs: &[i32], embedding: Option<&'a [f32]>) -> Evidence<'a> {
        let cells: BTreeSet<VoxelKey> = xs.iter().map(|&x| VoxelKey::new(x, 0, 0)).collect();
        let extent = Aabb::new(
            Point3::new(xs[0] as f32 * 0.05, 0.0, 0.0),
            Point3::new((xs[xs.len() - 1] + 1) as f32 * 0.05, 0.05, 0.05),
        );
        Evidence { category, cells, extent, points: xs.len() as u64, embedding, timestamp: Utc::now() }
    }

    #[test]
    fn overlapping_detection_merges() {
        let mut table = InstanceTable::default();
        let a = table.associate(evidence("cup", &[0, 1, 2, 3], None), 0.3, 0.8, 0.05);
        let b = table.associate(evidence("cup", &[2, 3, 4, 5], None), 0.3, 0.8, 0.05);
        assert_eq!(a, b);
        let inst = &table.instances[&a];
        assert_eq!(inst.cells.len(), 6);
        assert_eq!(inst.observations, 2);
    }

    #[test]
    fn different_category_never_merges() {
        let mut table = InstanceTable::default();
        let a = table.associate(evidence("cup", &[0, 1], None), 0.3, 0.8, 0.05);
        let b = table.associate(evidence("bowl", &[0, 1], None), 0.3, 0.8, 0.05);
        assert_ne!(a, b);
    }

    #[test]
    fn similar_embedding_merges_touching_extents() {
        let mut table = InstanceTable::default();
        let e1 = [1.0, 0.0, 0.1];
        let e2 = [0.9, 0.05, 0.1];
        let a = table.associate(evidence("cup", &[0, 1], Some(&e1)), 0.3, 0.8, 0.05);
        // Adjacent, no shared cells.
        let b = table.associate(evidence("cup", &[2, 3], Some(&e2)), 0.3, 0.8, 0.05);
        assert_eq!(a, b);
        // Far away: extents do not touch.
        let c = table.associate(evidence("cup", &[40, 41], Some(&e2)), 0.3, 0.8, 0.05);
        assert_ne!(a, c);
    }

    #[test]
    fn cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), None);
        let s = cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]).unwrap_or_default();
        assert!((s - 1.0).abs() < 1e-6);
    }
}
