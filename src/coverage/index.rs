//! Spatial index for fast ZCTA candidate lookups.

use rstar::{RTree, RTreeObject, AABB};
use std::sync::Arc;
use tracing::info;

use crate::models::{GeoBbox, ZctaCandidate};

/// Wrapper for R-tree indexing of ZCTA candidates
#[derive(Clone)]
pub struct IndexedZcta {
    pub candidate: Arc<ZctaCandidate>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedZcta {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl IndexedZcta {
    pub fn new(candidate: ZctaCandidate) -> Self {
        let bbox = candidate.bbox;
        Self {
            candidate: Arc::new(candidate),
            envelope: bbox_envelope(&bbox),
        }
    }
}

fn bbox_envelope(bbox: &GeoBbox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.min_lon, bbox.min_lat], [bbox.max_lon, bbox.max_lat])
}

/// Spatial index over ZCTA bounding boxes using an R-tree.
///
/// Queries over-approximate: every candidate whose box touches the query box
/// comes back, and callers must confirm overlap geometrically.
pub struct ZctaSpatialIndex {
    tree: RTree<IndexedZcta>,
}

impl ZctaSpatialIndex {
    /// Build spatial index from ZCTA candidates
    pub fn build(candidates: Vec<ZctaCandidate>) -> Self {
        info!("Building spatial index for {} ZCTAs...", candidates.len());

        let indexed: Vec<IndexedZcta> = candidates.into_iter().map(IndexedZcta::new).collect();
        let tree = RTree::bulk_load(indexed);

        info!("Spatial index built with {} entries", tree.size());
        Self { tree }
    }

    /// Find every candidate whose bounding box intersects `bbox`
    pub fn query_candidates(&self, bbox: &GeoBbox) -> Vec<Arc<ZctaCandidate>> {
        let query_envelope = bbox_envelope(bbox);

        let mut found: Vec<Arc<ZctaCandidate>> = self
            .tree
            .locate_in_envelope_intersecting(&query_envelope)
            .map(|iz| Arc::clone(&iz.candidate))
            .collect();

        // Tree order is an implementation detail; keep results stable
        found.sort_by(|a, b| a.zip.cmp(&b.zip));
        found
    }

    /// Get total number of indexed candidates
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Iterate over all indexed candidates
    pub fn candidates(&self) -> impl Iterator<Item = &Arc<ZctaCandidate>> {
        self.tree.iter().map(|iz| &iz.candidate)
    }
}
