//! Two-tier disjoint/intersect gate run on every index hit.

use geo::{Intersects, MultiPolygon};
use tracing::warn;

use super::geometry::{check_finite, guarded, GeometryError};
use crate::models::GeoBbox;

/// Decision for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    /// Bounding boxes do not overlap
    BboxDisjoint,
    /// Boxes overlap but the geometries do not
    GeometryDisjoint,
    /// Geometries intersect
    Intersects,
    /// The geometric test failed; the bbox overlap decided
    BboxFallback(GeometryError),
}

impl GateVerdict {
    /// Whether the candidate proceeds to clipping.
    pub fn passes(&self) -> bool {
        matches!(self, GateVerdict::Intersects | GateVerdict::BboxFallback(_))
    }

    /// Whether the gate considers the geometries intersecting. A fallback
    /// verdict counts, since the bbox overlap is all we know.
    pub fn intersects(&self) -> bool {
        self.passes()
    }
}

/// Bbox overlap first, then an exact `intersects` test.
///
/// A failure in the exact test falls back to the bbox result instead of
/// aborting the batch.
pub fn gate(
    place: &MultiPolygon<f64>,
    place_bbox: &GeoBbox,
    zcta: &MultiPolygon<f64>,
    zcta_bbox: &GeoBbox,
) -> GateVerdict {
    if !place_bbox.intersects(zcta_bbox) {
        return GateVerdict::BboxDisjoint;
    }

    let exact = check_finite(place)
        .and_then(|_| check_finite(zcta))
        .and_then(|_| guarded("intersects", || place.intersects(zcta)));

    match exact {
        Ok(true) => GateVerdict::Intersects,
        Ok(false) => GateVerdict::GeometryDisjoint,
        Err(reason) => {
            warn!("Intersects test failed, using bbox overlap: {}", reason);
            GateVerdict::BboxFallback(reason)
        }
    }
}
