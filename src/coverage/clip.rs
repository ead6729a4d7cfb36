//! Clipping engine: `place ∩ zcta` for every gated candidate.

use geo::{BooleanOps, MultiPolygon};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::gate::{gate, GateVerdict};
use super::geometry::{self, GeometryError, Repaired};
use super::index::ZctaSpatialIndex;
use crate::models::{ClipSource, ClippedZcta, GeoBbox, PlaceBoundary, ZctaCandidate};

/// What to do when the exact intersection fails or comes back empty for a
/// candidate the gate says intersects the place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Keep the whole ZCTA as the overlap (ratio 1.0). Biased toward recall:
    /// near-tangential overlaps often defeat the clipper although the ZIP
    /// really does border the place. Overstates coverage for those ZIPs,
    /// including every neighbour that only shares an edge with the place,
    /// so the summed clip area is not bounded by one extra ZCTA.
    #[default]
    UnclippedZcta,
    /// Keep the whole ZCTA only when the interiors of place and ZCTA really
    /// overlap; edge or corner contact is dropped.
    InteriorOverlap,
    /// Drop the candidate.
    Exclude,
}

/// A repair step on the place that fell back to its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairNote {
    pub step: String,
    pub reason: String,
}

/// A place boundary repaired once and reused for every candidate.
#[derive(Debug, Clone)]
pub struct PreparedPlace {
    pub geometry: MultiPolygon<f64>,
    pub bbox: GeoBbox,
    /// Geodesic area in square meters, 0 when it could not be measured
    pub area: f64,
    pub repairs: Vec<RepairNote>,
}

fn apply_repair<T>(repairs: &mut Vec<RepairNote>, step: &str, result: Repaired<T>) -> T {
    match result {
        Ok(value) => value,
        Err(degraded) => {
            warn!("Place {} degraded, keeping input: {}", step, degraded.reason);
            repairs.push(RepairNote {
                step: step.to_string(),
                reason: degraded.reason.to_string(),
            });
            degraded.original
        }
    }
}

impl PreparedPlace {
    /// Rewind, unkink and clean the place geometry, then measure it.
    pub fn prepare(place: &PlaceBoundary) -> Result<Self, GeometryError> {
        let mut repairs = Vec::new();

        let rewound = apply_repair(
            &mut repairs,
            "rewind",
            geometry::rewind_safe(place.geometry.clone()),
        );
        let pieces = apply_repair(&mut repairs, "unkink", geometry::unkink_safe(rewound));
        let cleaned = apply_repair(
            &mut repairs,
            "clean",
            geometry::validate_and_clean(MultiPolygon::new(pieces)),
        );
        // Unkinked pieces come back from the boolean engine; wind them again
        let geometry = apply_repair(&mut repairs, "rewind", geometry::rewind_safe(cleaned));

        let bbox = geometry::bbox_of(&geometry).ok_or(GeometryError::Empty)?;
        if !bbox.is_finite() {
            return Err(GeometryError::NonFiniteCoordinate);
        }

        let area = match geometry::geodesic_area(&geometry) {
            Ok(area) => area,
            Err(e) => {
                warn!("Could not measure place {}: {}", place.name, e);
                repairs.push(RepairNote {
                    step: "area".to_string(),
                    reason: e.to_string(),
                });
                0.0
            }
        };

        Ok(Self {
            geometry,
            bbox,
            area,
            repairs,
        })
    }
}

/// Why a candidate produced no clip.
#[derive(Debug, Clone, PartialEq)]
pub enum Exclusion {
    InvalidZip,
    Gate(GateVerdict),
    FallbackDisabled,
    /// Only the boundaries meet
    BoundaryContact,
    Measurement(GeometryError),
}

#[derive(Debug, Clone)]
pub enum ClipOutcome {
    Clipped(ClippedZcta),
    Excluded(Exclusion),
}

fn overlap_ratio(clip_area: f64, full_area: f64) -> f64 {
    if full_area > 0.0 {
        (clip_area / full_area).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Clip one candidate to the place.
pub fn clip_candidate(
    place: &PreparedPlace,
    zcta: &ZctaCandidate,
    fallback: FallbackPolicy,
) -> ClipOutcome {
    if zcta.zip.len() != 5 {
        debug!("Invalid ZIP '{}' on candidate, skipping", zcta.zip);
        return ClipOutcome::Excluded(Exclusion::InvalidZip);
    }

    let verdict = gate(&place.geometry, &place.bbox, &zcta.geometry, &zcta.bbox);
    if !verdict.passes() {
        debug!("ZIP {} does not intersect ({:?}), skipping", zcta.zip, verdict);
        return ClipOutcome::Excluded(Exclusion::Gate(verdict));
    }

    let centroid_inside = match geometry::centroid_inside(&zcta.geometry, &place.geometry) {
        Ok(inside) => inside,
        Err(e) => {
            warn!("Centroid test failed for ZIP {}, skipping: {}", zcta.zip, e);
            return ClipOutcome::Excluded(Exclusion::Measurement(e));
        }
    };

    let intersection =
        geometry::guarded("intersection", || place.geometry.intersection(&zcta.geometry))
            .and_then(|clipped| geometry::geodesic_area(&clipped).map(|area| (clipped, area)));

    let (clipped, clip_area, source) = match intersection {
        Ok((clipped, area)) if area > 0.0 => {
            let clipped = geometry::rewind_safe(clipped).unwrap_or_else(|d| d.original);
            (clipped, area, ClipSource::Intersection)
        }
        other => {
            match &other {
                Err(e) => debug!("Intersection failed for ZIP {}: {}", zcta.zip, e),
                Ok(_) => debug!("Intersection for ZIP {} has no area", zcta.zip),
            }
            if !verdict.intersects() {
                return ClipOutcome::Excluded(Exclusion::Gate(verdict));
            }
            match fallback {
                FallbackPolicy::UnclippedZcta => {}
                FallbackPolicy::InteriorOverlap => {
                    match geometry::interiors_meet(&place.geometry, &zcta.geometry) {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!("ZIP {} only touches the place, skipping", zcta.zip);
                            return ClipOutcome::Excluded(Exclusion::BoundaryContact);
                        }
                        Err(e) => {
                            warn!("Relate failed for ZIP {}, keeping fallback: {}", zcta.zip, e)
                        }
                    }
                }
                FallbackPolicy::Exclude => {
                    return ClipOutcome::Excluded(Exclusion::FallbackDisabled);
                }
            }
            debug!("Using unclipped ZCTA for ZIP {}", zcta.zip);
            (zcta.geometry.clone(), zcta.full_area, ClipSource::UnclippedFallback)
        }
    };

    ClipOutcome::Clipped(ClippedZcta {
        zip: zcta.zip.clone(),
        geometry: clipped,
        clip_area,
        full_area: zcta.full_area,
        overlap_ratio: overlap_ratio(clip_area, zcta.full_area),
        centroid_inside,
        source,
    })
}

/// Result of clipping every index hit against one place.
#[derive(Debug, Clone, Default)]
pub struct ClipRun {
    /// Index hits considered
    pub candidates: usize,
    pub clips: Vec<ClippedZcta>,
    pub excluded: usize,
}

/// Query the index with the place bbox and clip every hit, in parallel.
pub fn clip_zctas_to_place(
    index: &ZctaSpatialIndex,
    place: &PreparedPlace,
    fallback: FallbackPolicy,
) -> ClipRun {
    let candidates: Vec<Arc<ZctaCandidate>> = index.query_candidates(&place.bbox);
    debug!("R-tree found {} candidate ZCTAs", candidates.len());

    let outcomes: Vec<ClipOutcome> = candidates
        .par_iter()
        .map(|zcta| clip_candidate(place, zcta, fallback))
        .collect();

    let mut run = ClipRun {
        candidates: candidates.len(),
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome {
            ClipOutcome::Clipped(clip) => run.clips.push(clip),
            ClipOutcome::Excluded(_) => run.excluded += 1,
        }
    }

    info!(
        "Clipping complete: {} clips from {} candidates",
        run.clips.len(),
        run.candidates
    );
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Polygon};

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![
                (min_x, min_y),
                (max_x, min_y),
                (max_x, max_y),
                (min_x, max_y),
                (min_x, min_y),
            ]),
            vec![],
        )])
    }

    fn place(geometry: MultiPolygon<f64>) -> PreparedPlace {
        PreparedPlace::prepare(&PlaceBoundary::new("Test", "CO", geometry)).unwrap()
    }

    fn zcta(zip: &str, geometry: MultiPolygon<f64>) -> ZctaCandidate {
        ZctaCandidate::new(zip.to_string(), geometry).unwrap()
    }

    #[test]
    fn test_partial_overlap_ratio() {
        let place = place(rect(-105.0, 39.0, -104.5, 39.5));
        let z = zcta("80202", rect(-104.75, 39.0, -104.25, 39.5));
        let ClipOutcome::Clipped(clip) = clip_candidate(&place, &z, FallbackPolicy::default())
        else {
            panic!("expected a clip");
        };
        assert_eq!(clip.source, ClipSource::Intersection);
        assert!((clip.overlap_ratio - 0.5).abs() < 0.01, "ratio {}", clip.overlap_ratio);
        assert!(clip.clip_area < clip.full_area);
    }

    #[test]
    fn test_touching_candidate_uses_fallback() {
        let place = place(rect(0.0, 0.0, 1.0, 1.0));
        let z = zcta("00001", rect(1.0, 0.0, 2.0, 1.0));
        let ClipOutcome::Clipped(clip) = clip_candidate(&place, &z, FallbackPolicy::UnclippedZcta)
        else {
            panic!("expected a fallback clip");
        };
        assert_eq!(clip.source, ClipSource::UnclippedFallback);
        assert_eq!(clip.overlap_ratio, 1.0);
        assert_eq!(clip.clip_area, clip.full_area);
    }

    #[test]
    fn test_touching_candidate_excluded_when_fallback_disabled() {
        let place = place(rect(0.0, 0.0, 1.0, 1.0));
        let z = zcta("00001", rect(1.0, 0.0, 2.0, 1.0));
        assert!(matches!(
            clip_candidate(&place, &z, FallbackPolicy::Exclude),
            ClipOutcome::Excluded(Exclusion::FallbackDisabled)
        ));
    }

    #[test]
    fn test_touching_candidate_dropped_by_interior_policy() {
        let place = place(rect(0.0, 0.0, 1.0, 1.0));
        let z = zcta("00001", rect(1.0, 0.0, 2.0, 1.0));
        assert!(matches!(
            clip_candidate(&place, &z, FallbackPolicy::InteriorOverlap),
            ClipOutcome::Excluded(Exclusion::BoundaryContact)
        ));

        let overlapping = zcta("00002", rect(0.5, 0.0, 1.5, 1.0));
        let ClipOutcome::Clipped(clip) =
            clip_candidate(&place, &overlapping, FallbackPolicy::InteriorOverlap)
        else {
            panic!("expected a clip");
        };
        assert_eq!(clip.source, ClipSource::Intersection);
    }

    #[test]
    fn test_fallback_policy_names() {
        let policy: FallbackPolicy = serde_json::from_str("\"interior_overlap\"").unwrap();
        assert_eq!(policy, FallbackPolicy::InteriorOverlap);
    }

    #[test]
    fn test_disjoint_excluded() {
        let place = place(rect(0.0, 0.0, 1.0, 1.0));
        let z = zcta("00002", rect(3.0, 3.0, 4.0, 4.0));
        assert!(matches!(
            clip_candidate(&place, &z, FallbackPolicy::default()),
            ClipOutcome::Excluded(Exclusion::Gate(GateVerdict::BboxDisjoint))
        ));
    }

    #[test]
    fn test_invalid_zip_excluded() {
        let place = place(rect(0.0, 0.0, 1.0, 1.0));
        let z = zcta("123", rect(0.0, 0.0, 1.0, 1.0));
        assert!(matches!(
            clip_candidate(&place, &z, FallbackPolicy::default()),
            ClipOutcome::Excluded(Exclusion::InvalidZip)
        ));
    }

    #[test]
    fn test_prepare_unkinks_bowtie_place() {
        let bowtie = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (0.2, 0.2), (0.2, 0.0), (0.0, 0.2), (0.0, 0.0)]),
            vec![],
        )]);
        let prepared = place(bowtie);
        assert_eq!(prepared.geometry.0.len(), 2);
        assert!(prepared.repairs.is_empty());
        assert!(prepared.area > 0.0);
    }

    #[test]
    fn test_run_ratios_in_unit_interval() {
        let index = ZctaSpatialIndex::build(vec![
            zcta("00001", rect(0.0, 0.0, 0.5, 0.5)),
            zcta("00002", rect(0.4, 0.4, 1.4, 1.4)),
            zcta("00003", rect(0.9, 0.0, 1.1, 0.2)),
            zcta("00004", rect(5.0, 5.0, 6.0, 6.0)),
        ]);
        let place = place(rect(0.0, 0.0, 1.0, 1.0));
        let run = clip_zctas_to_place(&index, &place, FallbackPolicy::default());
        assert_eq!(run.candidates, 3);
        assert_eq!(run.clips.len(), 3);
        for clip in &run.clips {
            assert!((0.0..=1.0).contains(&clip.overlap_ratio));
            assert_ne!(clip.zip, "00004");
        }
    }
}
