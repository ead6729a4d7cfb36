//! Geometry repair and measurement.
//!
//! Every repair step returns [`Repaired`]: either the transformed value or a
//! [`Degraded`] carrying the untouched input and the reason the step gave up.
//! Panics raised inside the geometry library are caught and reported the
//! same way, so one bad polygon never takes down a batch.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use geo::orient::{Direction, Orient};
use geo::{
    BooleanOps, BoundingRect, Centroid, ChamberlainDuquetteArea, Coord, CoordsIter, Intersects,
    LineString, MultiPolygon, Polygon, Relate, RemoveRepeatedPoints, Simplify, Validation,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::GeoBbox;

/// Lower bound for the display simplification tolerance, in degrees.
pub const MIN_TOLERANCE_DEGREES: f64 = 1e-6;
/// Upper bound for the display simplification tolerance, in degrees.
pub const MAX_TOLERANCE_DEGREES: f64 = 0.01;
/// Meters per degree of longitude at the equator.
const METERS_PER_DEGREE_EQUATOR: f64 = 111_320.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("geometry has non-finite coordinates")]
    NonFiniteCoordinate,
    #[error("geometry is empty")]
    Empty,
    #[error("geometry has no centroid")]
    NoCentroid,
    #[error("{0} produced no polygons")]
    NoOutput(&'static str),
    #[error("{op} panicked: {message}")]
    Panicked { op: &'static str, message: String },
}

/// A repair step that fell back to its input.
#[derive(Debug, Clone)]
pub struct Degraded<T> {
    pub original: T,
    pub reason: GeometryError,
}

impl<T> Degraded<T> {
    pub fn new(original: T, reason: GeometryError) -> Self {
        Self { original, reason }
    }
}

/// Outcome of a repair step.
pub type Repaired<T> = Result<T, Degraded<T>>;

pub trait RepairExt<T> {
    /// Unwrap to the repaired value, or log and fall back to the original.
    fn or_original(self, op: &str) -> T;
}

impl<T> RepairExt<T> for Repaired<T> {
    fn or_original(self, op: &str) -> T {
        match self {
            Ok(value) => value,
            Err(degraded) => {
                warn!("{} degraded, keeping input: {}", op, degraded.reason);
                degraded.original
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a geometry-library call, turning a panic into a [`GeometryError`].
pub(crate) fn guarded<T>(op: &'static str, f: impl FnOnce() -> T) -> Result<T, GeometryError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| GeometryError::Panicked {
        op,
        message: panic_message(payload.as_ref()),
    })
}

pub(crate) fn check_finite(geometry: &MultiPolygon<f64>) -> Result<(), GeometryError> {
    if geometry
        .coords_iter()
        .all(|c| c.x.is_finite() && c.y.is_finite())
    {
        Ok(())
    } else {
        Err(GeometryError::NonFiniteCoordinate)
    }
}

/// Orient rings by the GeoJSON right-hand rule: exteriors counter-clockwise,
/// holes clockwise. Rewinding an already wound geometry is a no-op.
pub fn rewind_safe(geometry: MultiPolygon<f64>) -> Repaired<MultiPolygon<f64>> {
    if let Err(reason) = check_finite(&geometry) {
        return Err(Degraded::new(geometry, reason));
    }
    match guarded("rewind", || geometry.orient(Direction::Default)) {
        Ok(rewound) => Ok(rewound),
        Err(reason) => Err(Degraded::new(geometry, reason)),
    }
}

/// Split self-intersecting polygons into simple ones.
///
/// Polygons that already validate are passed through untouched. On failure
/// the original polygons are returned as-is.
pub fn unkink_safe(geometry: MultiPolygon<f64>) -> Repaired<Vec<Polygon<f64>>> {
    if let Err(reason) = check_finite(&geometry) {
        return Err(Degraded::new(geometry.0, reason));
    }

    let mut simple = Vec::with_capacity(geometry.0.len());
    for polygon in &geometry.0 {
        if polygon.is_valid() {
            simple.push(polygon.clone());
            continue;
        }

        let resolved = guarded("unkink", || {
            MultiPolygon::new(vec![polygon.clone()]).union(&MultiPolygon::<f64>::new(vec![]))
        });
        match resolved {
            Ok(pieces) if !pieces.0.is_empty() => {
                debug!("Unkinked polygon into {} pieces", pieces.0.len());
                simple.extend(pieces.0);
            }
            Ok(_) => return Err(Degraded::new(geometry.0, GeometryError::NoOutput("unkink"))),
            Err(reason) => return Err(Degraded::new(geometry.0, reason)),
        }
    }

    Ok(simple)
}

/// True when `p` lies on the closed segment `a`-`b`.
fn is_on_segment(a: Coord<f64>, b: Coord<f64>, p: Coord<f64>) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    cross == 0.0
        && p.x >= a.x.min(b.x)
        && p.x <= a.x.max(b.x)
        && p.y >= a.y.min(b.y)
        && p.y <= a.y.max(b.y)
}

/// Drop collinear vertices from a closed ring. `None` if the ring collapses.
fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut points: Vec<Coord<f64>> = ring.0.clone();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    let mut kept: Vec<Coord<f64>> = Vec::with_capacity(points.len());
    for p in points {
        while kept.len() >= 2 && is_on_segment(kept[kept.len() - 2], p, kept[kept.len() - 1]) {
            kept.pop();
        }
        kept.push(p);
    }

    // The seam between the last and first vertex
    while kept.len() >= 3 {
        let n = kept.len();
        if is_on_segment(kept[n - 2], kept[0], kept[n - 1]) {
            kept.pop();
        } else if is_on_segment(kept[n - 1], kept[1], kept[0]) {
            kept.remove(0);
        } else {
            break;
        }
    }

    if kept.len() < 3 {
        return None;
    }
    kept.push(kept[0]);
    Some(LineString::new(kept))
}

/// Remove duplicate and collinear vertices before boolean operations.
///
/// Holes that collapse are dropped, as are polygons whose exterior collapses.
/// If nothing survives the input is returned unchanged.
pub fn validate_and_clean(geometry: MultiPolygon<f64>) -> Repaired<MultiPolygon<f64>> {
    if let Err(reason) = check_finite(&geometry) {
        return Err(Degraded::new(geometry, reason));
    }

    let deduped = match guarded("clean", || geometry.remove_repeated_points()) {
        Ok(d) => d,
        Err(reason) => return Err(Degraded::new(geometry, reason)),
    };

    let mut polygons = Vec::with_capacity(deduped.0.len());
    for polygon in &deduped.0 {
        let Some(exterior) = clean_ring(polygon.exterior()) else {
            debug!("Dropping polygon whose exterior collapsed during cleaning");
            continue;
        };
        let interiors: Vec<LineString<f64>> =
            polygon.interiors().iter().filter_map(clean_ring).collect();
        polygons.push(Polygon::new(exterior, interiors));
    }

    if polygons.is_empty() {
        return Err(Degraded::new(geometry, GeometryError::Empty));
    }
    Ok(MultiPolygon::new(polygons))
}

/// Convert a meter tolerance to degrees at the given latitude, clamped to
/// `[MIN_TOLERANCE_DEGREES, MAX_TOLERANCE_DEGREES]`.
pub fn tolerance_degrees(latitude: f64, meters: f64) -> f64 {
    let meters_per_degree = METERS_PER_DEGREE_EQUATOR * latitude.to_radians().cos();
    (meters / meters_per_degree)
        .max(MIN_TOLERANCE_DEGREES)
        .min(MAX_TOLERANCE_DEGREES)
}

/// Latitude-aware simplification for display output.
///
/// Only apply this to geometry headed for rendering; areas and overlap ratios
/// must be computed on unsimplified input.
pub fn simplify_meters(geometry: MultiPolygon<f64>, meters: f64) -> Repaired<MultiPolygon<f64>> {
    if let Err(reason) = check_finite(&geometry) {
        return Err(Degraded::new(geometry, reason));
    }
    let Some(centroid) = geometry.centroid() else {
        return Err(Degraded::new(geometry, GeometryError::NoCentroid));
    };

    let tolerance = tolerance_degrees(centroid.y(), meters);
    match guarded("simplify", || geometry.simplify(tolerance)) {
        Ok(simplified) => Ok(simplified),
        Err(reason) => Err(Degraded::new(geometry, reason)),
    }
}

/// Geodesic area in square meters.
pub fn geodesic_area(geometry: &MultiPolygon<f64>) -> Result<f64, GeometryError> {
    check_finite(geometry)?;
    let area = guarded("area", || geometry.chamberlain_duquette_unsigned_area())?;
    if area.is_finite() {
        Ok(area)
    } else {
        Err(GeometryError::NonFiniteCoordinate)
    }
}

/// Whether the area centroid of `inner` lies inside (or on) `outer`.
pub fn centroid_inside(
    inner: &MultiPolygon<f64>,
    outer: &MultiPolygon<f64>,
) -> Result<bool, GeometryError> {
    let centroid = guarded("centroid", || inner.centroid())?.ok_or(GeometryError::NoCentroid)?;
    guarded("contains", || outer.intersects(&centroid))
}

/// Whether the interiors of `a` and `b` overlap. Geometries that only share
/// boundary points or edges do not.
pub fn interiors_meet(
    a: &MultiPolygon<f64>,
    b: &MultiPolygon<f64>,
) -> Result<bool, GeometryError> {
    check_finite(a)?;
    check_finite(b)?;
    guarded("relate", || {
        let matrix = a.relate(b);
        matrix.is_intersects() && !matrix.is_touches()
    })
}

/// Bounding box of a geometry, `None` for empty input.
pub fn bbox_of(geometry: &MultiPolygon<f64>) -> Option<GeoBbox> {
    geometry.bounding_rect().map(GeoBbox::from_rect)
}
