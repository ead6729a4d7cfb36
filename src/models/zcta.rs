//! ZCTA candidates and the per-ZIP results derived from them.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::GeoBbox;
use crate::coverage::geometry::{self, GeometryError, RepairExt};
use crate::geojson::{Feature, FeatureError};
use crate::normalize::zip_from_properties;

/// Share of a ZCTA at or above which a ZIP is a high-overlap match.
pub const HIGH_OVERLAP_RATIO: f64 = 0.5;
/// Share of a ZCTA below which a centroid-inside ZIP counts as centroid-only.
pub const CENTROID_ONLY_RATIO: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandidateError {
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// A ZCTA polygon tagged with its normalized ZIP and full geodesic area.
#[derive(Debug, Clone)]
pub struct ZctaCandidate {
    pub zip: String,
    pub geometry: MultiPolygon<f64>,
    /// Full area in square meters
    pub full_area: f64,
    pub bbox: GeoBbox,
}

impl ZctaCandidate {
    /// Repair the geometry (rewind, clean) and measure it.
    pub fn new(zip: String, geometry: MultiPolygon<f64>) -> Result<Self, CandidateError> {
        let geometry = geometry::rewind_safe(geometry).or_original("rewind");
        let geometry = geometry::validate_and_clean(geometry).or_original("clean");

        let bbox = geometry::bbox_of(&geometry).ok_or(FeatureError::EmptyGeometry)?;
        if !bbox.is_finite() {
            return Err(GeometryError::NonFiniteCoordinate.into());
        }
        let full_area = geometry::geodesic_area(&geometry)?;

        Ok(Self {
            zip,
            geometry,
            full_area,
            bbox,
        })
    }

    pub fn from_feature(feature: &Feature) -> Result<Self, CandidateError> {
        let zip = feature
            .properties
            .as_ref()
            .map(zip_from_properties)
            .unwrap_or_default();
        if zip.is_empty() {
            return Err(FeatureError::MissingZip.into());
        }
        let geometry = feature.multipolygon()?;
        Self::new(zip, geometry)
    }
}

/// Which clipping branch produced a [`ClippedZcta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClipSource {
    /// Exact `place ∩ zcta` with positive area
    Intersection,
    /// Intersection failed or was empty although the geometries intersect;
    /// the whole ZCTA stands in for the overlap
    UnclippedFallback,
}

/// One ZCTA clipped to one place.
#[derive(Debug, Clone)]
pub struct ClippedZcta {
    pub zip: String,
    pub geometry: MultiPolygon<f64>,
    pub clip_area: f64,
    pub full_area: f64,
    /// `clip_area / full_area`, always within [0, 1]
    pub overlap_ratio: f64,
    pub centroid_inside: bool,
    pub source: ClipSource,
}

impl ClippedZcta {
    /// Encode the clipped geometry as a feature carrying its ZIP.
    pub fn to_feature(&self) -> Feature {
        Feature::from_multipolygon(&self.geometry, zip_properties(&self.zip))
    }
}

pub(crate) fn zip_properties(zip: &str) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("zip".to_string(), Value::String(zip.to_string()));
    props
}

/// Confidence bucket for a kept ZIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfidenceTier {
    /// Overlap ratio of at least one half
    HighOverlap,
    /// Centroid inside the place but less than a quarter of the ZCTA overlaps
    CentroidOnly,
    /// Everything else that was kept
    LowOverlap,
}

impl ConfidenceTier {
    pub fn classify(overlap_ratio: f64, centroid_inside: bool) -> Self {
        if overlap_ratio >= HIGH_OVERLAP_RATIO {
            ConfidenceTier::HighOverlap
        } else if centroid_inside && overlap_ratio < CENTROID_ONLY_RATIO {
            ConfidenceTier::CentroidOnly
        } else {
            ConfidenceTier::LowOverlap
        }
    }
}

/// A clip with its keep decision and tier.
#[derive(Debug, Clone)]
pub struct ScoredZip {
    pub clip: ClippedZcta,
    pub keep: bool,
    pub tier: ConfidenceTier,
}

impl ScoredZip {
    pub fn zip(&self) -> &str {
        &self.clip.zip
    }

    pub fn summary(&self) -> ZipSummary {
        ZipSummary {
            zip: self.clip.zip.clone(),
            overlap_ratio: self.clip.overlap_ratio,
            centroid_inside: self.clip.centroid_inside,
            zcta_area_sqm: self.clip.full_area.round() as u64,
            overlap_area_sqm: self.clip.clip_area.round() as u64,
            tier: self.tier,
            source: self.clip.source,
        }
    }
}

/// Serialized per-ZIP result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipSummary {
    pub zip: String,
    pub overlap_ratio: f64,
    pub centroid_inside: bool,
    pub zcta_area_sqm: u64,
    pub overlap_area_sqm: u64,
    pub tier: ConfidenceTier,
    pub source: ClipSource,
}
