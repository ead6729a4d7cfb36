//! Place boundary and bounding box types.

use geo::{MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

use crate::geojson::{Feature, FeatureError};

/// Property keys checked for a place display name.
pub const PLACE_NAME_KEYS: [&str; 4] = ["name", "NAME", "display_name", "NAMELSAD"];
/// Property keys checked for a place state.
pub const PLACE_STATE_KEYS: [&str; 4] = ["state", "STATE", "STUSPS", "state_name"];

/// Axis-aligned bounding box in lon/lat degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBbox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl GeoBbox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    pub fn from_rect(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// Closed-interval overlap test; boxes that only touch count as overlapping.
    pub fn intersects(&self, other: &GeoBbox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }

    pub fn is_finite(&self) -> bool {
        self.min_lon.is_finite()
            && self.min_lat.is_finite()
            && self.max_lon.is_finite()
            && self.max_lat.is_finite()
    }
}

/// The administrative polygon (city or county) being matched against ZCTAs.
#[derive(Debug, Clone)]
pub struct PlaceBoundary {
    pub name: String,
    pub state: String,
    pub geometry: MultiPolygon<f64>,
}

impl PlaceBoundary {
    pub fn new(
        name: impl Into<String>,
        state: impl Into<String>,
        geometry: MultiPolygon<f64>,
    ) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
            geometry,
        }
    }

    /// Build a place from a GeoJSON feature.
    ///
    /// Explicit `name` / `state` win over the feature's own properties.
    pub fn from_feature(
        feature: &Feature,
        name: Option<&str>,
        state: Option<&str>,
    ) -> Result<Self, FeatureError> {
        let geometry = feature.multipolygon()?;
        let name = name
            .map(str::to_string)
            .or_else(|| feature.property_str(&PLACE_NAME_KEYS))
            .unwrap_or_else(|| "Unknown".to_string());
        let state = state
            .map(str::to_string)
            .or_else(|| feature.property_str(&PLACE_STATE_KEYS))
            .unwrap_or_default();
        Ok(Self::new(name, state, geometry))
    }
}
