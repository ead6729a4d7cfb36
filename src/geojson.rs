//! GeoJSON feature codec.
//!
//! Features are deserialized leniently: the geometry stays a raw JSON value
//! until a caller asks for it, so one malformed record never fails a whole
//! collection.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Why a single feature could not be turned into a usable geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("feature has no geometry")]
    MissingGeometry,
    #[error("unsupported geometry type '{0}'")]
    UnsupportedGeometry(String),
    #[error("malformed coordinates: {0}")]
    MalformedCoordinates(String),
    #[error("feature has no usable ZIP property")]
    MissingZip,
    #[error("geometry has no bounding box")]
    EmptyGeometry,
}

fn feature_type() -> String {
    "Feature".to_string()
}

fn collection_type() -> String {
    "FeatureCollection".to_string()
}

/// A GeoJSON feature with a lazily decoded geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub geo_type: String,

    #[serde(default)]
    pub geometry: Option<Value>,

    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

/// A GeoJSON feature collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "collection_type")]
    pub geo_type: String,

    #[serde(default)]
    pub features: Vec<Feature>,
}

impl Feature {
    /// Build a MultiPolygon feature with the given properties.
    pub fn from_multipolygon(geometry: &MultiPolygon<f64>, properties: Map<String, Value>) -> Self {
        Self {
            geo_type: feature_type(),
            geometry: Some(multipolygon_to_value(geometry)),
            properties: Some(properties),
        }
    }

    /// Decode the geometry as a MultiPolygon (Polygons are promoted).
    pub fn multipolygon(&self) -> Result<MultiPolygon<f64>, FeatureError> {
        match &self.geometry {
            None | Some(Value::Null) => Err(FeatureError::MissingGeometry),
            Some(value) => value_to_multipolygon(value),
        }
    }

    /// First non-empty string property among `keys`.
    pub fn property_str(&self, keys: &[&str]) -> Option<String> {
        let props = self.properties.as_ref()?;
        keys.iter().find_map(|key| match props.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
    }

    pub fn properties_or_empty(&self) -> Map<String, Value> {
        self.properties.clone().unwrap_or_default()
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            geo_type: collection_type(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Decode a GeoJSON geometry object into a MultiPolygon.
pub fn value_to_multipolygon(value: &Value) -> Result<MultiPolygon<f64>, FeatureError> {
    let geo_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("geometry without type"))?;
    let coords = value
        .get("coordinates")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing coordinates array"))?;

    match geo_type {
        "Polygon" => Ok(MultiPolygon::new(vec![parse_polygon(coords)?])),
        "MultiPolygon" => {
            let polygons = coords
                .iter()
                .map(|poly| {
                    poly.as_array()
                        .ok_or_else(|| malformed("polygon is not an array"))
                        .and_then(|rings| parse_polygon(rings))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if polygons.is_empty() {
                return Err(malformed("empty MultiPolygon"));
            }
            Ok(MultiPolygon::new(polygons))
        }
        other => Err(FeatureError::UnsupportedGeometry(other.to_string())),
    }
}

/// Encode a MultiPolygon as a GeoJSON geometry object.
pub fn multipolygon_to_value(geometry: &MultiPolygon<f64>) -> Value {
    let polygons: Vec<Value> = geometry
        .0
        .iter()
        .map(|polygon| {
            let mut rings = vec![ring_to_value(polygon.exterior())];
            rings.extend(polygon.interiors().iter().map(ring_to_value));
            Value::Array(rings)
        })
        .collect();

    json!({
        "type": "MultiPolygon",
        "coordinates": polygons,
    })
}

fn ring_to_value(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

fn malformed(reason: &str) -> FeatureError {
    FeatureError::MalformedCoordinates(reason.to_string())
}

fn parse_polygon(rings: &[Value]) -> Result<Polygon<f64>, FeatureError> {
    let mut parsed = rings
        .iter()
        .map(|ring| {
            ring.as_array()
                .ok_or_else(|| malformed("ring is not an array"))
                .and_then(|positions| parse_ring(positions))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if parsed.is_empty() {
        return Err(malformed("polygon without rings"));
    }
    let exterior = parsed.remove(0);
    Ok(Polygon::new(exterior, parsed))
}

fn parse_ring(positions: &[Value]) -> Result<LineString<f64>, FeatureError> {
    let mut coords = positions
        .iter()
        .map(|pos| {
            let pair = pos
                .as_array()
                .filter(|p| p.len() >= 2)
                .ok_or_else(|| malformed("position needs at least two numbers"))?;
            match (pair[0].as_f64(), pair[1].as_f64()) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(malformed("non-numeric position")),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Close the ring if needed
    if coords.len() >= 3 && coords.first() != coords.last() {
        coords.push(coords[0]);
    }
    if coords.len() < 4 {
        return Err(FeatureError::MalformedCoordinates(format!(
            "ring has {} positions, need at least 4",
            coords.len()
        )));
    }
    Ok(LineString::new(coords))
}

fn open_maybe_gzip(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().map_or(false, |e| e == "gz") {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

/// Read features from a GeoJSON file (optionally `.gz`).
///
/// Accepts either a `FeatureCollection` or a single `Feature`.
pub fn read_features(path: &Path) -> Result<Vec<Feature>> {
    let reader = open_maybe_gzip(path)?;
    let value: Value = serde_json::from_reader(reader)
        .with_context(|| format!("Failed to parse GeoJSON in {}", path.display()))?;

    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            let fc: FeatureCollection = serde_json::from_value(value)
                .with_context(|| format!("Invalid FeatureCollection in {}", path.display()))?;
            Ok(fc.features)
        }
        Some("Feature") => {
            let feature: Feature = serde_json::from_value(value)
                .with_context(|| format!("Invalid Feature in {}", path.display()))?;
            Ok(vec![feature])
        }
        other => anyhow::bail!(
            "{} is not a Feature or FeatureCollection (type: {:?})",
            path.display(),
            other
        ),
    }
}
