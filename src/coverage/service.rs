//! Coverage engine: runs the whole pipeline for one place.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::clip::{clip_zctas_to_place, FallbackPolicy, PreparedPlace, RepairNote};
use super::geometry::{self, RepairExt};
use super::index::ZctaSpatialIndex;
use super::score::{score_zctas, ScoringPolicy};
use super::stats::calculate_coverage_stats;
use crate::geojson::{Feature, FeatureCollection};
use crate::grouping::{group_zips_by_city, CityGrouping, CityZipTable, MetroRules};
use crate::models::zcta::zip_properties;
use crate::models::{CoverageStats, PlaceBoundary, ScoredZip, ZctaCandidate, ZipSummary};

/// Per-invocation knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResolveOptions {
    pub scoring: ScoringPolicy,
    pub fallback: FallbackPolicy,
}

/// Indexed ZCTA set for one state, shared read-only across resolutions.
pub struct CoverageEngine {
    index: ZctaSpatialIndex,
    skipped: usize,
}

impl CoverageEngine {
    pub fn new(candidates: Vec<ZctaCandidate>) -> Self {
        Self {
            index: ZctaSpatialIndex::build(candidates),
            skipped: 0,
        }
    }

    /// Build from raw features, skipping (and logging) any that cannot be
    /// turned into a candidate.
    pub fn from_features(features: &[Feature]) -> Self {
        let mut candidates = Vec::with_capacity(features.len());
        let mut skipped = 0;

        for (i, feature) in features.iter().enumerate() {
            match ZctaCandidate::from_feature(feature) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    warn!("Skipping ZCTA feature {}: {}", i, e);
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            info!("Loaded {} ZCTAs, skipped {}", candidates.len(), skipped);
        }

        Self {
            index: ZctaSpatialIndex::build(candidates),
            skipped,
        }
    }

    pub fn from_feature_collection(collection: &FeatureCollection) -> Self {
        Self::from_features(&collection.features)
    }

    /// Features rejected while loading
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &ZctaSpatialIndex {
        &self.index
    }

    /// Resolve the ZIPs covering `place`.
    ///
    /// Never fails: malformed candidates are skipped, and an unusable place
    /// or an empty candidate set yields an empty resolution.
    pub fn resolve(&self, place: &PlaceBoundary, options: &ResolveOptions) -> Resolution {
        info!("Resolving ZIP coverage for {}, {}", place.name, place.state);

        let prepared = match PreparedPlace::prepare(place) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Place {} is unusable: {}", place.name, e);
                return Resolution::empty(place, vec![RepairNote {
                    step: "prepare".to_string(),
                    reason: e.to_string(),
                }]);
            }
        };

        if self.index.is_empty() {
            warn!("No ZCTA candidates loaded; returning empty result for {}", place.name);
            let stats = calculate_coverage_stats(prepared.area, &[]);
            return Resolution {
                stats,
                ..Resolution::empty(place, prepared.repairs)
            };
        }

        let run = clip_zctas_to_place(&self.index, &prepared, options.fallback);
        let scored = score_zctas(run.clips, &options.scoring);
        let stats = calculate_coverage_stats(prepared.area, &scored);

        let (kept, dropped): (Vec<ScoredZip>, Vec<ScoredZip>) =
            scored.into_iter().partition(|s| s.keep);

        info!(
            "{}: {} ZIPs kept, {} dropped by score, {} excluded ({}% coverage)",
            place.name,
            kept.len(),
            dropped.len(),
            run.excluded,
            stats.coverage_percent
        );
        debug!("{}", stats);

        Resolution {
            place_name: place.name.clone(),
            state: place.state.clone(),
            zips: kept,
            candidates: run.candidates,
            excluded: run.excluded,
            dropped: dropped.len(),
            stats,
            repairs: prepared.repairs,
        }
    }
}

/// Result of one resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub place_name: String,
    pub state: String,
    /// Kept ZIPs in ZIP order
    pub zips: Vec<ScoredZip>,
    /// Index hits considered
    pub candidates: usize,
    /// Candidates excluded before scoring (gate, invalid ZIP, failures)
    pub excluded: usize,
    /// Clips dropped by the scoring policy
    pub dropped: usize,
    pub stats: CoverageStats,
    /// Place repairs that fell back to their input
    pub repairs: Vec<RepairNote>,
}

impl Resolution {
    pub fn empty(place: &PlaceBoundary, repairs: Vec<RepairNote>) -> Self {
        Self {
            place_name: place.name.clone(),
            state: place.state.clone(),
            zips: Vec::new(),
            candidates: 0,
            excluded: 0,
            dropped: 0,
            stats: calculate_coverage_stats(0.0, &[]),
            repairs,
        }
    }

    pub fn zip_codes(&self) -> Vec<String> {
        self.zips.iter().map(|s| s.clip.zip.clone()).collect()
    }

    /// Regroup the kept ZIPs by owning city (metro searches only).
    pub fn group_by_city(&self, table: &dyn CityZipTable, rules: &MetroRules) -> CityGrouping {
        group_zips_by_city(&self.zip_codes(), &self.place_name, &self.state, table, rules)
    }

    /// Clipped geometries simplified for rendering, each tagged with its ZIP.
    pub fn display_features(&self, simplify_meters: Option<f64>) -> FeatureCollection {
        let features = self
            .zips
            .iter()
            .map(|s| {
                let geometry = match simplify_meters {
                    Some(meters) => geometry::simplify_meters(s.clip.geometry.clone(), meters)
                        .or_original("simplify"),
                    None => s.clip.geometry.clone(),
                };
                Feature::from_multipolygon(&geometry, zip_properties(&s.clip.zip))
            })
            .collect();
        debug!("Built display features for {}", self.place_name);
        FeatureCollection::new(features)
    }

    /// Serializable summary of this resolution.
    pub fn report(&self, grouping: Option<CityGrouping>) -> ResolveReport {
        ResolveReport {
            place: self.place_name.clone(),
            state: self.state.clone(),
            zips: self.zips.iter().map(ScoredZip::summary).collect(),
            stats: self.stats.clone(),
            candidates: self.candidates,
            excluded: self.excluded,
            dropped: self.dropped,
            repairs: self.repairs.clone(),
            grouping,
        }
    }
}

/// Wire form of a [`Resolution`], used whenever results cross a thread or
/// process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveReport {
    pub place: String,
    pub state: String,
    pub zips: Vec<ZipSummary>,
    pub stats: CoverageStats,
    pub candidates: usize,
    pub excluded: usize,
    pub dropped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub repairs: Vec<RepairNote>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub grouping: Option<CityGrouping>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::CsvCityZipTable;
    use crate::models::{ClipSource, ConfidenceTier};
    use geo::{Area, BooleanOps, LineString, MultiPolygon, Polygon};
    use serde_json::json;

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

    fn zcta(zip: &str, geometry: MultiPolygon<f64>) -> ZctaCandidate {
        ZctaCandidate::new(zip.to_string(), geometry).unwrap()
    }

    fn place(geometry: MultiPolygon<f64>) -> PlaceBoundary {
        PlaceBoundary::new("Testville", "CO", geometry)
    }

    fn resolve_default(engine: &CoverageEngine, geometry: MultiPolygon<f64>) -> Resolution {
        engine.resolve(&place(geometry), &ResolveOptions::default())
    }

    #[test]
    fn test_scenario_a_place_inside_single_zcta() {
        let engine = CoverageEngine::new(vec![zcta("80202", rect(-105.0, 39.0, -104.0, 40.0))]);
        let resolution = resolve_default(&engine, rect(-104.6, 39.4, -104.4, 39.6));

        assert_eq!(resolution.zips.len(), 1);
        let zip = &resolution.zips[0];
        assert_eq!(zip.zip(), "80202");
        assert!(zip.clip.centroid_inside);
        assert_eq!(zip.clip.source, ClipSource::Intersection);
        // The ZCTA ratio is small; the place is fully covered instead
        assert!(resolution.stats.ratio > 0.99 && resolution.stats.ratio < 1.01);
        assert!(zip.keep);
    }

    #[test]
    fn test_scenario_a_zcta_fully_inside_place() {
        let engine = CoverageEngine::new(vec![zcta("80202", rect(-104.6, 39.4, -104.4, 39.6))]);
        let resolution = resolve_default(&engine, rect(-105.0, 39.0, -104.0, 40.0));

        assert_eq!(resolution.zips.len(), 1);
        let zip = &resolution.zips[0];
        assert!((zip.clip.overlap_ratio - 1.0).abs() < 1e-6);
        assert!(zip.clip.centroid_inside);
        assert_eq!(zip.tier, ConfidenceTier::HighOverlap);
    }

    #[test]
    fn test_scenario_b_bisected_pair() {
        let engine = CoverageEngine::new(vec![
            zcta("80201", rect(-105.0, 39.0, -104.5, 39.5)),
            zcta("80202", rect(-104.5, 39.0, -104.0, 39.5)),
        ]);
        let resolution = resolve_default(&engine, rect(-104.75, 39.0, -104.25, 39.5));

        assert_eq!(resolution.zip_codes(), vec!["80201", "80202"]);
        for zip in &resolution.zips {
            let ratio = zip.clip.overlap_ratio;
            assert!((ratio - 0.5).abs() < 0.01, "{} ratio {}", zip.zip(), ratio);
        }
    }

    #[test]
    fn test_scenario_c_threshold_without_bias() {
        // 0.3 of the ZCTA overlaps and its centroid lies outside the place
        let engine = CoverageEngine::new(vec![zcta("80203", rect(-104.3, 39.0, -103.3, 39.5))]);
        let place = place(rect(-105.0, 39.0, -104.0, 39.5));
        let options = ResolveOptions {
            scoring: ScoringPolicy::new(0.9, false),
            ..Default::default()
        };

        let resolution = engine.resolve(&place, &options);
        assert!(resolution.zips.is_empty());
        assert_eq!(resolution.dropped, 1);

        let lenient = engine.resolve(&place, &ResolveOptions::default());
        assert_eq!(lenient.zip_codes(), vec!["80203"]);
        assert!((lenient.zips[0].clip.overlap_ratio - 0.3).abs() < 0.01);
    }

    #[test]
    fn test_scenario_d_null_geometry_skipped() {
        let fc: FeatureCollection = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": null, "properties": {"ZCTA5CE20": "80204"}},
                {"type": "Feature", "properties": {"ZCTA5CE20": "80205"},
                 "geometry": {
                     "type": "Polygon",
                     "coordinates": [[[-105, 39], [-104, 39], [-104, 40], [-105, 40], [-105, 39]]]
                 }}
            ]
        }))
        .unwrap();
        let engine = CoverageEngine::from_feature_collection(&fc);
        assert_eq!(engine.skipped(), 1);
        assert_eq!(engine.len(), 1);

        let resolution = resolve_default(&engine, rect(-104.8, 39.2, -104.2, 39.8));
        assert_eq!(resolution.zip_codes(), vec!["80205"]);
    }

    #[test]
    fn test_empty_collection_empty_result() {
        let engine = CoverageEngine::from_features(&[]);
        let resolution = resolve_default(&engine, rect(0.0, 0.0, 1.0, 1.0));
        assert!(resolution.zips.is_empty());
        assert_eq!(resolution.stats.coverage_percent, 0.0);
        assert!(resolution.stats.place_area_sqm > 0);
    }

    #[test]
    fn test_empty_place_empty_result() {
        let engine = CoverageEngine::new(vec![zcta("80202", rect(0.0, 0.0, 1.0, 1.0))]);
        let resolution = resolve_default(&engine, MultiPolygon::new(vec![]));
        assert!(resolution.zips.is_empty());
        assert_eq!(resolution.repairs.len(), 1);
    }

    #[test]
    fn test_bbox_disjoint_never_returned() {
        let engine = CoverageEngine::new(vec![
            zcta("00001", rect(0.0, 0.0, 1.0, 1.0)),
            zcta("00002", rect(2.0, 2.0, 3.0, 3.0)),
            zcta("00003", rect(-3.0, -3.0, -2.0, -2.0)),
        ]);
        let resolution = resolve_default(&engine, rect(0.2, 0.2, 0.8, 0.8));
        assert_eq!(resolution.zip_codes(), vec!["00001"]);
        assert_eq!(resolution.candidates, 1);
    }

    #[test]
    fn test_centroid_bias_always_keeps_centroid_inside() {
        // Large ZCTA whose centroid sits inside a small place: ratio is tiny
        let engine = CoverageEngine::new(vec![zcta("00001", rect(-1.0, -1.0, 1.0, 1.0))]);
        let resolution = resolve_default(&engine, rect(-0.05, -0.05, 0.05, 0.05));
        assert_eq!(resolution.zips.len(), 1);
        assert!(resolution.zips[0].clip.overlap_ratio < 0.01);
        assert_eq!(resolution.zips[0].tier, ConfidenceTier::CentroidOnly);
    }

    #[test]
    fn test_clip_area_sum_bounded() {
        // A grid of ZCTAs tiling the plane, place covering part of it
        let mut zctas = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                let x = i as f64 * 0.25;
                let y = j as f64 * 0.25;
                zctas.push(zcta(&format!("{:05}", i * 4 + j), rect(x, y, x + 0.25, y + 0.25)));
            }
        }
        let engine = CoverageEngine::new(zctas);
        let place_geom = rect(0.1, 0.1, 0.7, 0.6);
        let resolution = resolve_default(&engine, place_geom.clone());

        let place_area = geometry::geodesic_area(&place_geom).unwrap();
        let largest_zcta = resolution.zips.iter().map(|z| z.clip.full_area).fold(0.0, f64::max);
        let total: f64 = resolution.zips.iter().map(|z| z.clip.clip_area).sum();
        assert!(total <= place_area + largest_zcta + 1.0);
        for z in &resolution.zips {
            assert!((0.0..=1.0).contains(&z.clip.overlap_ratio));
        }
    }

    #[test]
    fn test_edge_neighbours_and_area_bound() {
        // One ZCTA inside the place, four more sharing only an edge with it
        let zctas = || {
            vec![
                zcta("00000", rect(0.25, 0.25, 0.75, 0.75)),
                zcta("00001", rect(1.0, 0.0, 2.0, 1.0)),
                zcta("00002", rect(-1.0, 0.0, 0.0, 1.0)),
                zcta("00003", rect(0.0, 1.0, 1.0, 2.0)),
                zcta("00004", rect(0.0, -1.0, 1.0, 0.0)),
            ]
        };
        let place_geom = rect(0.0, 0.0, 1.0, 1.0);
        let place_area = geometry::geodesic_area(&place_geom).unwrap();
        let total = |r: &Resolution| r.zips.iter().map(|z| z.clip.clip_area).sum::<f64>();
        let bound = |r: &Resolution| {
            place_area + r.zips.iter().map(|z| z.clip.full_area).fold(0.0, f64::max)
        };

        for fallback in [FallbackPolicy::Exclude, FallbackPolicy::InteriorOverlap] {
            let engine = CoverageEngine::new(zctas());
            let options = ResolveOptions {
                fallback,
                ..Default::default()
            };
            let resolution = engine.resolve(&place(place_geom.clone()), &options);
            assert_eq!(resolution.zip_codes(), vec!["00000"], "{:?}", fallback);
            assert!(total(&resolution) <= bound(&resolution));
            assert!(resolution.stats.coverage_percent <= 100.0);
        }

        // The recall-biased default keeps every touching neighbour whole,
        // so coverage overshoots the place several times over
        let engine = CoverageEngine::new(zctas());
        let resolution = resolve_default(&engine, place_geom.clone());
        assert_eq!(resolution.zips.len(), 5);
        let fallbacks = resolution
            .zips
            .iter()
            .filter(|z| z.clip.source == ClipSource::UnclippedFallback)
            .count();
        assert_eq!(fallbacks, 4);
        assert!(total(&resolution) > bound(&resolution));
        assert!(resolution.stats.coverage_percent > 300.0);
    }

    #[test]
    fn test_display_features_tagged_and_inside_place() {
        let engine = CoverageEngine::new(vec![zcta("80202", rect(-105.0, 39.0, -104.0, 40.0))]);
        let place_geom = rect(-104.6, 39.4, -104.4, 39.6);
        let resolution = resolve_default(&engine, place_geom.clone());
        let features = resolution.display_features(Some(10.0));
        assert_eq!(features.len(), 1);
        assert_eq!(features.features[0].property_str(&["zip"]), Some("80202".to_string()));
        let shape = features.features[0].multipolygon().unwrap();
        let outside = shape.difference(&place_geom);
        assert!(outside.unsigned_area() < 1e-9);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let engine = CoverageEngine::new(vec![zcta("80202", rect(-105.0, 39.0, -104.0, 40.0))]);
        let resolution = resolve_default(&engine, rect(-104.6, 39.4, -104.4, 39.6));
        let value = serde_json::to_value(resolution.report(None)).unwrap();
        assert_eq!(value["zips"][0]["zip"], "80202");
        assert!(value["zips"][0]["overlapRatio"].is_number());
        assert!(value["zips"][0]["zctaAreaSqm"].is_u64());
        assert!(value["stats"]["zipsByStatus"]["highOverlap"].is_array());
        assert!(value.get("grouping").is_none());

        let back: ResolveReport = serde_json::from_value(value).unwrap();
        assert_eq!(back.zips.len(), 1);
    }

    #[test]
    fn test_group_by_city_non_metro() {
        let engine = CoverageEngine::new(vec![zcta("80202", rect(-105.0, 39.0, -104.0, 40.0))]);
        let resolution = resolve_default(&engine, rect(-104.6, 39.4, -104.4, 39.6));
        let table = CsvCityZipTable::default();
        let grouping = resolution.group_by_city(&table, &MetroRules::default());
        assert!(!grouping.grouped);
        assert_eq!(grouping.main_city_zips, vec!["80202"]);
    }
}
