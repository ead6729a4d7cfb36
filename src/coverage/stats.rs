//! Coverage aggregation over kept ZIPs.

use tracing::debug;

use crate::models::{ConfidenceTier, CoverageStats, ScoredZip, ZipsByStatus};

/// Place area used when the real one cannot be measured (1 km²).
pub const PLACE_AREA_FALLBACK_SQM: f64 = 1_000_000.0;
/// Coverage below this percentage is flagged as suspicious.
pub const DEFAULT_MIN_COVERAGE_PERCENT: f64 = 10.0;

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Summarize kept ZIPs against the place area. Entries with `keep == false`
/// are ignored.
pub fn calculate_coverage_stats(place_area: f64, scored: &[ScoredZip]) -> CoverageStats {
    let kept: Vec<&ScoredZip> = scored.iter().filter(|s| s.keep).collect();
    debug!("Calculating coverage for place with {} clips", kept.len());

    let place_area = if place_area.is_finite() && place_area > 0.0 {
        place_area
    } else {
        debug!("Invalid place area {}, using fallback", place_area);
        PLACE_AREA_FALLBACK_SQM
    };

    let clips_area: f64 = kept.iter().map(|s| s.clip.clip_area).sum();

    let mut zips_by_status = ZipsByStatus::default();
    for s in &kept {
        let bucket = match s.tier {
            ConfidenceTier::HighOverlap => &mut zips_by_status.high_overlap,
            ConfidenceTier::CentroidOnly => &mut zips_by_status.centroid_only,
            ConfidenceTier::LowOverlap => &mut zips_by_status.low_overlap,
        };
        bucket.push(s.clip.zip.clone());
    }

    let ratio = clips_area / place_area;
    let stats = CoverageStats {
        place_area_sqm: place_area.round() as u64,
        clips_area_sqm: clips_area.round() as u64,
        ratio: round_to(ratio, 4),
        coverage_percent: round_to(ratio * 100.0, 2),
        zips_by_status,
    };

    debug!(
        "Coverage calculated: {}% ({}/{} sqm)",
        stats.coverage_percent, stats.clips_area_sqm, stats.place_area_sqm
    );
    stats
}

impl CoverageStats {
    /// Whether coverage reaches `min_percent`.
    pub fn meets_minimum(&self, min_percent: f64) -> bool {
        let ok = self.coverage_percent >= min_percent;
        if !ok {
            debug!(
                "Coverage below minimum threshold: {}% < {}%",
                self.coverage_percent, min_percent
            );
        }
        ok
    }
}
