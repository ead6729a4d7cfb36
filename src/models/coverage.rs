//! Coverage statistics for one resolved place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kept ZIPs bucketed by confidence tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipsByStatus {
    pub high_overlap: Vec<String>,
    pub centroid_only: Vec<String>,
    pub low_overlap: Vec<String>,
}

impl ZipsByStatus {
    pub fn total(&self) -> usize {
        self.high_overlap.len() + self.centroid_only.len() + self.low_overlap.len()
    }
}

/// Aggregate coverage over all kept ZIPs for one place.
///
/// Diagnostic only: nothing downstream gates inclusion on these numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageStats {
    pub place_area_sqm: u64,
    pub clips_area_sqm: u64,
    /// Matched area over place area, 4 decimals
    pub ratio: f64,
    /// `ratio * 100`, 2 decimals
    pub coverage_percent: f64,
    pub zips_by_status: ZipsByStatus,
}

impl fmt::Display for CoverageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Coverage Report:")?;
        writeln!(f, "- Place Area: {} sqm", self.place_area_sqm)?;
        writeln!(f, "- Covered Area: {} sqm", self.clips_area_sqm)?;
        writeln!(f, "- Coverage Ratio: {}", self.ratio)?;
        writeln!(f, "- Coverage Percent: {}%", self.coverage_percent)?;
        writeln!(f, "- High Overlap ZIPs: {}", self.zips_by_status.high_overlap.len())?;
        writeln!(f, "- Centroid-only ZIPs: {}", self.zips_by_status.centroid_only.len())?;
        write!(f, "- Low Overlap ZIPs: {}", self.zips_by_status.low_overlap.len())
    }
}
