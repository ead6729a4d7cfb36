//! ZCTA scoring and filtering.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{ClippedZcta, ConfidenceTier, ScoredZip};

/// Default overlap ratio at which a ZIP is kept.
pub const DEFAULT_AREA_THRESHOLD: f64 = 0.1;
/// Environment variable that overrides the configured threshold.
pub const AREA_THRESHOLD_ENV: &str = "ZIP_AREA_THRESHOLD";

/// Keep/drop policy.
///
/// A ZIP is kept when its overlap ratio reaches `threshold`, or, with
/// `centroid_bias`, when its centroid falls inside the place at any ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub threshold: f64,
    pub centroid_bias: bool,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_AREA_THRESHOLD,
            centroid_bias: true,
        }
    }
}

/// Parse a threshold string, accepting only values in `[0, 1]`.
pub fn parse_threshold(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|t| (0.0..=1.0).contains(t))
}

impl ScoringPolicy {
    pub fn new(threshold: f64, centroid_bias: bool) -> Self {
        Self {
            threshold,
            centroid_bias,
        }
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.threshold)
    }

    /// Apply an override value as read from [`AREA_THRESHOLD_ENV`].
    ///
    /// Invalid values are logged and ignored.
    pub fn with_threshold_override(mut self, raw: Option<&str>) -> Self {
        if let Some(raw) = raw {
            match parse_threshold(raw) {
                Some(threshold) => self.threshold = threshold,
                None => warn!(
                    "Invalid {}: {}, using {}",
                    AREA_THRESHOLD_ENV, raw, self.threshold
                ),
            }
        }
        self
    }

    /// Read [`AREA_THRESHOLD_ENV`] from the process environment.
    pub fn with_env_override(self) -> Self {
        let raw = std::env::var(AREA_THRESHOLD_ENV).ok();
        self.with_threshold_override(raw.as_deref())
    }

    pub fn keeps(&self, clip: &ClippedZcta) -> bool {
        clip.overlap_ratio >= self.threshold || (self.centroid_bias && clip.centroid_inside)
    }
}

/// Annotate every clip with its keep decision and tier.
pub fn score_zctas(clips: Vec<ClippedZcta>, policy: &ScoringPolicy) -> Vec<ScoredZip> {
    debug!(
        "Scoring {} ZCTAs with threshold {}, centroid bias: {}",
        clips.len(),
        policy.threshold,
        policy.centroid_bias
    );

    let scored: Vec<ScoredZip> = clips
        .into_iter()
        .map(|clip| {
            let keep = policy.keeps(&clip);
            if keep {
                debug!(
                    "Keeping ZIP {}: ratio={:.4}, centroidInside={}",
                    clip.zip, clip.overlap_ratio, clip.centroid_inside
                );
            }
            let tier = ConfidenceTier::classify(clip.overlap_ratio, clip.centroid_inside);
            ScoredZip { clip, keep, tier }
        })
        .collect();

    debug!(
        "Scoring complete: {}/{} ZCTAs kept",
        scored.iter().filter(|s| s.keep).count(),
        scored.len()
    );
    scored
}
