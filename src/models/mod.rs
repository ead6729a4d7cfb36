//! Core data models for the coverage pipeline.

pub mod coverage;
pub mod place;
pub mod zcta;

pub use coverage::{CoverageStats, ZipsByStatus};
pub use place::{GeoBbox, PlaceBoundary};
pub use zcta::{
    CandidateError, ClipSource, ClippedZcta, ConfidenceTier, ScoredZip, ZctaCandidate, ZipSummary,
};
