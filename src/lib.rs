//! zipcover - resolves which US ZIP Code Tabulation Areas cover a place boundary.
//!
//! This library provides the coverage pipeline (repair, index, gate, clip,
//! score, aggregate), the optional metro city grouping pass, and the shared
//! types used by the `resolve` binary.

pub mod config;
pub mod coverage;
pub mod geojson;
pub mod grouping;
pub mod models;
pub mod normalize;

pub use coverage::{CoverageEngine, ResolveOptions, Resolution};
pub use models::{
    ClippedZcta, ConfidenceTier, CoverageStats, PlaceBoundary, ScoredZip, ZctaCandidate,
};
