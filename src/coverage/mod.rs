pub mod clip;
pub mod gate;
pub mod geometry;
pub mod index;
pub mod score;
pub mod service;
pub mod stats;

pub use clip::{clip_zctas_to_place, FallbackPolicy, PreparedPlace, RepairNote};
pub use geometry::GeometryError;
pub use index::ZctaSpatialIndex;
pub use score::{score_zctas, ScoringPolicy};
pub use service::{CoverageEngine, ResolveOptions, ResolveReport, Resolution};
pub use stats::calculate_coverage_stats;
