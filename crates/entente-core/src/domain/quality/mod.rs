//! Knowledge graph quality scoring

pub mod aggregator;
pub mod report;

pub use aggregator::QualityAggregator;
pub use report::{
    ConflictSummary, DimensionScore, Priority, QualityDimension, QualityReport, Recommendation,
    recommendations,
};
