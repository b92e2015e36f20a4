//! Segment evaluation: structured predicates, free-form expressions, and the
//! engine that turns either into a row mask over the dataset snapshot.

pub mod builder;
pub mod engine;
pub mod expression;
pub mod predicates;

pub use builder::SegmentBuilder;
pub use engine::{ColumnInfo, SegmentStats, SegmentationEngine};
pub use predicates::Conditions;
