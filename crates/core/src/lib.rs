//! Shared model for Audience Express: configuration, error taxonomy, the
//! dataset snapshot, and the segment/schedule records.

pub mod clock;
pub mod config;
pub mod dataset;
pub mod error;
pub mod loader;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use dataset::{Column, ColumnType, Dataset, Mask, PhysicalType, Row, Scalar};
pub use error::{AudienceError, AudienceResult, ErrorKind};
pub use types::{
    Condition, Creator, Destination, ExportFormat, Schedule, Segment, SegmentDefinition,
    TimeOfDay, Trigger, validate_segment_name,
};
