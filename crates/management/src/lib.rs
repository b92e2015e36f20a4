//! Audience management facade: the operations behind the segment editor,
//! schedule list, and export buttons.
//!
//! Transport-agnostic; the binary drives it from the command line.

pub mod models;
pub mod service;

pub use models::{
    CreateScheduleRequest, DeletedSegment, ExportAck, ExportJob, JobState, SaveSegmentRequest,
    SavedSegment, ScheduleCreated,
};
pub use service::AudienceService;
