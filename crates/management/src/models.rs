//! Management request/response types: segments, schedules, export jobs.

use audience_core::{
    AudienceResult, Creator, Destination, ExportFormat, Schedule, Segment,
    SegmentDefinition, TimeOfDay, Trigger,
};
use audience_export::ArtifactDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Segments ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSegmentRequest {
    pub name: String,
    #[serde(flatten)]
    pub definition: SegmentDefinition,
    pub created_by: Creator,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedSegment {
    pub segment: Segment,
    /// An existing segment with the same name was overwritten.
    pub replaced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedSegment {
    pub name: String,
    pub removed_schedules: usize,
}

// ─── Schedules ──────────────────────────────────────────────────────────────

/// Schedule form as submitted: exactly one of `run_time` / `interval_hours`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleRequest {
    pub segment_name: String,
    pub format: ExportFormat,
    #[serde(default)]
    pub destination: Destination,
    #[serde(default)]
    pub run_time: Option<String>,
    #[serde(default)]
    pub interval_hours: Option<u32>,
}

impl CreateScheduleRequest {
    pub fn trigger(&self) -> AudienceResult<Trigger> {
        let run_time = self
            .run_time
            .as_deref()
            .map(str::parse::<TimeOfDay>)
            .transpose()?;
        Trigger::from_parts(run_time, self.interval_hours)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleCreated {
    pub index: usize,
    pub schedule: Schedule,
}

// ─── Export jobs ────────────────────────────────────────────────────────────

/// Returned as soon as an on-demand export is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportAck {
    pub job_id: Uuid,
    pub segment_name: String,
    pub format: ExportFormat,
    pub destination: Destination,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed { artifact: ArtifactDescriptor },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportJob {
    pub id: Uuid,
    pub segment_name: String,
    pub format: ExportFormat,
    pub accepted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub state: JobState,
}

impl ExportJob {
    pub fn is_finished(&self) -> bool {
        !matches!(self.state, JobState::Running)
    }
}
