//! Segment and schedule stores behind one write lock, so operations that touch
//! both collections never interleave.

use std::sync::Arc;

use audience_core::{AudienceError, AudienceResult, Schedule, Segment};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::schedules::ScheduleStore;
use crate::segments::SegmentStore;

pub struct Catalog {
    segments: SegmentStore,
    schedules: ScheduleStore,
    write: Mutex<()>,
}

/// What a cascading segment delete removed.
#[derive(Debug, Clone)]
pub struct SegmentDeletion {
    pub segment: Segment,
    pub schedules: Vec<Schedule>,
}

impl Catalog {
    pub async fn open(blobs: Arc<dyn BlobStore>) -> AudienceResult<Self> {
        let segments = SegmentStore::open(blobs.clone()).await?;
        let schedules = ScheduleStore::open(blobs).await?;
        Ok(Self {
            segments,
            schedules,
            write: Mutex::new(()),
        })
    }

    pub fn segments(&self) -> &SegmentStore {
        &self.segments
    }

    pub fn schedules(&self) -> &ScheduleStore {
        &self.schedules
    }

    /// Returns whether an existing segment was overwritten.
    pub async fn save_segment(&self, segment: Segment) -> AudienceResult<bool> {
        let _guard = self.write.lock().await;
        let name = segment.name.clone();
        let replaced = self.segments.save(segment).await?;
        metrics::counter!("segments.saved").increment(1);
        info!(segment = %name, replaced, "segment saved");
        Ok(replaced)
    }

    /// Delete a segment and every schedule bound to it. Schedules go first so
    /// no entry is ever left pointing at a missing segment. If the segment
    /// write then fails, the schedules are put back where they were.
    pub async fn delete_segment(&self, name: &str) -> AudienceResult<SegmentDeletion> {
        let _guard = self.write.lock().await;
        if !self.segments.contains(name) {
            return Err(AudienceError::segment_not_found(name));
        }

        let removed = self.schedules.remove_for_segment(name).await?;
        let segment = match self.segments.delete(name).await {
            Ok(segment) => segment,
            Err(e) => {
                let count = removed.len();
                match self.schedules.restore(removed).await {
                    Ok(()) => warn!(
                        segment = %name,
                        restored_schedules = count,
                        error = %e,
                        "segment delete failed, schedules restored"
                    ),
                    Err(restore) => error!(
                        segment = %name,
                        lost_schedules = count,
                        error = %e,
                        restore_error = %restore,
                        "segment delete failed and schedules could not be restored"
                    ),
                }
                return Err(e);
            }
        };
        let schedules: Vec<Schedule> = removed.into_iter().map(|(_, s)| s).collect();
        metrics::counter!("segments.deleted").increment(1);
        info!(
            segment = %name,
            cascaded_schedules = schedules.len(),
            "segment deleted"
        );
        Ok(SegmentDeletion { segment, schedules })
    }

    /// Append a schedule whose segment exists. Returns its index.
    pub async fn add_schedule(&self, schedule: Schedule) -> AudienceResult<usize> {
        let _guard = self.write.lock().await;
        if !self.segments.contains(&schedule.segment_name) {
            return Err(AudienceError::segment_not_found(&schedule.segment_name));
        }
        let segment = schedule.segment_name.clone();
        let trigger = schedule.trigger;
        let index = self.schedules.append(schedule).await?;
        info!(segment = %segment, %trigger, index, "schedule created");
        Ok(index)
    }

    pub async fn delete_schedule(&self, index: usize) -> AudienceResult<Schedule> {
        let _guard = self.write.lock().await;
        let removed = self.schedules.remove_at(index).await?;
        info!(segment = %removed.segment_name, index, "schedule deleted");
        Ok(removed)
    }

    pub async fn record_run(
        &self,
        id: Uuid,
        at: chrono::DateTime<chrono::Utc>,
    ) -> AudienceResult<bool> {
        self.schedules.record_run(id, at).await
    }
}
