//! AudienceService: wires the dataset, catalog, export pipeline, and schedule
//! runner together and exposes the produced operations.

use std::sync::Arc;
use std::time::Duration;

use audience_core::{
    validate_segment_name, AppConfig, AudienceError, AudienceResult, Clock, Dataset,
    Destination, Schedule, Segment, SegmentDefinition,
};
use audience_export::{ArtifactDescriptor, ConnectorRegistry, ExportPipeline, ExportRequest, Exporter};
use audience_scheduler::{ScheduleRunner, ScheduleStatus, TickReport};
use audience_segmentation::{ColumnInfo, SegmentStats, SegmentationEngine};
use audience_store::{BlobStore, Catalog, FsBlobStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::*;

/// Finished export jobs stay queryable this long.
const FINISHED_JOB_RETENTION_MINUTES: i64 = 60;
/// Upper bound on finished jobs kept at once; the oldest go first.
const MAX_FINISHED_JOBS: usize = 256;

pub struct AudienceService {
    engine: SegmentationEngine,
    catalog: Arc<Catalog>,
    pipeline: Arc<ExportPipeline>,
    runner: Arc<ScheduleRunner>,
    jobs: Arc<DashMap<Uuid, ExportJob>>,
    clock: Arc<dyn Clock>,
}

impl AudienceService {
    /// Service over the filesystem store at `config.store.root`.
    pub async fn bootstrap(
        config: &AppConfig,
        dataset: Arc<Dataset>,
        clock: Arc<dyn Clock>,
    ) -> AudienceResult<Self> {
        let blobs = Arc::new(FsBlobStore::new(config.store.root.clone()));
        Self::with_blob_store(config, dataset, blobs, clock).await
    }

    pub async fn with_blob_store(
        config: &AppConfig,
        dataset: Arc<Dataset>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
    ) -> AudienceResult<Self> {
        let catalog = Arc::new(Catalog::open(blobs).await?);
        let engine = SegmentationEngine::new(dataset);
        let connectors =
            ConnectorRegistry::from_config(&config.destinations, config.delivery_timeout());
        let pipeline = Arc::new(ExportPipeline::new(
            catalog.clone(),
            engine.clone(),
            connectors,
            config.export.output_dir.clone(),
            clock.clone(),
        ));
        let runner = Arc::new(ScheduleRunner::new(
            catalog.clone(),
            pipeline.clone(),
            clock.clone(),
        ));

        info!(
            node_id = %config.node_id,
            rows = engine.dataset().row_count(),
            segments = catalog.segments().len(),
            schedules = catalog.schedules().len(),
            "audience service ready"
        );

        Ok(Self {
            engine,
            catalog,
            pipeline,
            runner,
            jobs: Arc::new(DashMap::new()),
            clock,
        })
    }

    // ─── Dataset ───────────────────────────────────────────────────────────

    pub fn columns(&self) -> Vec<ColumnInfo> {
        self.engine.columns()
    }

    pub fn evaluate(&self, definition: &SegmentDefinition) -> AudienceResult<SegmentStats> {
        self.engine.stats(definition)
    }

    // ─── Segments ──────────────────────────────────────────────────────────

    pub async fn save_segment(&self, req: SaveSegmentRequest) -> AudienceResult<SavedSegment> {
        validate_segment_name(&req.name)?;
        self.engine.validate(&req.definition)?;
        let segment = Segment::new(req.name, req.definition, req.created_by);
        let replaced = self.catalog.save_segment(segment.clone()).await?;
        Ok(SavedSegment { segment, replaced })
    }

    pub async fn delete_segment(&self, name: &str) -> AudienceResult<DeletedSegment> {
        let deletion = self.catalog.delete_segment(name).await?;
        Ok(DeletedSegment {
            name: deletion.segment.name,
            removed_schedules: deletion.schedules.len(),
        })
    }

    /// Sorted by name.
    pub fn list_segments(&self) -> Vec<Segment> {
        self.catalog.segments().list()
    }

    pub fn get_segment(&self, name: &str) -> AudienceResult<Segment> {
        self.catalog
            .segments()
            .get(name)
            .ok_or_else(|| AudienceError::segment_not_found(name))
    }

    // ─── Schedules ─────────────────────────────────────────────────────────

    pub async fn create_schedule(
        &self,
        req: CreateScheduleRequest,
    ) -> AudienceResult<ScheduleCreated> {
        let trigger = req.trigger()?;
        self.check_destination(&req.destination)?;
        let schedule = Schedule::new(req.segment_name, req.format, req.destination, trigger);
        let index = self.catalog.add_schedule(schedule.clone()).await?;
        Ok(ScheduleCreated { index, schedule })
    }

    pub async fn delete_schedule(&self, index: usize) -> AudienceResult<Schedule> {
        self.catalog.delete_schedule(index).await
    }

    /// In store order, each with its run state and next expected run.
    pub fn list_schedules(&self) -> Vec<ScheduleStatus> {
        self.runner.status()
    }

    /// One due-check-and-run pass, outside the background loop.
    pub async fn run_due(&self) -> TickReport {
        self.runner.tick().await
    }

    pub fn spawn_scheduler(&self, period: Duration) -> JoinHandle<()> {
        self.runner.clone().spawn(period)
    }

    // ─── Exports ───────────────────────────────────────────────────────────

    /// Accept an export and run it in the background. Unknown segments and
    /// unconfigured destinations are rejected before anything is spawned.
    /// Finished jobs past their retention are evicted here.
    pub fn export_now(&self, request: ExportRequest) -> AudienceResult<ExportAck> {
        self.check_export(&request)?;
        let now = self.now();
        let evicted = prune_finished_jobs(&self.jobs, now);
        if evicted > 0 {
            debug!(evicted, "evicted finished export jobs");
        }

        let ack = ExportAck {
            job_id: Uuid::new_v4(),
            segment_name: request.segment_name.clone(),
            format: request.format,
            destination: request.destination.clone(),
            accepted_at: now,
        };
        self.jobs.insert(
            ack.job_id,
            ExportJob {
                id: ack.job_id,
                segment_name: ack.segment_name.clone(),
                format: ack.format,
                accepted_at: ack.accepted_at,
                finished_at: None,
                state: JobState::Running,
            },
        );

        let pipeline = self.pipeline.clone();
        let jobs = self.jobs.clone();
        let clock = self.clock.clone();
        let job_id = ack.job_id;
        tokio::spawn(async move {
            let state = match pipeline.export(&request).await {
                Ok(artifact) => JobState::Completed { artifact },
                Err(e) => JobState::Failed {
                    reason: e.to_string(),
                },
            };
            if let Some(mut job) = jobs.get_mut(&job_id) {
                job.finished_at = Some(clock.now().with_timezone(&Utc));
                job.state = state;
            }
        });

        metrics::counter!("exports.accepted").increment(1);
        info!(job = %ack.job_id, segment = %ack.segment_name, format = %ack.format, "export accepted");
        Ok(ack)
    }

    /// A running job, or a finished one still within retention.
    pub fn export_job(&self, id: Uuid) -> Option<ExportJob> {
        self.jobs.get(&id).map(|job| job.value().clone())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now().with_timezone(&Utc)
    }

    /// Run an export to completion on the caller's task.
    pub async fn export_and_wait(&self, request: ExportRequest) -> AudienceResult<ArtifactDescriptor> {
        self.check_export(&request)?;
        self.pipeline.export(&request).await
    }

    fn check_export(&self, request: &ExportRequest) -> AudienceResult<()> {
        if !self.catalog.segments().contains(&request.segment_name) {
            return Err(AudienceError::segment_not_found(&request.segment_name));
        }
        self.check_destination(&request.destination)
    }

    fn check_destination(&self, destination: &Destination) -> AudienceResult<()> {
        match destination.named() {
            Some(name) if !self.pipeline.connectors().contains(name) => {
                warn!(destination = %name, "rejected unknown destination");
                Err(AudienceError::Validation(format!(
                    "destination '{name}' is not configured (known: {})",
                    self.known_destinations()
                )))
            }
            _ => Ok(()),
        }
    }

    fn known_destinations(&self) -> String {
        let names = self.pipeline.connectors().names();
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        }
    }
}

/// Drop finished jobs older than the retention window, then the oldest
/// finished jobs beyond [`MAX_FINISHED_JOBS`]. Running jobs are kept.
fn prune_finished_jobs(jobs: &DashMap<Uuid, ExportJob>, now: DateTime<Utc>) -> usize {
    let before = jobs.len();
    let cutoff = now - chrono::Duration::minutes(FINISHED_JOB_RETENTION_MINUTES);
    jobs.retain(|_, job| job.finished_at.map_or(true, |at| at > cutoff));

    let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
        .iter()
        .filter_map(|job| job.finished_at.map(|at| (at, *job.key())))
        .collect();
    if finished.len() > MAX_FINISHED_JOBS {
        finished.sort();
        let excess = finished.len() - MAX_FINISHED_JOBS;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
        }
    }
    before - jobs.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use audience_core::ExportFormat;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    fn job(accepted_at: DateTime<Utc>, finished_at: Option<DateTime<Utc>>) -> ExportJob {
        ExportJob {
            id: Uuid::new_v4(),
            segment_name: "vip".to_string(),
            format: ExportFormat::Csv,
            accepted_at,
            finished_at,
            state: match finished_at {
                Some(_) => JobState::Failed {
                    reason: "disk full".to_string(),
                },
                None => JobState::Running,
            },
        }
    }

    fn insert(jobs: &DashMap<Uuid, ExportJob>, job: ExportJob) -> Uuid {
        let id = job.id;
        jobs.insert(id, job);
        id
    }

    #[test]
    fn test_prune_drops_expired_finished_jobs_only() {
        let jobs = DashMap::new();
        let long_ago = noon() - chrono::Duration::hours(3);
        let stale = insert(&jobs, job(long_ago, Some(long_ago)));
        let stuck = insert(&jobs, job(long_ago, None));
        let recent = insert(
            &jobs,
            job(noon(), Some(noon() - chrono::Duration::minutes(5))),
        );

        assert_eq!(prune_finished_jobs(&jobs, noon()), 1);
        assert!(!jobs.contains_key(&stale));
        assert!(jobs.contains_key(&stuck));
        assert!(jobs.contains_key(&recent));
    }

    #[test]
    fn test_prune_caps_finished_jobs_keeping_the_newest() {
        let jobs = DashMap::new();
        let mut ids = Vec::new();
        for i in 0..MAX_FINISHED_JOBS + 10 {
            let at = noon() - chrono::Duration::seconds((MAX_FINISHED_JOBS + 10 - i) as i64);
            ids.push(insert(&jobs, job(at, Some(at))));
        }
        let running = insert(&jobs, job(noon(), None));

        assert_eq!(prune_finished_jobs(&jobs, noon()), 10);
        assert_eq!(jobs.len(), MAX_FINISHED_JOBS + 1);
        assert!(ids[..10].iter().all(|id| !jobs.contains_key(id)));
        assert!(ids[10..].iter().all(|id| jobs.contains_key(id)));
        assert!(jobs.contains_key(&running));
    }
}
