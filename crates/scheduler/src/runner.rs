//! Schedule runner: the periodic due-check-and-export loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use audience_core::{Clock, Schedule};
use audience_export::{ExportRequest, Exporter};
use audience_store::Catalog;
use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::trigger::{is_due, next_due, RunState};

/// Outcome of one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub due: usize,
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

/// A schedule entry as seen by operators.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub index: usize,
    #[serde(flatten)]
    pub schedule: Schedule,
    pub state: RunState,
    pub next_due: Option<DateTime<FixedOffset>>,
}

/// Marks an entry as running until dropped, so a cancelled tick never
/// leaves it stuck in that state.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl<'a> RunningGuard<'a> {
    fn enter(running: &'a Mutex<HashSet<Uuid>>, id: Uuid) -> Self {
        running.lock().insert(id);
        Self { running, id }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.id);
    }
}

pub struct ScheduleRunner {
    catalog: Arc<Catalog>,
    exporter: Arc<dyn Exporter>,
    clock: Arc<dyn Clock>,
    running: Mutex<HashSet<Uuid>>,
}

impl ScheduleRunner {
    pub fn new(catalog: Arc<Catalog>, exporter: Arc<dyn Exporter>, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog,
            exporter,
            clock,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Run every due entry once, sequentially and in store order. A failing
    /// entry keeps its `last_run` and is retried on a later tick.
    pub async fn tick(&self) -> TickReport {
        metrics::counter!("scheduler.ticks").increment(1);
        let now = self.clock.now();
        let mut report = TickReport::default();

        for schedule in self.catalog.schedules().list() {
            if !is_due(&schedule.trigger, schedule.last_run, &now) {
                continue;
            }
            report.due += 1;
            match self.run_entry(&schedule, now).await {
                Ok(()) => report.succeeded.push(schedule.id),
                Err(reason) => report.failed.push((schedule.id, reason)),
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "scheduler tick finished"
            );
        } else {
            debug!("scheduler tick: nothing due");
        }
        report
    }

    async fn run_entry(&self, schedule: &Schedule, now: DateTime<FixedOffset>) -> Result<(), String> {
        let guard = RunningGuard::enter(&self.running, schedule.id);
        let request = ExportRequest {
            segment_name: schedule.segment_name.clone(),
            format: schedule.format,
            destination: schedule.destination.clone(),
        };
        let exported = self.exporter.export(&request).await;
        drop(guard);

        let artifact = exported.map_err(|e| {
            metrics::counter!("scheduler.failures").increment(1);
            warn!(
                schedule = %schedule.id,
                segment = %schedule.segment_name,
                error = %e,
                "scheduled export failed; will retry"
            );
            e.to_string()
        })?;

        match self.catalog.record_run(schedule.id, now.with_timezone(&Utc)).await {
            Ok(true) => {}
            Ok(false) => debug!(schedule = %schedule.id, "entry removed while it ran"),
            Err(e) => {
                metrics::counter!("scheduler.failures").increment(1);
                error!(schedule = %schedule.id, error = %e, "could not record last_run");
                return Err(e.to_string());
            }
        }

        metrics::counter!("scheduler.runs").increment(1);
        info!(
            schedule = %schedule.id,
            segment = %schedule.segment_name,
            file = %artifact.file_name,
            rows = artifact.rows,
            "scheduled export done"
        );
        Ok(())
    }

    /// Every entry with its current state and next expected run.
    pub fn status(&self) -> Vec<ScheduleStatus> {
        let now = self.clock.now();
        let running = self.running.lock().clone();
        self.catalog
            .schedules()
            .list()
            .into_iter()
            .enumerate()
            .map(|(index, schedule)| {
                let state = if running.contains(&schedule.id) {
                    RunState::Running
                } else if is_due(&schedule.trigger, schedule.last_run, &now) {
                    RunState::Due
                } else {
                    RunState::Pending
                };
                let next_due = next_due(&schedule.trigger, schedule.last_run, &now);
                ScheduleStatus {
                    index,
                    schedule,
                    state,
                    next_due,
                }
            })
            .collect()
    }

    /// Tick every `period` until the task is aborted.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(period_secs = period.as_secs(), "schedule runner started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use audience_core::{
        AudienceError, AudienceResult, Creator, Destination, ExportFormat, ManualClock, Segment,
        SegmentDefinition, TimeOfDay, Trigger,
    };
    use audience_export::{ArtifactDescriptor, DeliveryOutcome};
    use audience_store::MemoryBlobStore;
    use chrono::TimeZone;

    #[derive(Default)]
    struct FakeExporter {
        calls: Mutex<Vec<String>>,
        failing: Mutex<HashSet<String>>,
        stalled: Mutex<HashSet<String>>,
        entered: tokio::sync::Notify,
    }

    #[async_trait]
    impl Exporter for FakeExporter {
        async fn export(&self, request: &ExportRequest) -> AudienceResult<ArtifactDescriptor> {
            self.calls.lock().push(request.segment_name.clone());
            let stall = self.stalled.lock().contains(&request.segment_name);
            if stall {
                self.entered.notify_one();
                std::future::pending::<()>().await;
            }
            if self.failing.lock().contains(&request.segment_name) {
                return Err(AudienceError::Persistence("disk full".to_string()));
            }
            Ok(ArtifactDescriptor {
                segment_name: request.segment_name.clone(),
                path: format!("/tmp/{}.csv", request.segment_name).into(),
                file_name: format!("{}.csv", request.segment_name),
                format: request.format,
                rows: 1,
                bytes: 10,
                exported_at: Utc::now(),
                delivery: DeliveryOutcome::NotRequested,
            })
        }
    }

    struct Harness {
        catalog: Arc<Catalog>,
        exporter: Arc<FakeExporter>,
        clock: Arc<ManualClock>,
        runner: ScheduleRunner,
    }

    fn nine_am() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 6, 15, 9, 0, 0)
            .unwrap()
    }

    async fn harness(segments: &[&str]) -> Harness {
        let catalog = Arc::new(
            Catalog::open(Arc::new(MemoryBlobStore::new()))
                .await
                .unwrap(),
        );
        for name in segments {
            catalog
                .save_segment(Segment::new(
                    *name,
                    SegmentDefinition::Expression {
                        expression: "Age > 1".to_string(),
                    },
                    Creator::new("Ops", "ops@example.com"),
                ))
                .await
                .unwrap();
        }
        let exporter = Arc::new(FakeExporter::default());
        let clock = Arc::new(ManualClock::new(nine_am()));
        let runner = ScheduleRunner::new(catalog.clone(), exporter.clone(), clock.clone());
        Harness {
            catalog,
            exporter,
            clock,
            runner,
        }
    }

    fn schedule(segment: &str, trigger: Trigger) -> Schedule {
        Schedule::new(segment, ExportFormat::Csv, Destination::None, trigger)
    }

    fn daily_nine() -> Trigger {
        Trigger::Daily {
            run_time: TimeOfDay::new(9, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_daily_entry_fires_once() {
        let h = harness(&["seniors"]).await;
        h.catalog
            .add_schedule(schedule("seniors", daily_nine()))
            .await
            .unwrap();

        let report = h.runner.tick().await;
        assert_eq!(report.succeeded.len(), 1);
        let stamped = h.catalog.schedules().list()[0].last_run;
        assert_eq!(stamped, Some(nine_am().with_timezone(&Utc)));

        h.clock.advance(chrono::Duration::minutes(1));
        let report = h.runner.tick().await;
        assert_eq!(report.due, 0);
        assert_eq!(h.exporter.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_interval_entry_waits_for_full_interval() {
        let h = harness(&["active"]).await;
        let mut entry = schedule("active", Trigger::Interval { interval_hours: 6 });
        entry.last_run = Some((nine_am() - chrono::Duration::hours(5)).with_timezone(&Utc));
        h.catalog.add_schedule(entry).await.unwrap();

        assert_eq!(h.runner.tick().await.due, 0);

        h.clock.advance(chrono::Duration::minutes(61));
        assert_eq!(h.runner.tick().await.succeeded.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_export_is_retried_next_tick() {
        let h = harness(&["flaky"]).await;
        h.catalog
            .add_schedule(schedule("flaky", Trigger::Interval { interval_hours: 1 }))
            .await
            .unwrap();
        h.exporter.failing.lock().insert("flaky".to_string());

        let report = h.runner.tick().await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(h.catalog.schedules().list()[0].last_run, None);

        h.exporter.failing.lock().clear();
        h.clock.advance(chrono::Duration::minutes(1));
        let report = h.runner.tick().await;
        assert_eq!(report.succeeded.len(), 1);
        assert!(h.catalog.schedules().list()[0].last_run.is_some());
    }

    #[tokio::test]
    async fn test_one_bad_entry_does_not_stop_the_rest() {
        let h = harness(&["broken", "healthy"]).await;
        h.catalog
            .add_schedule(schedule("broken", daily_nine()))
            .await
            .unwrap();
        h.catalog
            .add_schedule(schedule("healthy", daily_nine()))
            .await
            .unwrap();
        h.exporter.failing.lock().insert("broken".to_string());

        let report = h.runner.tick().await;
        assert_eq!(report.due, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(*h.exporter.calls.lock(), vec!["broken", "healthy"]);
    }

    #[tokio::test]
    async fn test_status_reports_state_and_next_due() {
        let h = harness(&["seniors"]).await;
        h.catalog
            .add_schedule(schedule("seniors", daily_nine()))
            .await
            .unwrap();

        let status = h.runner.status();
        assert_eq!(status[0].state, RunState::Due);
        assert_eq!(status[0].next_due, Some(nine_am()));

        h.runner.tick().await;
        let status = h.runner.status();
        assert_eq!(status[0].state, RunState::Pending);
        assert_eq!(status[0].next_due, Some(nine_am() + chrono::Duration::days(1)));
    }

    #[tokio::test]
    async fn test_cancelled_tick_clears_running_state() {
        let h = harness(&["slow"]).await;
        h.catalog
            .add_schedule(schedule("slow", daily_nine()))
            .await
            .unwrap();
        h.exporter.stalled.lock().insert("slow".to_string());

        {
            let tick = h.runner.tick();
            tokio::pin!(tick);
            tokio::select! {
                _ = &mut tick => panic!("stalled export returned"),
                _ = h.exporter.entered.notified() => {}
            }
            assert_eq!(h.runner.status()[0].state, RunState::Running);
        }

        let status = h.runner.status();
        assert_eq!(status[0].state, RunState::Due);
        assert_eq!(status[0].schedule.last_run, None);
    }
}
