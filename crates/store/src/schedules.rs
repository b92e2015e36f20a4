//! The ordered schedule collection, persisted as a single blob.

use std::sync::Arc;

use audience_core::{AudienceError, AudienceResult, Schedule};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::blob::BlobStore;

const KEY: &str = "schedules.json";

pub struct ScheduleStore {
    blobs: Arc<dyn BlobStore>,
    entries: RwLock<Vec<Schedule>>,
    write: Mutex<()>,
}

impl ScheduleStore {
    pub async fn open(blobs: Arc<dyn BlobStore>) -> AudienceResult<Self> {
        let entries: Vec<Schedule> = match blobs.get(KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        info!(count = entries.len(), "schedule store loaded");
        Ok(Self {
            blobs,
            entries: RwLock::new(entries),
            write: Mutex::new(()),
        })
    }

    /// Snapshot in creation order. Positions are the indices used for deletion.
    pub fn list(&self) -> Vec<Schedule> {
        self.entries.read().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Schedule> {
        self.entries.read().iter().find(|s| s.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Append and return the new entry's index.
    pub async fn append(&self, schedule: Schedule) -> AudienceResult<usize> {
        self.mutate(|entries| {
            entries.push(schedule);
            Ok(entries.len() - 1)
        })
        .await
    }

    pub async fn remove_at(&self, index: usize) -> AudienceResult<Schedule> {
        self.mutate(|entries| {
            if index >= entries.len() {
                return Err(AudienceError::schedule_not_found(index));
            }
            Ok(entries.remove(index))
        })
        .await
    }

    /// Remove every entry bound to `segment_name`, keeping the order of the
    /// rest. Each removed entry comes back with the index it had.
    pub async fn remove_for_segment(
        &self,
        segment_name: &str,
    ) -> AudienceResult<Vec<(usize, Schedule)>> {
        if !self
            .entries
            .read()
            .iter()
            .any(|s| s.segment_name == segment_name)
        {
            return Ok(Vec::new());
        }
        self.mutate(|entries| {
            let mut removed = Vec::new();
            let mut kept = Vec::with_capacity(entries.len());
            for (index, schedule) in std::mem::take(entries).into_iter().enumerate() {
                if schedule.segment_name == segment_name {
                    removed.push((index, schedule));
                } else {
                    kept.push(schedule);
                }
            }
            *entries = kept;
            Ok(removed)
        })
        .await
    }

    /// Put back entries taken by [`Self::remove_for_segment`] at their old
    /// indices. Entries must be in ascending index order.
    pub async fn restore(&self, removed: Vec<(usize, Schedule)>) -> AudienceResult<()> {
        if removed.is_empty() {
            return Ok(());
        }
        self.mutate(|entries| {
            for (index, schedule) in removed {
                let at = index.min(entries.len());
                entries.insert(at, schedule);
            }
            Ok(())
        })
        .await
    }

    /// Stamp a successful run. Returns false when the entry was deleted meanwhile.
    pub async fn record_run(&self, id: Uuid, at: DateTime<Utc>) -> AudienceResult<bool> {
        self.mutate(|entries| {
            Ok(match entries.iter_mut().find(|s| s.id == id) {
                Some(entry) => {
                    entry.last_run = Some(at);
                    true
                }
                None => false,
            })
        })
        .await
    }

    /// Apply `change` to a copy, persist it, then publish it. A failed change
    /// or write leaves both memory and storage untouched.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<Schedule>) -> AudienceResult<T>,
    ) -> AudienceResult<T> {
        let _guard = self.write.lock().await;
        let mut next = self.entries.read().clone();
        let out = change(&mut next)?;

        let bytes = serde_json::to_vec_pretty(&next)?;
        self.blobs.put(KEY, bytes).await?;
        debug!(count = next.len(), "schedule collection persisted");

        *self.entries.write() = next;
        Ok(out)
    }
}
