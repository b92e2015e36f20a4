//! Durable segment records, one blob per segment name.

use std::collections::BTreeMap;
use std::sync::Arc;

use audience_core::{validate_segment_name, AudienceError, AudienceResult, Segment};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::blob::BlobStore;

const PREFIX: &str = "segments";

fn key_for(name: &str) -> String {
    format!("{PREFIX}/{name}.json")
}

/// Segments by name. Reads are served from memory; every mutation is
/// persisted before it becomes visible.
pub struct SegmentStore {
    blobs: Arc<dyn BlobStore>,
    segments: RwLock<BTreeMap<String, Segment>>,
    write: Mutex<()>,
}

impl SegmentStore {
    /// Load every persisted segment. Unreadable records, invalid names, and
    /// records whose name does not match their key are skipped with a warning.
    pub async fn open(blobs: Arc<dyn BlobStore>) -> AudienceResult<Self> {
        let mut segments = BTreeMap::new();
        for key in blobs.list(PREFIX).await? {
            let Some(bytes) = blobs.get(&key).await? else {
                continue;
            };
            let segment = match serde_json::from_slice::<Segment>(&bytes) {
                Ok(segment) => segment,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable segment record");
                    continue;
                }
            };
            if let Err(e) = validate_segment_name(&segment.name) {
                warn!(key = %key, error = %e, "skipping segment record with an invalid name");
                continue;
            }
            if key_for(&segment.name) != key {
                warn!(
                    key = %key,
                    segment = %segment.name,
                    "skipping segment record stored under another name's key"
                );
                continue;
            }
            segments.insert(segment.name.clone(), segment);
        }
        info!(count = segments.len(), "segment store loaded");
        Ok(Self {
            blobs,
            segments: RwLock::new(segments),
            write: Mutex::new(()),
        })
    }

    /// All segments ordered by name.
    pub fn list(&self) -> Vec<Segment> {
        self.segments.read().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Segment> {
        self.segments.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.segments.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }

    /// Insert or overwrite by name. Returns whether an existing segment was replaced.
    pub async fn save(&self, segment: Segment) -> AudienceResult<bool> {
        validate_segment_name(&segment.name)?;
        let _guard = self.write.lock().await;

        let bytes = serde_json::to_vec_pretty(&segment)?;
        self.blobs.put(&key_for(&segment.name), bytes).await?;

        let replaced = self
            .segments
            .write()
            .insert(segment.name.clone(), segment)
            .is_some();
        Ok(replaced)
    }

    pub async fn delete(&self, name: &str) -> AudienceResult<Segment> {
        let _guard = self.write.lock().await;
        if !self.contains(name) {
            return Err(AudienceError::segment_not_found(name));
        }

        self.blobs.delete(&key_for(name)).await?;
        self.segments
            .write()
            .remove(name)
            .ok_or_else(|| AudienceError::segment_not_found(name))
    }
}
