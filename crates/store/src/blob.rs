//! Opaque key → bytes storage underneath the segment and schedule stores.
//!
//! Keys are `/`-separated relative paths such as `segments/young_savers.json`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use audience_core::{AudienceError, AudienceResult};
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Replace the blob at `key`. Readers see either the old or the new bytes.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> AudienceResult<()>;

    async fn get(&self, key: &str) -> AudienceResult<Option<Vec<u8>>>;

    /// Keys directly under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> AudienceResult<Vec<String>>;

    /// Returns whether a blob was removed.
    async fn delete(&self, key: &str) -> AudienceResult<bool>;
}

fn persistence(action: &str, key: &str, err: impl std::fmt::Display) -> AudienceError {
    AudienceError::Persistence(format!("{action} '{key}': {err}"))
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

const TEMP_MARKER: &str = ".tmp-";

/// Blobs as files under a root directory. Writes go to a temp file that is
/// synced and renamed over the target.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> AudienceResult<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(AudienceError::Validation(format!(
                "invalid storage key '{key}'"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> AudienceResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence("create directory for", key, e))?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = path.with_file_name(format!("{file_name}{TEMP_MARKER}{}", Uuid::new_v4()));

        let write = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp, &path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(persistence("write", key, e));
        }

        debug!(key, bytes = bytes.len(), "blob written");
        Ok(())
    }

    async fn get(&self, key: &str) -> AudienceResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence("read", key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> AudienceResult<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let dir = self.path_for(prefix)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence("list", prefix, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| persistence("list", prefix, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_file && !name.contains(TEMP_MARKER) {
                keys.push(format!("{prefix}/{name}"));
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> AudienceResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(persistence("delete", key, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Non-durable store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> AudienceResult<()> {
        self.blobs.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> AudienceResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).map(|b| b.value().clone()))
    }

    async fn list(&self, prefix: &str) -> AudienceResult<Vec<String>> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let mut keys: Vec<String> = self
            .blobs
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.strip_prefix(&dir).is_some_and(|rest| !rest.contains('/')))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> AudienceResult<bool> {
        Ok(self.blobs.remove(key).is_some())
    }
}
