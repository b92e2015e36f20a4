//! Artifact naming, exclusive file creation, and the descriptor reported to callers.

use std::path::{Path, PathBuf};

use audience_core::{AudienceError, AudienceResult, ExportFormat};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// Upper bound on `_n` suffixes tried for one second's worth of exports.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// What happened to the rows beyond the local artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    NotRequested,
    Delivered { destination: String },
    Failed { destination: String, reason: String },
}

impl DeliveryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub segment_name: String,
    pub path: PathBuf,
    pub file_name: String,
    pub format: ExportFormat,
    pub rows: usize,
    pub bytes: u64,
    pub exported_at: DateTime<Utc>,
    pub delivery: DeliveryOutcome,
}

/// `{segment}_{YYYYMMDD_HHMMSS}` in the clock's local time.
pub fn artifact_stem<Tz: TimeZone>(segment_name: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{segment_name}_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Create `{stem}.{ext}` in `dir`, falling back to `{stem}_1.{ext}`,
/// `{stem}_2.{ext}`, ... when a same-second export already claimed the name.
/// Existing files are never overwritten.
pub async fn write_artifact(
    dir: &Path,
    stem: &str,
    format: ExportFormat,
    bytes: &[u8],
) -> AudienceResult<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AudienceError::Persistence(format!("create {}: {e}", dir.display())))?;

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = match attempt {
            0 => format!("{stem}.{}", format.extension()),
            n => format!("{stem}_{n}.{}", format.extension()),
        };
        let path = dir.join(&name);
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(AudienceError::Persistence(format!(
                    "create {}: {e}",
                    path.display()
                )))
            }
        };

        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        };
        if let Err(e) = written.await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(AudienceError::Persistence(format!(
                "write {}: {e}",
                path.display()
            )));
        }
        return Ok(path);
    }

    Err(AudienceError::Persistence(format!(
        "no free artifact name for '{stem}' after {MAX_NAME_ATTEMPTS} attempts"
    )))
}
