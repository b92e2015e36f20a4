//! Destination connectors: external sinks that receive exported rows beyond
//! the local artifact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use audience_core::config::DestinationConfig;
use audience_core::{AudienceError, AudienceResult, ExportFormat};
use tracing::{debug, info};

use crate::format::rows_as_json;

/// Everything a connector may need about one export.
pub struct Delivery<'a> {
    pub segment_name: &'a str,
    pub rows: &'a RecordBatch,
    pub artifact: &'a Path,
    pub format: ExportFormat,
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &'static str;

    /// Upper bound the pipeline allows for one delivery.
    fn timeout(&self) -> Duration;

    async fn deliver(&self, delivery: &Delivery<'_>) -> AudienceResult<()>;
}

fn delivery_error(destination: &str, reason: impl Into<String>) -> AudienceError {
    AudienceError::DestinationDelivery {
        destination: destination.to_string(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// POSTs `{"segment": ..., "exported_rows": n, "rows": [...]}` as JSON.
pub struct WebhookConnector {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookConnector {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers,
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Connector for WebhookConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "webhook"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn deliver(&self, delivery: &Delivery<'_>) -> AudienceResult<()> {
        let body = serde_json::json!({
            "segment": delivery.segment_name,
            "exported_rows": delivery.rows.num_rows(),
            "rows": rows_as_json(delivery.rows)?,
        });

        let mut request = self.client.post(&self.url).json(&body).timeout(self.timeout);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| delivery_error(&self.name, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(delivery_error(&self.name, format!("HTTP {status}")));
        }
        debug!(destination = %self.name, %status, "webhook accepted rows");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Drop directory
// ---------------------------------------------------------------------------

/// Copies the artifact into a drop folder picked up by another system.
pub struct DirectoryConnector {
    name: String,
    path: PathBuf,
    timeout: Duration,
}

impl DirectoryConnector {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connector for DirectoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "directory"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn deliver(&self, delivery: &Delivery<'_>) -> AudienceResult<()> {
        let file_name = delivery
            .artifact
            .file_name()
            .ok_or_else(|| delivery_error(&self.name, "artifact has no file name"))?;
        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(|e| delivery_error(&self.name, e.to_string()))?;
        let target = self.path.join(file_name);
        tokio::fs::copy(delivery.artifact, &target)
            .await
            .map_err(|e| delivery_error(&self.name, e.to_string()))?;
        debug!(destination = %self.name, target = %target.display(), "artifact copied");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Factory & registry
// ---------------------------------------------------------------------------

pub fn create_connector(
    name: &str,
    config: &DestinationConfig,
    default_timeout: Duration,
) -> Arc<dyn Connector> {
    match config {
        DestinationConfig::Webhook {
            url,
            headers,
            timeout_ms,
        } => Arc::new(WebhookConnector::new(
            name,
            url.clone(),
            headers.clone(),
            timeout_ms.map(Duration::from_millis).unwrap_or(default_timeout),
        )),
        DestinationConfig::Directory { path } => {
            Arc::new(DirectoryConnector::new(name, path.clone(), default_timeout))
        }
    }
}

/// Configured connectors by name.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(
        destinations: &HashMap<String, DestinationConfig>,
        default_timeout: Duration,
    ) -> Self {
        let mut registry = Self::new();
        for (name, config) in destinations {
            registry.register(create_connector(name, config, default_timeout));
        }
        info!(count = registry.connectors.len(), "destination connectors registered");
        registry
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.name().to_string(), connector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connectors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::select_rows;
    use audience_core::{Dataset, Mask, PhysicalType, Scalar};

    fn one_row() -> RecordBatch {
        let ds = Dataset::from_rows(&[("Age", PhysicalType::Integer)], vec![vec![Scalar::Int(40)]])
            .unwrap();
        select_rows(&ds, &Mask::all(1)).unwrap()
    }

    #[tokio::test]
    async fn test_directory_connector_copies_artifact() {
        let work = tempfile::tempdir().unwrap();
        let artifact = work.path().join("seniors_20260101_090000.csv");
        std::fs::write(&artifact, b"Age\n40\n").unwrap();

        let drop_dir = work.path().join("drop");
        let connector = DirectoryConnector::new("archive", &drop_dir, Duration::from_secs(1));
        let rows = one_row();
        connector
            .deliver(&Delivery {
                segment_name: "seniors",
                rows: &rows,
                artifact: &artifact,
                format: ExportFormat::Csv,
            })
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(drop_dir.join("seniors_20260101_090000.csv")).unwrap(),
            b"Age\n40\n"
        );
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_delivery_error() {
        // Nothing listens on the discard port.
        let connector = WebhookConnector::new(
            "crm",
            "http://127.0.0.1:9/hook",
            HashMap::new(),
            Duration::from_millis(500),
        );
        let rows = one_row();
        let err = connector
            .deliver(&Delivery {
                segment_name: "seniors",
                rows: &rows,
                artifact: Path::new("unused.csv"),
                format: ExportFormat::Csv,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            AudienceError::DestinationDelivery { destination, .. } if destination == "crm"
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_registry_from_config() {
        let mut destinations = HashMap::new();
        destinations.insert(
            "crm".to_string(),
            DestinationConfig::Webhook {
                url: "https://crm.example.com/ingest".to_string(),
                headers: HashMap::new(),
                timeout_ms: Some(250),
            },
        );
        destinations.insert(
            "archive".to_string(),
            DestinationConfig::Directory {
                path: PathBuf::from("/tmp/drop"),
            },
        );

        let registry = ConnectorRegistry::from_config(&destinations, Duration::from_secs(30));
        assert_eq!(registry.names(), vec!["archive", "crm"]);
        let crm = registry.get("crm").unwrap();
        assert_eq!(crm.kind(), "webhook");
        assert_eq!(crm.timeout(), Duration::from_millis(250));
        assert_eq!(registry.get("archive").unwrap().timeout(), Duration::from_secs(30));
        assert!(!registry.contains("none"));
    }
}
