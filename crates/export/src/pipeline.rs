//! Export pipeline: resolve segment → evaluate mask → materialize rows →
//! encode → write artifact → optionally deliver to a connector.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use audience_core::{
    AudienceError, AudienceResult, Clock, Destination, ExportFormat, SegmentDefinition,
};
use audience_segmentation::SegmentationEngine;
use audience_store::Catalog;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifact::{artifact_stem, write_artifact, ArtifactDescriptor, DeliveryOutcome};
use crate::destination::{ConnectorRegistry, Delivery};
use crate::format::{encode, select_rows};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub segment_name: String,
    pub format: ExportFormat,
    #[serde(default)]
    pub destination: Destination,
}

/// Anything that can turn an export request into an artifact. The scheduler
/// depends on this rather than on the concrete pipeline.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, request: &ExportRequest) -> AudienceResult<ArtifactDescriptor>;
}

pub struct ExportPipeline {
    catalog: Arc<Catalog>,
    engine: SegmentationEngine,
    connectors: ConnectorRegistry,
    output_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl ExportPipeline {
    pub fn new(
        catalog: Arc<Catalog>,
        engine: SegmentationEngine,
        connectors: ConnectorRegistry,
        output_dir: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            engine,
            connectors,
            output_dir: output_dir.into(),
            clock,
        }
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    async fn run(&self, request: &ExportRequest) -> AudienceResult<ArtifactDescriptor> {
        let segment = self
            .catalog
            .segments()
            .get(&request.segment_name)
            .ok_or_else(|| AudienceError::segment_not_found(&request.segment_name))?;

        let (batch, bytes) = self.materialize(segment.definition, request.format).await?;

        let at = self.clock.now();
        let stem = artifact_stem(&request.segment_name, &at);
        let path = write_artifact(&self.output_dir, &stem, request.format, &bytes).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let delivery = match &request.destination {
            Destination::None => DeliveryOutcome::NotRequested,
            Destination::Named(name) => {
                self.deliver(
                    name,
                    &Delivery {
                        segment_name: &request.segment_name,
                        rows: &batch,
                        artifact: &path,
                        format: request.format,
                    },
                )
                .await
            }
        };

        Ok(ArtifactDescriptor {
            segment_name: request.segment_name.clone(),
            path,
            file_name,
            format: request.format,
            rows: batch.num_rows(),
            bytes: bytes.len() as u64,
            exported_at: at.with_timezone(&Utc),
            delivery,
        })
    }

    /// Evaluation and encoding are CPU-bound; keep them off the async workers.
    async fn materialize(
        &self,
        definition: SegmentDefinition,
        format: ExportFormat,
    ) -> AudienceResult<(arrow::record_batch::RecordBatch, Vec<u8>)> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || -> AudienceResult<_> {
            let mask = engine.evaluate(&definition)?;
            let batch = select_rows(engine.dataset(), &mask)?;
            let bytes = encode(format, &batch)?;
            Ok((batch, bytes))
        })
        .await
        .map_err(|e| AudienceError::Internal(anyhow::anyhow!("export task failed: {e}")))?
    }

    /// Best effort: failures are reported in the outcome, never as an error.
    async fn deliver(&self, name: &str, delivery: &Delivery<'_>) -> DeliveryOutcome {
        let Some(connector) = self.connectors.get(name) else {
            metrics::counter!("destinations.failed").increment(1);
            return DeliveryOutcome::Failed {
                destination: name.to_string(),
                reason: "destination is not configured".to_string(),
            };
        };

        let timeout = connector.timeout();
        let result = match tokio::time::timeout(timeout, connector.deliver(delivery)).await {
            Ok(result) => result,
            Err(_) => Err(AudienceError::DestinationDelivery {
                destination: name.to_string(),
                reason: format!("timed out after {}ms", timeout.as_millis()),
            }),
        };

        match result {
            Ok(()) => {
                metrics::counter!("destinations.delivered").increment(1);
                info!(destination = %name, kind = connector.kind(), "rows delivered");
                DeliveryOutcome::Delivered {
                    destination: name.to_string(),
                }
            }
            Err(e) => {
                metrics::counter!("destinations.failed").increment(1);
                warn!(destination = %name, error = %e, "delivery failed; artifact kept");
                DeliveryOutcome::Failed {
                    destination: name.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl Exporter for ExportPipeline {
    async fn export(&self, request: &ExportRequest) -> AudienceResult<ArtifactDescriptor> {
        match self.run(request).await {
            Ok(artifact) => {
                metrics::counter!("exports.completed").increment(1);
                metrics::counter!("exports.rows").increment(artifact.rows as u64);
                info!(
                    segment = %artifact.segment_name,
                    file = %artifact.file_name,
                    format = %artifact.format,
                    rows = artifact.rows,
                    bytes = artifact.bytes,
                    "export completed"
                );
                Ok(artifact)
            }
            Err(e) => {
                metrics::counter!("exports.failed").increment(1);
                warn!(segment = %request.segment_name, error = %e, "export failed");
                Err(e)
            }
        }
    }
}
