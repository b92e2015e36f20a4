//! Segment exports: row materialization, CSV/JSON/Parquet encoding, artifact
//! files, and delivery to configured destinations.

pub mod artifact;
pub mod destination;
pub mod format;
pub mod pipeline;

pub use artifact::{ArtifactDescriptor, DeliveryOutcome};
pub use destination::{
    create_connector, Connector, ConnectorRegistry, Delivery, DirectoryConnector,
    WebhookConnector,
};
pub use pipeline::{ExportPipeline, ExportRequest, Exporter};
