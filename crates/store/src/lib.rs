//! Durable segment and schedule persistence over a pluggable blob store.

pub mod blob;
pub mod catalog;
pub mod schedules;
pub mod segments;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use catalog::{Catalog, SegmentDeletion};
pub use schedules::ScheduleStore;
pub use segments::SegmentStore;
