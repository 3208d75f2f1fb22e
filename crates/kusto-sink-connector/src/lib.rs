//! Kusto Sink Connector
//!
//! Moves records from partitioned topics into Kusto (Azure Data Explorer)
//! tables through file-based queued ingestion.
//!
//! ## Architecture
//!
//! - **Writer**: `PartitionWriter` batches one partition's records into files
//!   and rolls them by size, by timer, or on close.
//! - **Submitter**: hands finalized files to an `IngestClient` in background
//!   tasks and tracks which offsets are safe to commit.
//! - **Ingestion**: `IngestClient` trait plus `QueuedIngestClient`, which
//!   uploads to an object store and enqueues an ingestion message.
//! - **Task**: `KustoSinkTask` maps topics to tables, owns a writer per
//!   assigned partition and applies the error policy.
//!
//! ## Delivery
//!
//! At-least-once. An offset becomes committable only after every batch up to
//! it was accepted by the backend.

pub mod batch;
pub mod config;
pub mod encode;
pub mod error;
pub mod ingestion;
pub mod record;
pub mod roll;
pub mod submitter;
pub mod task;
pub mod timer;
pub mod traits;
pub mod writer;

pub use config::{ErrorBehavior, KustoSinkConfig, ShutdownPolicy, TopicMapping, WriterConfig};
pub use error::{Result, SinkError};
pub use ingestion::{
    DataFormat, FileSourceInfo, IngestClient, IngestionMapping, IngestionProperties,
    IngestionReceipt, MappingKind, QueuedIngestClient,
};
pub use record::{OffsetRange, RecordValue, SinkRecord, TopicPartition};
pub use submitter::{IngestionFailure, PendingIngestion};
pub use task::KustoSinkTask;
pub use traits::SinkConnector;
pub use writer::{BatchStats, PartitionWriter, WriterStatus};
