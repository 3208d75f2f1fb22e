//! Error types for the Kusto sink connector.
//!
//! One error enum covers the whole write path. Callers use
//! [`SinkError::is_record_error`] to tell per-record problems (recoverable by
//! skipping the record) from writer-level failures (fatal to the writer or the
//! task).

use thiserror::Error;

use crate::record::TopicPartition;

/// Errors that can occur while writing, rolling or ingesting batches.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Invalid or missing configuration, or a writer used before `open()`.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The record value cannot be encoded in the configured data format.
    #[error("Format mismatch: {format} cannot encode a {found} value")]
    FormatMismatch { format: String, found: String },

    /// The record's offset is not past the last offset the writer appended.
    /// Redelivered or reordered records are rejected before touching the batch.
    #[error("Offset {offset} for {topic_partition} is not after last appended offset {last}")]
    OffsetOutOfOrder {
        topic_partition: TopicPartition,
        offset: u64,
        last: u64,
    },

    /// Local file append, close or rename failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The ingestion backend rejected a batch file or could not be reached.
    #[error("Ingestion failed for {file}: {reason}")]
    IngestionFailed { file: String, reason: String },

    /// The writer was closed and accepts no more records.
    #[error("Writer for {0} is closed")]
    WriterClosed(TopicPartition),

    /// A local I/O failure left the writer unusable; it must be rebuilt.
    #[error("Writer for {0} failed and must be recreated")]
    WriterFailed(TopicPartition),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        SinkError::SerializationError(e.to_string())
    }
}

impl SinkError {
    /// True for errors scoped to a single record; the current batch is intact.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            SinkError::FormatMismatch { .. } | SinkError::OffsetOutOfOrder { .. }
        )
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::ConfigError(_) => "config",
            SinkError::FormatMismatch { .. } => "format_mismatch",
            SinkError::OffsetOutOfOrder { .. } => "offset_out_of_order",
            SinkError::IoError(_) => "io",
            SinkError::IngestionFailed { .. } => "ingestion",
            SinkError::WriterClosed(_) => "closed",
            SinkError::WriterFailed(_) => "failed",
            SinkError::SerializationError(_) => "serialization",
        }
    }
}
