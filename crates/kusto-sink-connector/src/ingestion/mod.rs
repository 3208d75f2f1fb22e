//! Ingestion-side types: target table properties, data formats, mappings and
//! the client trait the submitter hands finalized files to.
//!
//! ## Formats and mappings
//!
//! | Format                     | Extension | Mapping kind | Mapping required |
//! |----------------------------|-----------|--------------|------------------|
//! | `csv`, `tsv`, `psv`, `txt` | same      | `csv`        | no               |
//! | `json`, `multijson`        | `json`    | `json`       | yes              |
//! | `avro`                     | `avro`    | `avro`       | yes              |
//! | `parquet`                  | `parquet` | `parquet`    | no               |
//! | `orc`                      | `orc`     | `orc`        | no               |

pub mod queued;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SinkError};
use crate::record::{OffsetRange, TopicPartition};

pub use queued::QueuedIngestClient;

/// Data format of the files handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Tsv,
    Psv,
    Txt,
    Json,
    MultiJson,
    Avro,
    Parquet,
    Orc,
}

/// How a format expects record values to look.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    /// One line of text per record.
    DelimitedText,
    /// One JSON document per record.
    Json,
    /// Opaque binary payload written as-is.
    Binary,
}

impl DataFormat {
    /// Parse from a string (case-insensitive).
    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            "tsv" => Ok(DataFormat::Tsv),
            "psv" => Ok(DataFormat::Psv),
            "txt" => Ok(DataFormat::Txt),
            "json" => Ok(DataFormat::Json),
            "multijson" => Ok(DataFormat::MultiJson),
            "avro" => Ok(DataFormat::Avro),
            "parquet" => Ok(DataFormat::Parquet),
            "orc" => Ok(DataFormat::Orc),
            other => Err(SinkError::ConfigError(format!(
                "unknown data format: '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Tsv => "tsv",
            DataFormat::Psv => "psv",
            DataFormat::Txt => "txt",
            DataFormat::Json => "json",
            DataFormat::MultiJson => "multijson",
            DataFormat::Avro => "avro",
            DataFormat::Parquet => "parquet",
            DataFormat::Orc => "orc",
        }
    }

    /// File extension for batch files in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::MultiJson => "json",
            other => other.as_str(),
        }
    }

    pub fn value_class(&self) -> ValueClass {
        match self {
            DataFormat::Csv | DataFormat::Tsv | DataFormat::Psv | DataFormat::Txt => {
                ValueClass::DelimitedText
            }
            DataFormat::Json | DataFormat::MultiJson => ValueClass::Json,
            DataFormat::Avro | DataFormat::Parquet | DataFormat::Orc => ValueClass::Binary,
        }
    }

    /// The mapping kind a mapping must have to be used with this format.
    pub fn mapping_kind(&self) -> MappingKind {
        match self {
            DataFormat::Csv | DataFormat::Tsv | DataFormat::Psv | DataFormat::Txt => {
                MappingKind::Csv
            }
            DataFormat::Json | DataFormat::MultiJson => MappingKind::Json,
            DataFormat::Avro => MappingKind::Avro,
            DataFormat::Parquet => MappingKind::Parquet,
            DataFormat::Orc => MappingKind::Orc,
        }
    }

    /// Whether ingestion needs a named mapping to place columns.
    pub fn requires_mapping(&self) -> bool {
        matches!(
            self,
            DataFormat::Json | DataFormat::MultiJson | DataFormat::Avro
        )
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a table-side ingestion mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
    Csv,
    Json,
    Avro,
    Parquet,
    Orc,
}

impl MappingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingKind::Csv => "csv",
            MappingKind::Json => "json",
            MappingKind::Avro => "avro",
            MappingKind::Parquet => "parquet",
            MappingKind::Orc => "orc",
        }
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named mapping that already exists on the target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionMapping {
    pub reference: String,
    pub kind: MappingKind,
}

impl IngestionMapping {
    pub fn new(reference: impl Into<String>, kind: MappingKind) -> Self {
        Self {
            reference: reference.into(),
            kind,
        }
    }
}

/// Where and how a partition's batches get ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionProperties {
    pub database: String,
    pub table: String,
    pub data_format: DataFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping: Option<IngestionMapping>,
}

impl IngestionProperties {
    pub fn new(database: impl Into<String>, table: impl Into<String>, data_format: DataFormat) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            data_format,
            ingestion_mapping: None,
        }
    }

    pub fn with_mapping(mut self, reference: impl Into<String>, kind: MappingKind) -> Self {
        self.ingestion_mapping = Some(IngestionMapping::new(reference, kind));
        self
    }

    /// Check target names and that the mapping fits the data format.
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(SinkError::ConfigError(
                "ingestion database must not be empty".to_string(),
            ));
        }
        if self.table.trim().is_empty() {
            return Err(SinkError::ConfigError(
                "ingestion table must not be empty".to_string(),
            ));
        }

        match &self.ingestion_mapping {
            Some(mapping) => {
                if mapping.reference.trim().is_empty() {
                    return Err(SinkError::ConfigError(
                        "ingestion mapping reference must not be empty".to_string(),
                    ));
                }
                let expected = self.data_format.mapping_kind();
                if mapping.kind != expected {
                    return Err(SinkError::ConfigError(format!(
                        "mapping '{}' has kind {} but format {} needs kind {}",
                        mapping.reference, mapping.kind, self.data_format, expected
                    )));
                }
            }
            None if self.data_format.requires_mapping() => {
                return Err(SinkError::ConfigError(format!(
                    "format {} requires an ingestion mapping for table '{}'",
                    self.data_format, self.table
                )));
            }
            None => {}
        }

        Ok(())
    }
}

/// A finalized local file ready to be ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSourceInfo {
    /// Source id, stable across resubmissions of the same batch.
    pub id: Uuid,
    pub path: PathBuf,
    pub raw_size_bytes: u64,
    pub topic_partition: TopicPartition,
    pub offsets: OffsetRange,
}

impl FileSourceInfo {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Proof that the backend took ownership of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReceipt {
    pub id: Uuid,
    /// Location of the uploaded copy, if the backend stores one.
    pub blob_path: Option<String>,
}

/// A client for the remote ingestion backend.
///
/// `ingest_from_file` returns once the backend has *accepted* the file; the
/// rows may land in the table much later. Implementations must be safe to
/// share between partition writers.
#[async_trait]
pub trait IngestClient: Send + Sync {
    async fn ingest_from_file(
        &self,
        source: &FileSourceInfo,
        properties: &IngestionProperties,
    ) -> Result<IngestionReceipt>;
}
