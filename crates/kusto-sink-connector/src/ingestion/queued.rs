//! Queued ingestion over an object store.
//!
//! Ingestion happens in two steps: the batch file is uploaded next to the
//! other blobs of its target table, then an ingestion message describing the
//! blob is written to the queue prefix. The backend's data-management service
//! picks messages up asynchronously, so a successful return only means the
//! file was accepted.
//!
//! ```text
//! <prefix>/<database>/<table>/<file name>          ← batch contents
//! <prefix>/ingestion-queue/<source id>.json        ← ingestion message
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FileSourceInfo, IngestClient, IngestionProperties, IngestionReceipt};
use crate::error::{Result, SinkError};

/// Queue prefix under which ingestion messages are written.
pub const QUEUE_DIR: &str = "ingestion-queue";

/// Message posted to the ingestion queue for one uploaded blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngestionMessage {
    pub id: Uuid,
    pub blob_path: String,
    pub raw_data_size: u64,
    pub database_name: String,
    pub table_name: String,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping_kind: Option<String>,
    pub source_topic: String,
    pub source_partition: u32,
    pub first_offset: u64,
    pub last_offset: u64,
    pub created_at: DateTime<Utc>,
}

/// [`IngestClient`] that stages files in an object store and enqueues them.
///
/// Cloning is cheap; one client is shared by every partition writer.
#[derive(Clone)]
pub struct QueuedIngestClient {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl QueuedIngestClient {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { store, prefix }
    }

    fn join(&self, parts: &[&str]) -> String {
        let mut key = self.prefix.clone();
        for part in parts {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(part);
        }
        key
    }

    /// Object key for the uploaded copy of a batch file.
    pub fn blob_key(&self, source: &FileSourceInfo, properties: &IngestionProperties) -> String {
        self.join(&[&properties.database, &properties.table, &source.file_name()])
    }

    /// Object key of the queue message for a source id.
    pub fn message_key(&self, id: &Uuid) -> String {
        self.join(&[QUEUE_DIR, &format!("{}.json", id)])
    }
}

#[async_trait]
impl IngestClient for QueuedIngestClient {
    async fn ingest_from_file(
        &self,
        source: &FileSourceInfo,
        properties: &IngestionProperties,
    ) -> Result<IngestionReceipt> {
        let data = tokio::fs::read(&source.path).await?;
        let raw_data_size = data.len() as u64;

        let blob_key = self.blob_key(source, properties);
        self.store
            .put(&ObjectPath::from(blob_key.as_str()), Bytes::from(data))
            .await
            .map_err(|e| SinkError::IngestionFailed {
                file: source.file_name(),
                reason: format!("blob upload failed: {}", e),
            })?;

        let message = IngestionMessage {
            id: source.id,
            blob_path: blob_key.clone(),
            raw_data_size,
            database_name: properties.database.clone(),
            table_name: properties.table.clone(),
            format: properties.data_format.as_str().to_string(),
            ingestion_mapping_reference: properties
                .ingestion_mapping
                .as_ref()
                .map(|m| m.reference.clone()),
            ingestion_mapping_kind: properties
                .ingestion_mapping
                .as_ref()
                .map(|m| m.kind.as_str().to_string()),
            source_topic: source.topic_partition.topic.clone(),
            source_partition: source.topic_partition.partition,
            first_offset: source.offsets.first,
            last_offset: source.offsets.last,
            created_at: Utc::now(),
        };
        let body = serde_json::to_vec(&message)?;

        self.store
            .put(
                &ObjectPath::from(self.message_key(&source.id).as_str()),
                Bytes::from(body),
            )
            .await
            .map_err(|e| SinkError::IngestionFailed {
                file: source.file_name(),
                reason: format!("enqueue failed: {}", e),
            })?;

        tracing::debug!(
            id = %source.id,
            blob = %blob_key,
            size = raw_data_size,
            database = %properties.database,
            table = %properties.table,
            "Queued file for ingestion"
        );

        Ok(IngestionReceipt {
            id: source.id,
            blob_path: Some(blob_key),
        })
    }
}
