//! End-to-end: partition writer → queued ingest client → in-memory object store.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{open_writer, writer_config};
use kusto_sink_connector::ingestion::queued::IngestionMessage;
use kusto_sink_connector::{
    DataFormat, FileSourceInfo, IngestClient, IngestionProperties, IngestionReceipt, MappingKind,
    QueuedIngestClient, Result, SinkRecord, TopicPartition, WriterConfig,
};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde_json::json;
use tempfile::TempDir;

/// Forwards to a queued client and keeps the receipts.
struct Tap {
    inner: QueuedIngestClient,
    receipts: Mutex<Vec<IngestionReceipt>>,
}

#[async_trait]
impl IngestClient for Tap {
    async fn ingest_from_file(
        &self,
        source: &FileSourceInfo,
        properties: &IngestionProperties,
    ) -> Result<IngestionReceipt> {
        let receipt = self.inner.ingest_from_file(source, properties).await?;
        self.receipts.lock().unwrap().push(receipt.clone());
        Ok(receipt)
    }
}

async fn read(store: &Arc<dyn ObjectStore>, key: &str) -> Vec<u8> {
    store
        .get(&ObjectPath::from(key))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_rolled_batches_land_in_store_with_queue_messages() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let tap = Arc::new(Tap {
        inner: QueuedIngestClient::new(Arc::clone(&store), "/ingest/"),
        receipts: Mutex::new(Vec::new()),
    });

    let config = writer_config(dir.path(), 10, Duration::from_secs(600));
    let writer = open_writer(config, tap.clone()).await;
    for (offset, value) in ["row,1", "row,2", "row,3"].iter().enumerate() {
        writer
            .write_record(&SinkRecord::new("events", 0, offset as u64, *value))
            .await
            .unwrap();
    }
    writer.close().await.unwrap();

    let receipts = tap.receipts.lock().unwrap().clone();
    assert_eq!(receipts.len(), 2);

    let mut messages = Vec::new();
    for receipt in &receipts {
        let blob_path = receipt.blob_path.clone().unwrap();
        assert!(blob_path.starts_with("ingest/telemetry/Events/kafka_events_0_"));

        let key = format!("ingest/ingestion-queue/{}.json", receipt.id);
        let message: IngestionMessage = serde_json::from_slice(&read(&store, &key).await).unwrap();
        assert_eq!(message.blob_path, blob_path);
        assert_eq!(message.database_name, "telemetry");
        assert_eq!(message.table_name, "Events");
        assert_eq!(message.format, "csv");

        let blob = read(&store, &blob_path).await;
        assert_eq!(blob.len() as u64, message.raw_data_size);
        messages.push((message, blob));
    }

    messages.sort_by_key(|(m, _)| m.first_offset);
    assert_eq!(messages[0].1, b"row,1\nrow,2\n".to_vec());
    assert_eq!((messages[1].0.first_offset, messages[1].0.last_offset), (2, 2));
    assert_eq!(writer.committable_offset().await, Some(3));
}

#[tokio::test]
async fn test_json_batches_carry_mapping_reference() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let tap = Arc::new(Tap {
        inner: QueuedIngestClient::new(Arc::clone(&store), "ingest"),
        receipts: Mutex::new(Vec::new()),
    });

    let properties = IngestionProperties::new("telemetry", "Clicks", DataFormat::Json)
        .with_mapping("clicks_mapping", MappingKind::Json);
    let config = WriterConfig::new(TopicPartition::new("clicks", 2), properties, dir.path())
        .with_thresholds(1024, Duration::ZERO);
    let writer = open_writer(config, tap.clone()).await;

    writer
        .write_record(&SinkRecord::new("clicks", 2, 41, json!({"user": "u1", "n": 3})))
        .await
        .unwrap();
    writer.close().await.unwrap();

    let receipt = tap.receipts.lock().unwrap()[0].clone();
    let blob_path = receipt.blob_path.unwrap();
    assert!(blob_path.ends_with(".json"));

    let message: IngestionMessage = serde_json::from_slice(
        &read(&store, &format!("ingest/ingestion-queue/{}.json", receipt.id)).await,
    )
    .unwrap();
    assert_eq!(message.format, "json");
    assert_eq!(
        message.ingestion_mapping_reference.as_deref(),
        Some("clicks_mapping")
    );
    assert_eq!(message.source_partition, 2);

    let blob: serde_json::Value =
        serde_json::from_slice(&read(&store, &blob_path).await).unwrap();
    assert_eq!(blob, json!({"user": "u1", "n": 3}));
    assert_eq!(writer.committable_offset().await, Some(42));
}
