//! Kusto Sink Local Runner
//!
//! Reads lines from stdin as the records of one partition and writes them
//! through a `PartitionWriter` into a local-filesystem object store laid out
//! like queued ingestion (blobs plus `ingestion-queue/` messages).
//!
//! # Environment Variables
//!
//! - `KUSTO_SINK_TOPIC`: Source topic name (default: stdin)
//! - `KUSTO_SINK_PARTITION`: Partition number (default: 0)
//! - `KUSTO_SINK_DATABASE`: Target database (default: local)
//! - `KUSTO_SINK_TABLE`: Target table (default: Records)
//! - `KUSTO_SINK_FORMAT`: Data format (default: csv)
//! - `KUSTO_SINK_MAPPING`: Ingestion mapping reference (optional)
//! - `KUSTO_SINK_TEMP_DIR`: Batch file directory (default: ./data/batches)
//! - `KUSTO_SINK_STORE_DIR`: Object store root (default: ./data/store)
//! - `KUSTO_SINK_FLUSH_BYTES`: File threshold (default: 1048576)
//! - `KUSTO_SINK_FLUSH_INTERVAL_MS`: Flush interval (default: 300000)
//!
//! # Example
//!
//! ```bash
//! export KUSTO_SINK_FLUSH_BYTES=4096
//! printf 'a,1\nb,2\n' | cargo run --bin kusto-sink-local
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kusto_sink_connector::{
    DataFormat, IngestionProperties, PartitionWriter, QueuedIngestClient, SinkRecord,
    TopicPartition, WriterConfig,
};
use kusto_sink_observability::{logging, metrics};
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {}", key)),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_from_env();
    metrics::init();

    let topic = env_or("KUSTO_SINK_TOPIC", "stdin");
    let partition: u32 = env_parse("KUSTO_SINK_PARTITION", 0)?;
    let format = DataFormat::from_str_config(&env_or("KUSTO_SINK_FORMAT", "csv"))?;
    let temp_dir = env_or("KUSTO_SINK_TEMP_DIR", "./data/batches");
    let store_dir = env_or("KUSTO_SINK_STORE_DIR", "./data/store");
    let flush_bytes: u64 = env_parse("KUSTO_SINK_FLUSH_BYTES", 1024 * 1024)?;
    let flush_interval_ms: u64 = env_parse("KUSTO_SINK_FLUSH_INTERVAL_MS", 300_000)?;

    let mut properties = IngestionProperties::new(
        env_or("KUSTO_SINK_DATABASE", "local"),
        env_or("KUSTO_SINK_TABLE", "Records"),
        format,
    );
    if let Ok(mapping) = std::env::var("KUSTO_SINK_MAPPING") {
        properties = properties.with_mapping(mapping, format.mapping_kind());
    }

    tokio::fs::create_dir_all(&store_dir)
        .await
        .with_context(|| format!("creating {}", store_dir))?;
    let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(&store_dir)?);
    let client = Arc::new(QueuedIngestClient::new(store, ""));

    let tp = TopicPartition::new(topic.clone(), partition);
    let config = WriterConfig::new(tp, properties, &temp_dir)
        .with_thresholds(flush_bytes, Duration::from_millis(flush_interval_ms));
    let writer = PartitionWriter::new(config, client)?;
    writer.open().await?;

    info!(
        topic = %topic,
        partition,
        format = %format,
        temp_dir = %temp_dir,
        store_dir = %store_dir,
        "Reading records from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut offset = 0u64;
    while let Some(line) = lines.next_line().await? {
        let record = SinkRecord::new(topic.clone(), partition, offset, line);
        if let Some(rolled) = writer.write_record(&record).await? {
            info!(offsets = %rolled, "Batch submitted");
        }
        offset += 1;
    }

    writer.close().await?;

    for failure in writer.take_failures().await {
        tracing::error!(
            file = ?failure.pending.file,
            error = %failure.error,
            "Ingestion failed"
        );
    }

    info!(
        records = offset,
        committable = ?writer.committable_offset().await,
        "Done"
    );

    Ok(())
}
