//! Shared helpers for connector integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kusto_sink_connector::{
    DataFormat, FileSourceInfo, IngestClient, IngestionProperties, IngestionReceipt,
    PartitionWriter, Result, SinkError, TopicPartition, WriterConfig,
};
use tokio::sync::Semaphore;

/// One call the backend saw.
#[derive(Debug, Clone)]
pub struct Submission {
    pub source: FileSourceInfo,
    pub contents: Vec<u8>,
    pub properties: IngestionProperties,
}

impl Submission {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }
}

/// In-process backend that records every accepted file.
///
/// Batches whose first offset is in `fail_offsets` are rejected once. A
/// blocked client holds every call until [`release`](Self::release).
pub struct RecordingIngestClient {
    submissions: Mutex<Vec<Submission>>,
    fail_offsets: Mutex<HashSet<u64>>,
    gate: Option<Semaphore>,
}

impl RecordingIngestClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            submissions: Mutex::new(Vec::new()),
            fail_offsets: Mutex::new(HashSet::new()),
            gate: None,
        })
    }

    pub fn failing_once(offsets: &[u64]) -> Arc<Self> {
        Arc::new(Self {
            submissions: Mutex::new(Vec::new()),
            fail_offsets: Mutex::new(offsets.iter().copied().collect()),
            gate: None,
        })
    }

    pub fn blocked() -> Arc<Self> {
        Arc::new(Self {
            submissions: Mutex::new(Vec::new()),
            fail_offsets: Mutex::new(HashSet::new()),
            gate: Some(Semaphore::new(0)),
        })
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    /// Poll until `n` files were accepted.
    pub async fn wait_for(&self, n: usize) -> Vec<Submission> {
        for _ in 0..500 {
            if self.count() >= n {
                return self.submissions();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} submissions, saw {}", n, self.count());
    }
}

#[async_trait]
impl IngestClient for RecordingIngestClient {
    async fn ingest_from_file(
        &self,
        source: &FileSourceInfo,
        properties: &IngestionProperties,
    ) -> Result<IngestionReceipt> {
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.map_err(|e| SinkError::IngestionFailed {
                file: source.file_name(),
                reason: e.to_string(),
            })?;
            permit.forget();
        }

        if self.fail_offsets.lock().unwrap().remove(&source.offsets.first) {
            return Err(SinkError::IngestionFailed {
                file: source.file_name(),
                reason: "rejected by test backend".to_string(),
            });
        }

        let contents = tokio::fs::read(&source.path).await?;
        self.submissions.lock().unwrap().push(Submission {
            source: source.clone(),
            contents,
            properties: properties.clone(),
        });

        Ok(IngestionReceipt {
            id: source.id,
            blob_path: None,
        })
    }
}

pub fn csv_properties() -> IngestionProperties {
    IngestionProperties::new("telemetry", "Events", DataFormat::Csv)
}

pub fn writer_config(dir: &Path, threshold: u64, interval: Duration) -> WriterConfig {
    WriterConfig::new(TopicPartition::new("events", 0), csv_properties(), dir)
        .with_thresholds(threshold, interval)
}

pub async fn open_writer(config: WriterConfig, client: Arc<dyn IngestClient>) -> PartitionWriter {
    let writer = PartitionWriter::new(config, client).unwrap();
    writer.open().await.unwrap();
    writer
}

/// Files currently in a partition directory.
pub fn files_in(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
        Err(_) => Vec::new(),
    }
}

/// Poll until the writer's committable offset equals `expected`.
pub async fn wait_for_commit(writer: &PartitionWriter, expected: u64) {
    for _ in 0..500 {
        if writer.committable_offset().await == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "committable offset never reached {}, last {:?}",
        expected,
        writer.committable_offset().await
    );
}
