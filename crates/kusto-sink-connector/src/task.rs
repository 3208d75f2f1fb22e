//! Kusto sink task
//!
//! The connector surface: one [`PartitionWriter`] per assigned partition,
//! routing of `put` batches, the error policy and offset reporting.
//!
//! ## Error policy
//!
//! | `behavior.on.error` | Record error (format, offset)  | Ingestion failure                 |
//! |---------------------|--------------------------------|-----------------------------------|
//! | `fail`              | `put` fails                    | `put`/`flush` fail until resolved |
//! | `ignore`            | logged, record skipped         | logged, batch skipped             |
//!
//! Under `fail`, unresolved failures stay in [`KustoSinkTask::failures`] and
//! keep their partition's commit offset from moving until
//! [`retry_failures`](KustoSinkTask::retry_failures) or
//! [`skip_failures`](KustoSinkTask::skip_failures) resolves them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ErrorBehavior, KustoSinkConfig};
use crate::error::{Result, SinkError};
use crate::ingestion::IngestClient;
use crate::record::{SinkRecord, TopicPartition};
use crate::submitter::IngestionFailure;
use crate::traits::SinkConnector;
use crate::writer::PartitionWriter;

pub struct KustoSinkTask {
    name: String,
    config: KustoSinkConfig,
    client: Arc<dyn IngestClient>,
    writers: HashMap<TopicPartition, PartitionWriter>,
    failures: Vec<IngestionFailure>,
    started: bool,
}

impl KustoSinkTask {
    /// Create a task from the connector's config map.
    pub fn new(
        name: &str,
        config_map: &HashMap<String, String>,
        client: Arc<dyn IngestClient>,
    ) -> Result<Self> {
        let config = KustoSinkConfig::from_config_map(config_map)?;
        Ok(Self::with_config(name, config, client))
    }

    /// Create with an already-parsed config.
    pub fn with_config(name: &str, config: KustoSinkConfig, client: Arc<dyn IngestClient>) -> Self {
        Self {
            name: name.to_string(),
            config,
            client,
            writers: HashMap::new(),
            failures: Vec::new(),
            started: false,
        }
    }

    pub fn config(&self) -> &KustoSinkConfig {
        &self.config
    }

    pub fn writer(&self, tp: &TopicPartition) -> Option<&PartitionWriter> {
        self.writers.get(tp)
    }

    pub fn assignment(&self) -> Vec<TopicPartition> {
        let mut partitions: Vec<_> = self.writers.keys().cloned().collect();
        partitions.sort();
        partitions
    }

    /// Unresolved ingestion failures.
    pub fn failures(&self) -> &[IngestionFailure] {
        &self.failures
    }

    /// Open writers for newly assigned partitions. Already assigned
    /// partitions are left as they are.
    pub async fn open(&mut self, partitions: &[TopicPartition]) -> Result<()> {
        if !self.started {
            return Err(SinkError::ConfigError(format!(
                "task '{}' must be started before opening partitions",
                self.name
            )));
        }

        for tp in partitions {
            if self.writers.contains_key(tp) {
                continue;
            }
            let writer = PartitionWriter::new(self.config.writer_config(tp)?, Arc::clone(&self.client))?;
            writer.open().await?;
            self.writers.insert(tp.clone(), writer);
        }

        tracing::info!(
            task = %self.name,
            assigned = self.writers.len(),
            "Partitions opened"
        );
        Ok(())
    }

    /// Write a batch of records to their partition writers.
    async fn write_all(&mut self, records: &[SinkRecord]) -> Result<()> {
        self.collect_failures().await?;

        for record in records {
            let tp = record.topic_partition();
            let writer = self.writers.get(&tp).ok_or_else(|| {
                SinkError::ConfigError(format!("partition {} is not assigned to task '{}'", tp, self.name))
            })?;

            match writer.write_record(record).await {
                Ok(_) => {}
                Err(e) if e.is_record_error() && self.config.behavior_on_error == ErrorBehavior::Ignore => {
                    tracing::warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Skipping record"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.collect_failures().await
    }

    /// Offsets safe to commit per partition. Partitions with nothing accepted
    /// yet are omitted.
    pub async fn pre_commit(&mut self) -> HashMap<TopicPartition, u64> {
        if let Err(e) = self.collect_failures().await {
            tracing::warn!(task = %self.name, error = %e, "Commit held back by failed ingestions");
        }

        let mut offsets = HashMap::new();
        for (tp, writer) in &self.writers {
            if let Some(offset) = writer.committable_offset().await {
                offsets.insert(tp.clone(), offset);
            }
        }
        offsets
    }

    /// Resubmit every unresolved failure. Returns how many were resubmitted.
    pub async fn retry_failures(&mut self) -> Result<usize> {
        let failures = std::mem::take(&mut self.failures);
        let count = failures.len();
        for failure in failures {
            match self.writers.get(&failure.pending.topic_partition) {
                Some(writer) => writer.resubmit(failure.pending).await?,
                None => tracing::warn!(
                    partition = %failure.pending.topic_partition,
                    "Dropping failure of unassigned partition"
                ),
            }
        }
        Ok(count)
    }

    /// Give up on every unresolved failure so commit can advance.
    pub async fn skip_failures(&mut self) -> Result<usize> {
        let failures = std::mem::take(&mut self.failures);
        let count = failures.len();
        for failure in &failures {
            if let Some(writer) = self.writers.get(&failure.pending.topic_partition) {
                writer.skip_failed(&failure.pending).await?;
            }
        }
        Ok(count)
    }

    /// Close and forget the writers of revoked partitions.
    pub async fn close(&mut self, partitions: &[TopicPartition]) -> Result<()> {
        let mut first_error = None;
        for tp in partitions {
            if let Some(writer) = self.writers.remove(tp) {
                if let Err(e) = writer.close().await {
                    tracing::error!(partition = %tp, error = %e, "Failed to close writer");
                    first_error.get_or_insert(e);
                }
            }
        }
        self.failures
            .retain(|f| !partitions.contains(&f.pending.topic_partition));

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Pull newly reported failures from every writer and apply the error
    /// policy.
    async fn collect_failures(&mut self) -> Result<()> {
        for writer in self.writers.values() {
            for failure in writer.take_failures().await {
                match self.config.behavior_on_error {
                    ErrorBehavior::Ignore => {
                        tracing::warn!(
                            partition = %failure.pending.topic_partition,
                            offsets = %failure.pending.offsets,
                            error = %failure.error,
                            "Ignoring failed ingestion"
                        );
                        writer.skip_failed(&failure.pending).await?;
                    }
                    ErrorBehavior::Fail => self.failures.push(failure),
                }
            }
        }

        match self.failures.first() {
            Some(failure) => Err(failure.clone().into_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SinkConnector for KustoSinkTask {
    async fn start(&mut self) -> Result<()> {
        kusto_sink_observability::init();
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        self.started = true;
        tracing::info!(
            task = %self.name,
            temp_dir = ?self.config.temp_dir,
            topics = self.config.topics.len(),
            "Kusto sink task started"
        );
        Ok(())
    }

    async fn put(&mut self, records: &[SinkRecord]) -> Result<()> {
        self.write_all(records).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.collect_failures().await
    }

    async fn stop(&mut self) -> Result<()> {
        let partitions = self.assignment();
        let result = self.close(&partitions).await;
        self.started = false;
        tracing::info!(task = %self.name, "Kusto sink task stopped");
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
