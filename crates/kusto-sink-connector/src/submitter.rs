//! Ingestion submission and offset tracking.
//!
//! ## Submission flow
//!
//! ```text
//! roll (under writer lock)
//!     ↓
//! OffsetTracker.register(range)   ← blocks commit past this batch
//!     ↓
//! tokio::spawn ─→ IngestClient.ingest_from_file()
//!                     ↓ Ok                    ↓ Err
//!               tracker.accept(range)    tracker.fail(range)
//!               delete local file        failure → error channel
//! ```
//!
//! The submitter never retries. A failed batch keeps its local file and keeps
//! blocking commit until the caller resubmits or skips it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use kusto_sink_observability::metrics;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::batch::FinalizedBatch;
use crate::config::ShutdownPolicy;
use crate::error::{Result, SinkError};
use crate::ingestion::{FileSourceInfo, IngestClient, IngestionProperties};
use crate::record::{OffsetRange, TopicPartition};

/// A finalized batch in flight to (or rejected by) the backend. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingIngestion {
    pub id: Uuid,
    pub topic_partition: TopicPartition,
    pub file: PathBuf,
    pub size_bytes: u64,
    pub record_count: u64,
    pub offsets: OffsetRange,
    pub properties: Arc<IngestionProperties>,
}

impl PendingIngestion {
    pub fn new(batch: FinalizedBatch, properties: Arc<IngestionProperties>) -> Self {
        Self {
            id: batch.id,
            topic_partition: batch.topic_partition,
            file: batch.path,
            size_bytes: batch.size_bytes,
            record_count: batch.record_count,
            offsets: batch.offsets,
            properties,
        }
    }

    pub fn source_info(&self) -> FileSourceInfo {
        FileSourceInfo {
            id: self.id,
            path: self.file.clone(),
            raw_size_bytes: self.size_bytes,
            topic_partition: self.topic_partition.clone(),
            offsets: self.offsets,
        }
    }
}

/// A submission the backend rejected or never answered.
#[derive(Debug, Clone)]
pub struct IngestionFailure {
    pub pending: PendingIngestion,
    pub error: String,
}

impl IngestionFailure {
    pub fn into_error(self) -> SinkError {
        SinkError::IngestionFailed {
            file: self.pending.file.display().to_string(),
            reason: self.error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    InFlight,
    Accepted,
    Failed,
}

/// Tracks pending offset ranges of one partition and derives the offset that
/// is safe to commit: everything before the first range not yet accepted.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    entries: BTreeMap<u64, (OffsetRange, EntryState)>,
    committable: Option<u64>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, range: OffsetRange) {
        self.entries
            .insert(range.first, (range, EntryState::InFlight));
    }

    pub fn accept(&mut self, range: OffsetRange) {
        self.set_state(range, EntryState::Accepted);
        self.advance();
    }

    pub fn fail(&mut self, range: OffsetRange) {
        self.set_state(range, EntryState::Failed);
    }

    /// Move a failed range back in flight. Returns false if it was not failed.
    pub fn retry(&mut self, range: OffsetRange) -> bool {
        match self.entries.get_mut(&range.first) {
            Some((_, state)) if *state == EntryState::Failed => {
                *state = EntryState::InFlight;
                true
            }
            _ => false,
        }
    }

    /// Give up on a failed range so commit can move past it.
    pub fn skip(&mut self, range: OffsetRange) -> bool {
        match self.entries.get(&range.first) {
            Some((_, EntryState::Failed)) => {
                self.accept(range);
                true
            }
            _ => false,
        }
    }

    /// Next offset safe to commit, if any batch has been accepted.
    pub fn committable(&self) -> Option<u64> {
        self.committable
    }

    /// Ranges not yet accepted (in flight or failed).
    pub fn pending(&self) -> usize {
        self.entries
            .values()
            .filter(|(_, s)| *s != EntryState::Accepted)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries
            .values()
            .filter(|(_, s)| *s == EntryState::Failed)
            .count()
    }

    fn set_state(&mut self, range: OffsetRange, state: EntryState) {
        if let Some(entry) = self.entries.get_mut(&range.first) {
            entry.1 = state;
        }
    }

    fn advance(&mut self) {
        while let Some(entry) = self.entries.first_entry() {
            let (range, state) = *entry.get();
            if state != EntryState::Accepted {
                break;
            }
            entry.remove();
            self.committable = Some(range.next_offset());
        }
    }
}

/// Outcome of [`IngestionSubmitter::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drained: usize,
    pub abandoned: usize,
}

/// Hands finalized batches to the ingestion client without blocking the writer.
pub struct IngestionSubmitter {
    client: Arc<dyn IngestClient>,
    tracker: Arc<Mutex<OffsetTracker>>,
    failures_tx: mpsc::UnboundedSender<IngestionFailure>,
    in_flight: Vec<JoinHandle<()>>,
    delete_after_ingest: bool,
}

impl IngestionSubmitter {
    /// Create a submitter and the receiving end of its error channel.
    pub fn new(
        client: Arc<dyn IngestClient>,
        delete_after_ingest: bool,
    ) -> (Self, mpsc::UnboundedReceiver<IngestionFailure>) {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        (
            Self {
                client,
                tracker: Arc::new(Mutex::new(OffsetTracker::new())),
                failures_tx,
                in_flight: Vec::new(),
                delete_after_ingest,
            },
            failures_rx,
        )
    }

    pub fn tracker(&self) -> Arc<Mutex<OffsetTracker>> {
        Arc::clone(&self.tracker)
    }

    /// Register the batch's offsets and start its ingestion. Returns as soon
    /// as the task is spawned.
    pub async fn submit(&mut self, pending: PendingIngestion) {
        self.tracker.lock().await.register(pending.offsets);
        self.spawn(pending).await;
    }

    /// Submit a previously failed batch again.
    pub async fn resubmit(&mut self, pending: PendingIngestion) -> Result<()> {
        if !self.tracker.lock().await.retry(pending.offsets) {
            return Err(SinkError::ConfigError(format!(
                "batch {} for {} is not in a failed state",
                pending.offsets, pending.topic_partition
            )));
        }
        tracing::info!(
            topic = %pending.topic_partition.topic,
            partition = pending.topic_partition.partition,
            offsets = %pending.offsets,
            "Resubmitting failed ingestion"
        );
        self.spawn(pending).await;
        Ok(())
    }

    /// Skip a failed batch; its offsets become committable.
    pub async fn skip(&self, pending: &PendingIngestion) -> Result<()> {
        let mut tracker = self.tracker.lock().await;
        if !tracker.skip(pending.offsets) {
            return Err(SinkError::ConfigError(format!(
                "batch {} for {} is not in a failed state",
                pending.offsets, pending.topic_partition
            )));
        }
        update_pending_gauge(&pending.topic_partition, &tracker);
        tracing::warn!(
            topic = %pending.topic_partition.topic,
            partition = pending.topic_partition.partition,
            offsets = %pending.offsets,
            file = ?pending.file,
            "Skipping failed ingestion, offsets will be committed"
        );
        Ok(())
    }

    /// Number of submission tasks still running.
    pub fn in_flight(&mut self) -> usize {
        self.in_flight.retain(|h| !h.is_finished());
        self.in_flight.len()
    }

    async fn spawn(&mut self, pending: PendingIngestion) {
        self.in_flight.retain(|h| !h.is_finished());

        update_pending_gauge(&pending.topic_partition, &*self.tracker.lock().await);

        let client = Arc::clone(&self.client);
        let tracker = Arc::clone(&self.tracker);
        let failures_tx = self.failures_tx.clone();
        let delete_after_ingest = self.delete_after_ingest;

        let handle = tokio::spawn(async move {
            let source = pending.source_info();
            let table = pending.properties.table.clone();
            let start = std::time::Instant::now();

            match client.ingest_from_file(&source, &pending.properties).await {
                Ok(receipt) => {
                    metrics::INGESTION_LATENCY
                        .with_label_values(&[&table])
                        .observe(start.elapsed().as_secs_f64());
                    metrics::INGESTION_SUBMISSIONS_TOTAL
                        .with_label_values(&[&table, "accepted"])
                        .inc();

                    {
                        let mut tracker = tracker.lock().await;
                        tracker.accept(pending.offsets);
                        update_pending_gauge(&pending.topic_partition, &tracker);
                    }

                    if delete_after_ingest {
                        if let Err(e) = tokio::fs::remove_file(&pending.file).await {
                            tracing::warn!(
                                file = ?pending.file,
                                error = %e,
                                "Failed to remove ingested batch file"
                            );
                        }
                    }

                    tracing::info!(
                        topic = %pending.topic_partition.topic,
                        partition = pending.topic_partition.partition,
                        offsets = %pending.offsets,
                        size_bytes = pending.size_bytes,
                        table = %table,
                        receipt = %receipt.id,
                        "Batch accepted for ingestion"
                    );
                }
                Err(e) => {
                    metrics::INGESTION_SUBMISSIONS_TOTAL
                        .with_label_values(&[&table, "failed"])
                        .inc();

                    tracker.lock().await.fail(pending.offsets);

                    tracing::error!(
                        topic = %pending.topic_partition.topic,
                        partition = pending.topic_partition.partition,
                        offsets = %pending.offsets,
                        file = ?pending.file,
                        table = %table,
                        error = %e,
                        "Ingestion submission failed"
                    );

                    let _ = failures_tx.send(IngestionFailure {
                        pending,
                        error: e.to_string(),
                    });
                }
            }
        });

        self.in_flight.push(handle);
    }

    /// Wait for or abandon in-flight submissions.
    ///
    /// Abandoned submissions keep their (fully written) files on disk and
    /// their offsets uncommitted.
    pub async fn shutdown(&mut self, policy: ShutdownPolicy) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let handles: Vec<JoinHandle<()>> = self.in_flight.drain(..).collect();

        match policy {
            ShutdownPolicy::Drain { timeout } => {
                let deadline = tokio::time::Instant::now() + timeout;
                for mut handle in handles {
                    match tokio::time::timeout_at(deadline, &mut handle).await {
                        Ok(_) => report.drained += 1,
                        Err(_) => {
                            handle.abort();
                            report.abandoned += 1;
                        }
                    }
                }
            }
            ShutdownPolicy::Abandon => {
                for handle in handles {
                    if handle.is_finished() {
                        report.drained += 1;
                    } else {
                        handle.abort();
                        report.abandoned += 1;
                    }
                }
            }
        }

        if report.abandoned > 0 {
            metrics::INGESTION_SUBMISSIONS_TOTAL
                .with_label_values(&["", "abandoned"])
                .inc_by(report.abandoned as u64);
            tracing::warn!(
                abandoned = report.abandoned,
                drained = report.drained,
                "Abandoned in-flight ingestion submissions"
            );
        }

        report
    }
}

fn update_pending_gauge(tp: &TopicPartition, tracker: &OffsetTracker) {
    metrics::PENDING_INGESTIONS
        .with_label_values(&[&tp.topic, &tp.partition.to_string()])
        .set(tracker.pending() as i64);
}
