//! Partition writer
//!
//! A [`PartitionWriter`] owns the open batch, the flush timer and the
//! ingestion submitter of one topic-partition.
//!
//! ## Write Flow
//!
//! ```text
//! write_record(record)
//!     ↓
//! encode_value()          ← FormatMismatch leaves the batch untouched
//!     ↓
//! Batch.append()          ← file opened lazily
//!     ↓
//! write_path_trigger()?
//!     ↓ YES
//! Batch.finalize()        ← flush + fsync + rename
//!     ↓
//! IngestionSubmitter.submit()  ← spawned, returns immediately
//!     ↓
//! Batch::new()            ← start fresh
//! ```
//!
//! The flush timer rolls through the same path from its own task. Both take
//! the writer's state mutex, so a roll is one critical section and the
//! "current batch" is whatever is open once the lock is held.
//!
//! ## States
//!
//! `Unopened → Open → Closed`, and `Open → Failed` when a local I/O error
//! leaves the open batch unusable. `Closed` and `Failed` are terminal.

use std::fmt;
use std::sync::{Arc, Weak};

use kusto_sink_observability::metrics;
use tokio::sync::{mpsc, Mutex};

use crate::batch::Batch;
use crate::config::WriterConfig;
use crate::encode::encode_value;
use crate::error::{Result, SinkError};
use crate::ingestion::{IngestClient, IngestionProperties};
use crate::record::{OffsetRange, SinkRecord, TopicPartition};
use crate::roll::{write_path_trigger, RollTrigger};
use crate::submitter::{
    IngestionFailure, IngestionSubmitter, OffsetTracker, PendingIngestion,
};
use crate::timer::FlushTimer;

/// Lifecycle state of a partition writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStatus {
    Unopened,
    Open,
    Closed,
    Failed,
}

impl fmt::Display for WriterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WriterStatus::Unopened => "unopened",
            WriterStatus::Open => "open",
            WriterStatus::Closed => "closed",
            WriterStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of the open batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub size_bytes: u64,
    pub record_count: u64,
    pub offsets: Option<OffsetRange>,
}

struct WriterState {
    status: WriterStatus,
    batch: Option<Batch>,
    /// Highest offset appended so far, across rolls.
    last_offset: Option<u64>,
    submitter: IngestionSubmitter,
}

struct Shared {
    config: WriterConfig,
    properties: Arc<IngestionProperties>,
    state: Mutex<WriterState>,
    tracker: Arc<Mutex<OffsetTracker>>,
    failures: Mutex<mpsc::UnboundedReceiver<IngestionFailure>>,
}

/// Batches the records of one topic-partition into files and submits them
/// for ingestion.
///
/// All methods take `&self` and serialize on an internal mutex; records must
/// still arrive in offset order from a single producer.
pub struct PartitionWriter {
    shared: Arc<Shared>,
    timer: Mutex<FlushTimer>,
}

impl PartitionWriter {
    /// Build a writer. Validates the configuration; nothing touches disk until
    /// [`open`](Self::open).
    pub fn new(config: WriterConfig, client: Arc<dyn IngestClient>) -> Result<Self> {
        config.validate()?;

        let (submitter, failures) = IngestionSubmitter::new(client, config.delete_after_ingest);
        let tracker = submitter.tracker();
        let properties = Arc::new(config.properties.clone());

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                properties,
                state: Mutex::new(WriterState {
                    status: WriterStatus::Unopened,
                    batch: None,
                    last_offset: None,
                    submitter,
                }),
                tracker,
                failures: Mutex::new(failures),
            }),
            timer: Mutex::new(FlushTimer::disabled()),
        })
    }

    pub fn topic_partition(&self) -> &TopicPartition {
        &self.shared.config.topic_partition
    }

    pub fn config(&self) -> &WriterConfig {
        &self.shared.config
    }

    pub async fn status(&self) -> WriterStatus {
        self.shared.state.lock().await.status
    }

    /// Size, count and offsets of the open batch, if any.
    pub async fn current_batch(&self) -> Option<BatchStats> {
        let state = self.shared.state.lock().await;
        state.batch.as_ref().map(|b| BatchStats {
            size_bytes: b.size_bytes(),
            record_count: b.record_count(),
            offsets: b.offsets(),
        })
    }

    /// Create the partition directory, allocate the first batch and start the
    /// flush timer.
    pub async fn open(&self) -> Result<()> {
        let tp = &self.shared.config.topic_partition;
        // Timer before state, same order as close().
        let mut timer = self.timer.lock().await;
        let mut state = self.shared.state.lock().await;

        match state.status {
            WriterStatus::Open => {
                tracing::debug!(topic = %tp.topic, partition = tp.partition, "Writer already open");
                return Ok(());
            }
            WriterStatus::Closed => return Err(SinkError::WriterClosed(tp.clone())),
            WriterStatus::Failed => return Err(SinkError::WriterFailed(tp.clone())),
            WriterStatus::Unopened => {}
        }

        let dir = self.shared.config.partition_dir();
        tokio::fs::create_dir_all(&dir).await?;

        state.batch = Some(self.shared.new_batch());
        state.status = WriterStatus::Open;

        let interval = self.shared.config.flush_interval;
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        *timer = FlushTimer::start(interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(shared) => shared.on_timer().await,
                    None => false,
                }
            }
        });

        metrics::ACTIVE_WRITERS.inc();
        tracing::info!(
            topic = %tp.topic,
            partition = tp.partition,
            dir = ?dir,
            file_threshold = self.shared.config.file_threshold,
            flush_interval_ms = interval.as_millis() as u64,
            "Partition writer opened"
        );

        Ok(())
    }

    /// Append one record to the open batch. Returns the offsets of the batch
    /// this call rolled, if it rolled one.
    ///
    /// Offsets must strictly increase: a record at or below the last appended
    /// offset fails with [`SinkError::OffsetOutOfOrder`] and appends nothing.
    #[tracing::instrument(skip(self, record), fields(topic = %record.topic, partition = record.partition, offset = record.offset))]
    pub async fn write_record(&self, record: &SinkRecord) -> Result<Option<OffsetRange>> {
        let shared = &self.shared;
        let tp = &shared.config.topic_partition;
        let mut state = shared.state.lock().await;

        match state.status {
            WriterStatus::Open => {}
            WriterStatus::Unopened => {
                return Err(SinkError::ConfigError(format!(
                    "writer for {} is not open",
                    tp
                )))
            }
            WriterStatus::Closed => return Err(SinkError::WriterClosed(tp.clone())),
            WriterStatus::Failed => return Err(SinkError::WriterFailed(tp.clone())),
        }

        if !record.belongs_to(tp) {
            return Err(SinkError::ConfigError(format!(
                "record for {}-{} sent to writer for {}",
                record.topic, record.partition, tp
            )));
        }

        if let Some(last) = state.last_offset.filter(|last| record.offset <= *last) {
            let err = SinkError::OffsetOutOfOrder {
                topic_partition: tp.clone(),
                offset: record.offset,
                last,
            };
            metrics::RECORD_ERRORS_TOTAL
                .with_label_values(&[&tp.topic, err.kind()])
                .inc();
            return Err(err);
        }

        let encoded = match encode_value(shared.properties.data_format, &record.value) {
            Ok(encoded) => encoded,
            Err(e) => {
                metrics::RECORD_ERRORS_TOTAL
                    .with_label_values(&[&tp.topic, e.kind()])
                    .inc();
                return Err(e);
            }
        };

        let batch = state.batch.get_or_insert_with(|| shared.new_batch());
        if let Err(e) = batch.append(record.offset, &encoded).await {
            shared.mark_failed(&mut state, &e);
            return Err(e);
        }
        let size = batch.size_bytes();
        state.last_offset = Some(record.offset);

        metrics::RECORDS_WRITTEN_TOTAL
            .with_label_values(&[&tp.topic])
            .inc();

        match write_path_trigger(size, shared.config.file_threshold, shared.config.flush_interval) {
            Some(trigger) => shared.roll(&mut state, trigger).await,
            None => Ok(None),
        }
    }

    /// Stop the timer, roll what is buffered and settle in-flight submissions
    /// per the shutdown policy. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        // Awaiting the timer task first means no timer roll is in flight.
        self.timer.lock().await.stop().await;

        let shared = &self.shared;
        let tp = &shared.config.topic_partition;
        let mut state = shared.state.lock().await;

        let previous = state.status;
        match previous {
            WriterStatus::Closed => return Ok(()),
            WriterStatus::Unopened => {
                state.status = WriterStatus::Closed;
                return Ok(());
            }
            WriterStatus::Open => metrics::ACTIVE_WRITERS.dec(),
            WriterStatus::Failed => {}
        }
        state.status = WriterStatus::Closed;

        let rolled = if previous == WriterStatus::Open {
            shared.roll(&mut state, RollTrigger::Close).await
        } else {
            Ok(None)
        };

        let report = state.submitter.shutdown(shared.config.shutdown).await;
        tracing::info!(
            topic = %tp.topic,
            partition = tp.partition,
            drained = report.drained,
            abandoned = report.abandoned,
            "Partition writer closed"
        );

        rolled.map(|_| ())
    }

    /// Next offset safe to commit, `None` until a batch was accepted.
    pub async fn committable_offset(&self) -> Option<u64> {
        self.shared.tracker.lock().await.committable()
    }

    /// Drain ingestion failures reported since the last call.
    pub async fn take_failures(&self) -> Vec<IngestionFailure> {
        let mut rx = self.shared.failures.lock().await;
        let mut failures = Vec::new();
        while let Ok(failure) = rx.try_recv() {
            failures.push(failure);
        }
        failures
    }

    /// Retry a failed ingestion. The writer never retries on its own.
    pub async fn resubmit(&self, pending: PendingIngestion) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        self.check_resolvable(&state, &pending)?;
        state.submitter.resubmit(pending).await
    }

    /// Give up on a failed ingestion so commit can move past its offsets.
    pub async fn skip_failed(&self, pending: &PendingIngestion) -> Result<()> {
        let state = self.shared.state.lock().await;
        self.check_resolvable(&state, pending)?;
        state.submitter.skip(pending).await
    }

    /// Submissions still running.
    pub async fn in_flight(&self) -> usize {
        self.shared.state.lock().await.submitter.in_flight()
    }

    fn check_resolvable(&self, state: &WriterState, pending: &PendingIngestion) -> Result<()> {
        let tp = &self.shared.config.topic_partition;
        if state.status == WriterStatus::Closed {
            return Err(SinkError::WriterClosed(tp.clone()));
        }
        if &pending.topic_partition != tp {
            return Err(SinkError::ConfigError(format!(
                "pending ingestion for {} does not belong to writer for {}",
                pending.topic_partition, tp
            )));
        }
        Ok(())
    }
}

impl Shared {
    fn new_batch(&self) -> Batch {
        Batch::new(
            &self.config.partition_dir(),
            self.config.topic_partition.clone(),
            self.properties.data_format,
        )
    }

    /// Timer callback. Returns false once the writer stopped accepting work.
    async fn on_timer(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.status != WriterStatus::Open {
            return false;
        }
        if state.batch.as_ref().map_or(true, Batch::is_empty) {
            return true;
        }
        if let Err(e) = self.roll(&mut state, RollTrigger::Timer).await {
            tracing::error!(
                topic = %self.config.topic_partition.topic,
                partition = self.config.topic_partition.partition,
                error = %e,
                "Timer roll failed"
            );
            return false;
        }
        true
    }

    /// Finalize the open batch and hand it to the submitter. Empty batches are
    /// left alone. Must be called with the state lock held.
    async fn roll(
        &self,
        state: &mut WriterState,
        trigger: RollTrigger,
    ) -> Result<Option<OffsetRange>> {
        let batch = match state.batch.take() {
            Some(batch) if !batch.is_empty() => batch,
            other => {
                state.batch = other;
                return Ok(None);
            }
        };

        let tp = &self.config.topic_partition;
        let age = batch.age();
        let finalized = match batch.finalize().await {
            Ok(finalized) => finalized,
            Err(e) => {
                self.mark_failed(state, &e);
                return Err(e);
            }
        };

        metrics::BATCH_ROLLS_TOTAL
            .with_label_values(&[&tp.topic, &tp.partition.to_string(), trigger.as_str()])
            .inc();
        metrics::BATCH_SIZE_BYTES
            .with_label_values(&[&tp.topic])
            .observe(finalized.size_bytes as f64);

        tracing::info!(
            topic = %tp.topic,
            partition = tp.partition,
            offsets = %finalized.offsets,
            records = finalized.record_count,
            size_bytes = finalized.size_bytes,
            age_ms = age.as_millis() as u64,
            trigger = %trigger,
            file = ?finalized.path,
            "Batch rolled"
        );

        let offsets = finalized.offsets;
        state
            .submitter
            .submit(PendingIngestion::new(finalized, Arc::clone(&self.properties)))
            .await;

        if state.status == WriterStatus::Open {
            state.batch = Some(self.new_batch());
        }

        Ok(Some(offsets))
    }

    /// An open batch hit a local I/O error: drop it (removing its file) and
    /// stop accepting records.
    fn mark_failed(&self, state: &mut WriterState, error: &SinkError) {
        state.batch = None;
        if state.status == WriterStatus::Open {
            state.status = WriterStatus::Failed;
            metrics::ACTIVE_WRITERS.dec();
        }
        tracing::error!(
            topic = %self.config.topic_partition.topic,
            partition = self.config.topic_partition.partition,
            error = %error,
            "Partition writer failed"
        );
    }
}
