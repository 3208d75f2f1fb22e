//! File-backed batch buffer for one partition.
//!
//! A [`Batch`] owns an in-progress file `<dir>/<id>.<ext>.tmp`. The file is
//! created on the first append, so empty batches never touch the disk.
//! [`Batch::finalize`] flushes, syncs and renames it to its final name and
//! hands back a [`FinalizedBatch`]; from then on the writer never touches the
//! file again. A batch dropped on any other path (error, abandon) deletes its
//! in-progress file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Result, SinkError};
use crate::ingestion::DataFormat;
use crate::record::{OffsetRange, TopicPartition};

/// The open, mutable batch of a partition writer.
#[derive(Debug)]
pub struct Batch {
    id: Uuid,
    topic_partition: TopicPartition,
    format: DataFormat,
    dir: PathBuf,
    tmp_path: PathBuf,
    file: Option<BufWriter<File>>,
    size_bytes: u64,
    record_count: u64,
    offsets: Option<OffsetRange>,
    created_at: Instant,
    released: bool,
}

/// A closed batch file, ready for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedBatch {
    pub id: Uuid,
    pub topic_partition: TopicPartition,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub record_count: u64,
    pub offsets: OffsetRange,
}

impl Batch {
    /// Allocate an empty batch backed by a fresh path under `dir`.
    pub fn new(dir: &Path, topic_partition: TopicPartition, format: DataFormat) -> Self {
        let id = Uuid::new_v4();
        let tmp_path = dir.join(format!("{}.{}.tmp", id.simple(), format.extension()));
        Self {
            id,
            topic_partition,
            format,
            dir: dir.to_path_buf(),
            tmp_path,
            file: None,
            size_bytes: 0,
            record_count: 0,
            offsets: None,
            created_at: Instant::now(),
            released: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn offsets(&self) -> Option<OffsetRange> {
        self.offsets
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Path of the in-progress file (may not exist yet).
    pub fn path(&self) -> &Path {
        &self.tmp_path
    }

    /// Append one encoded record. Records are written whole; a failed write
    /// leaves the batch unusable and the caller must drop it.
    pub async fn append(&mut self, offset: u64, encoded: &[u8]) -> Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.tmp_path)
                .await?;
            self.file = Some(BufWriter::new(file));
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(encoded).await?;
        }

        self.size_bytes += encoded.len() as u64;
        self.record_count += 1;
        self.offsets = Some(match self.offsets {
            None => OffsetRange::new(offset, offset),
            Some(range) => OffsetRange::new(range.first, range.last.max(offset)),
        });

        Ok(())
    }

    /// Close the file durably and move it to its final, unique name.
    pub async fn finalize(mut self) -> Result<FinalizedBatch> {
        let offsets = self.offsets.ok_or_else(|| {
            SinkError::ConfigError(format!(
                "cannot finalize empty batch {} for {}",
                self.id, self.topic_partition
            ))
        })?;

        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.get_ref().sync_all().await?;
        }

        let final_path = self.dir.join(final_file_name(
            &self.topic_partition,
            offsets,
            self.id,
            self.format,
        ));
        tokio::fs::rename(&self.tmp_path, &final_path).await?;
        self.released = true;

        Ok(FinalizedBatch {
            id: self.id,
            topic_partition: self.topic_partition.clone(),
            path: final_path,
            size_bytes: self.size_bytes,
            record_count: self.record_count,
            offsets,
        })
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if self.released || (self.record_count == 0 && self.file.is_none()) {
            return;
        }
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = ?self.tmp_path,
                    error = %e,
                    "Failed to remove abandoned batch file"
                );
            }
        }
    }
}

/// `kafka_<topic>_<partition>_<first>_<last>_<id8>.<ext>`
pub fn final_file_name(
    tp: &TopicPartition,
    offsets: OffsetRange,
    id: Uuid,
    format: DataFormat,
) -> String {
    let id = id.simple().to_string();
    format!(
        "kafka_{}_{}_{}_{}_{}.{}",
        tp.topic,
        tp.partition,
        offsets.first,
        offsets.last,
        &id[..8],
        format.extension()
    )
}
