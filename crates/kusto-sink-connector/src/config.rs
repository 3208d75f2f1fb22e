//! Writer and connector configuration.
//!
//! [`WriterConfig`] is the immutable configuration of one partition writer.
//! [`KustoSinkConfig`] is parsed from the connector's string key-value map
//! and produces a `WriterConfig` per assigned partition.
//!
//! ## Connector keys
//!
//! | Key                           | Description                                 | Default              |
//! |-------------------------------|---------------------------------------------|----------------------|
//! | `kusto.tables.topics.mapping` | JSON array of `{topic, db, table, format, mapping}` | required     |
//! | `tempdir.path`                | Base directory for batch files              | `<tmp>/kusto-sink`   |
//! | `flush.size.bytes`            | Batch file size threshold                   | `1048576`            |
//! | `flush.interval.ms`           | Flush interval, `0` rolls on every write    | `300000`             |
//! | `behavior.on.error`           | `fail` or `ignore`                          | `fail`               |
//! | `shutdown.policy`             | `drain` or `abandon`                        | `drain`              |
//! | `shutdown.timeout.ms`         | Drain bound on close                        | `30000`              |
//! | `ingest.delete.files`         | Delete local files once accepted            | `true`               |

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SinkError};
use crate::ingestion::{DataFormat, IngestionProperties};
use crate::record::TopicPartition;

pub const TOPICS_MAPPING: &str = "kusto.tables.topics.mapping";
pub const TEMPDIR_PATH: &str = "tempdir.path";
pub const FLUSH_SIZE_BYTES: &str = "flush.size.bytes";
pub const FLUSH_INTERVAL_MS: &str = "flush.interval.ms";
pub const BEHAVIOR_ON_ERROR: &str = "behavior.on.error";
pub const SHUTDOWN_POLICY: &str = "shutdown.policy";
pub const SHUTDOWN_TIMEOUT_MS: &str = "shutdown.timeout.ms";
pub const INGEST_DELETE_FILES: &str = "ingest.delete.files";

/// What `close()` does with submissions still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Wait up to `timeout` for in-flight submissions, then abandon the rest.
    Drain {
        #[serde(with = "duration_ms")]
        timeout: Duration,
    },

    /// Abort in-flight submissions immediately.
    Abandon,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        ShutdownPolicy::Drain {
            timeout: Duration::from_millis(default_shutdown_timeout_ms()),
        }
    }
}

/// How the sink task reacts to record errors and failed ingestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorBehavior {
    #[default]
    Fail,
    Ignore,
}

impl ErrorBehavior {
    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(ErrorBehavior::Fail),
            "ignore" => Ok(ErrorBehavior::Ignore),
            other => Err(SinkError::ConfigError(format!(
                "unknown {}: '{}'",
                BEHAVIOR_ON_ERROR, other
            ))),
        }
    }
}

/// Configuration of a single partition writer. Immutable once the writer is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    pub topic_partition: TopicPartition,

    pub properties: IngestionProperties,

    /// Batch files go to `<base_dir>/<topic>-<partition>/`
    pub base_dir: PathBuf,

    /// Batch size in bytes that triggers a roll (must be > 0)
    #[serde(default = "default_flush_size_bytes")]
    pub file_threshold: u64,

    /// Timer period; zero disables the timer and rolls on every write
    #[serde(default = "default_flush_interval", with = "duration_ms")]
    pub flush_interval: Duration,

    #[serde(default)]
    pub shutdown: ShutdownPolicy,

    /// Remove the local file once the backend accepted it
    #[serde(default = "default_true")]
    pub delete_after_ingest: bool,
}

impl WriterConfig {
    pub fn new(
        topic_partition: TopicPartition,
        properties: IngestionProperties,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            topic_partition,
            properties,
            base_dir: base_dir.into(),
            file_threshold: default_flush_size_bytes(),
            flush_interval: default_flush_interval(),
            shutdown: ShutdownPolicy::default(),
            delete_after_ingest: true,
        }
    }

    pub fn with_thresholds(mut self, file_threshold: u64, flush_interval: Duration) -> Self {
        self.file_threshold = file_threshold;
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_delete_after_ingest(mut self, delete: bool) -> Self {
        self.delete_after_ingest = delete;
        self
    }

    /// Directory holding this partition's batch files.
    pub fn partition_dir(&self) -> PathBuf {
        self.base_dir.join(self.topic_partition.to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if self.file_threshold == 0 {
            return Err(SinkError::ConfigError(format!(
                "file threshold for {} must be greater than zero",
                self.topic_partition
            )));
        }
        if self.topic_partition.topic.is_empty() {
            return Err(SinkError::ConfigError("topic must not be empty".to_string()));
        }
        self.properties.validate()
    }
}

/// One entry of `kusto.tables.topics.mapping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMapping {
    pub topic: String,
    pub db: String,
    pub table: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub mapping: Option<String>,
}

impl TopicMapping {
    pub fn to_properties(&self) -> Result<IngestionProperties> {
        let format = DataFormat::from_str_config(&self.format)?;
        let mut properties = IngestionProperties::new(&self.db, &self.table, format);
        if let Some(reference) = self.mapping.as_deref().filter(|m| !m.is_empty()) {
            properties = properties.with_mapping(reference, format.mapping_kind());
        }
        properties.validate()?;
        Ok(properties)
    }
}

/// Connector configuration parsed from its config map.
#[derive(Debug, Clone)]
pub struct KustoSinkConfig {
    pub topics: HashMap<String, Arc<IngestionProperties>>,
    pub temp_dir: PathBuf,
    pub flush_size_bytes: u64,
    pub flush_interval: Duration,
    pub behavior_on_error: ErrorBehavior,
    pub shutdown: ShutdownPolicy,
    pub delete_after_ingest: bool,
}

impl KustoSinkConfig {
    /// Parse from a string key-value map.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let raw_mapping = config.get(TOPICS_MAPPING).ok_or_else(|| {
            SinkError::ConfigError(format!("missing required '{}'", TOPICS_MAPPING))
        })?;
        let mappings: Vec<TopicMapping> = serde_json::from_str(raw_mapping).map_err(|e| {
            SinkError::ConfigError(format!("invalid {}: {}", TOPICS_MAPPING, e))
        })?;
        if mappings.is_empty() {
            return Err(SinkError::ConfigError(format!(
                "'{}' must map at least one topic",
                TOPICS_MAPPING
            )));
        }

        let mut topics = HashMap::with_capacity(mappings.len());
        for mapping in &mappings {
            let properties = mapping.to_properties()?;
            if topics
                .insert(mapping.topic.clone(), Arc::new(properties))
                .is_some()
            {
                return Err(SinkError::ConfigError(format!(
                    "topic '{}' is mapped more than once",
                    mapping.topic
                )));
            }
        }

        let temp_dir = config
            .get(TEMPDIR_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("kusto-sink"));

        let flush_size_bytes =
            parse_number(config, FLUSH_SIZE_BYTES)?.unwrap_or_else(default_flush_size_bytes);
        if flush_size_bytes == 0 {
            return Err(SinkError::ConfigError(format!(
                "{} must be greater than zero",
                FLUSH_SIZE_BYTES
            )));
        }

        let flush_interval = parse_number(config, FLUSH_INTERVAL_MS)?
            .map(Duration::from_millis)
            .unwrap_or_else(default_flush_interval);

        let behavior_on_error = config
            .get(BEHAVIOR_ON_ERROR)
            .map(|s| ErrorBehavior::from_str_config(s))
            .transpose()?
            .unwrap_or_default();

        let timeout = Duration::from_millis(
            parse_number(config, SHUTDOWN_TIMEOUT_MS)?.unwrap_or_else(default_shutdown_timeout_ms),
        );
        let shutdown = match config.get(SHUTDOWN_POLICY).map(|s| s.trim().to_lowercase()) {
            None => ShutdownPolicy::Drain { timeout },
            Some(s) if s == "drain" => ShutdownPolicy::Drain { timeout },
            Some(s) if s == "abandon" => ShutdownPolicy::Abandon,
            Some(other) => {
                return Err(SinkError::ConfigError(format!(
                    "unknown {}: '{}'",
                    SHUTDOWN_POLICY, other
                )))
            }
        };

        let delete_after_ingest = config
            .get(INGEST_DELETE_FILES)
            .map(|s| {
                s.trim().parse::<bool>().map_err(|e| {
                    SinkError::ConfigError(format!("invalid {}: {}", INGEST_DELETE_FILES, e))
                })
            })
            .transpose()?
            .unwrap_or(true);

        Ok(Self {
            topics,
            temp_dir,
            flush_size_bytes,
            flush_interval,
            behavior_on_error,
            shutdown,
            delete_after_ingest,
        })
    }

    pub fn properties_for(&self, topic: &str) -> Option<Arc<IngestionProperties>> {
        self.topics.get(topic).cloned()
    }

    /// Writer configuration for an assigned partition.
    pub fn writer_config(&self, tp: &TopicPartition) -> Result<WriterConfig> {
        let properties = self.properties_for(&tp.topic).ok_or_else(|| {
            SinkError::ConfigError(format!("topic '{}' has no table mapping", tp.topic))
        })?;
        Ok(
            WriterConfig::new(tp.clone(), (*properties).clone(), &self.temp_dir)
                .with_thresholds(self.flush_size_bytes, self.flush_interval)
                .with_shutdown(self.shutdown)
                .with_delete_after_ingest(self.delete_after_ingest),
        )
    }
}

fn parse_number(config: &HashMap<String, String>, key: &str) -> Result<Option<u64>> {
    config
        .get(key)
        .map(|s| {
            s.trim()
                .parse::<u64>()
                .map_err(|e| SinkError::ConfigError(format!("invalid {}: {}", key, e)))
        })
        .transpose()
}

fn default_flush_size_bytes() -> u64 {
    1024 * 1024 // 1MB
}

fn default_flush_interval() -> Duration {
    Duration::from_millis(300_000) // 5 minutes
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

fn default_format() -> String {
    "csv".to_string()
}

fn default_true() -> bool {
    true
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
