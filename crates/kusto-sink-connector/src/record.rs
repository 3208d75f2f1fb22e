//! Record and partition identity types exchanged between the dispatch loop
//! and the partition writers.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifies one partition of one topic. Used as the writer key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// The value carried by a record, as delivered by the converter upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// Raw bytes (byte-array converter).
    Bytes(Bytes),
    /// A string (string converter).
    String(String),
    /// A structured value (JSON converter with schemas disabled, or a decoded struct).
    Structured(serde_json::Value),
    /// Tombstone / missing value.
    Null,
}

impl RecordValue {
    /// Name of the value shape, used in format-mismatch errors.
    pub fn shape(&self) -> &'static str {
        match self {
            RecordValue::Bytes(_) => "bytes",
            RecordValue::String(_) => "string",
            RecordValue::Structured(_) => "structured",
            RecordValue::Null => "null",
        }
    }
}

impl From<Bytes> for RecordValue {
    fn from(value: Bytes) -> Self {
        RecordValue::Bytes(value)
    }
}

impl From<Vec<u8>> for RecordValue {
    fn from(value: Vec<u8>) -> Self {
        RecordValue::Bytes(Bytes::from(value))
    }
}

impl From<&str> for RecordValue {
    fn from(value: &str) -> Self {
        RecordValue::String(value.to_string())
    }
}

impl From<String> for RecordValue {
    fn from(value: String) -> Self {
        RecordValue::String(value)
    }
}

impl From<serde_json::Value> for RecordValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RecordValue::Null,
            other => RecordValue::Structured(other),
        }
    }
}

/// A record delivered to the sink for one topic-partition.
#[derive(Debug, Clone)]
pub struct SinkRecord {
    /// Topic the record was consumed from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// Timestamp in milliseconds since epoch.
    pub timestamp: u64,
    /// Optional record key.
    pub key: Option<Bytes>,
    /// Record value (payload).
    pub value: RecordValue,
}

impl SinkRecord {
    /// Build a record with no key and a zero timestamp.
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        offset: u64,
        value: impl Into<RecordValue>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp: 0,
            key: None,
            value: value.into(),
        }
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    pub fn belongs_to(&self, tp: &TopicPartition) -> bool {
        self.partition == tp.partition && self.topic == tp.topic
    }
}

/// An inclusive range of source offsets covered by one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetRange {
    pub first: u64,
    pub last: u64,
}

impl OffsetRange {
    pub fn new(first: u64, last: u64) -> Self {
        Self { first, last }
    }

    /// Offset to commit once this range is safely handed off.
    pub fn next_offset(&self) -> u64 {
        self.last + 1
    }
}

impl fmt::Display for OffsetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..={}]", self.first, self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_partition_display_and_order() {
        let a = TopicPartition::new("orders", 2);
        let b = TopicPartition::new("orders", 10);
        assert_eq!(a.to_string(), "orders-2");
        assert!(a < b);
    }

    #[test]
    fn test_record_belongs_to() {
        let rec = SinkRecord::new("events", 1, 42, "payload");
        assert!(rec.belongs_to(&TopicPartition::new("events", 1)));
        assert!(!rec.belongs_to(&TopicPartition::new("events", 2)));
        assert!(!rec.belongs_to(&TopicPartition::new("other", 1)));
        assert_eq!(rec.topic_partition(), TopicPartition::new("events", 1));
    }

    #[test]
    fn test_json_null_becomes_null_value() {
        let value: RecordValue = serde_json::Value::Null.into();
        assert_eq!(value, RecordValue::Null);

        let value: RecordValue = serde_json::json!({"a": 1}).into();
        assert_eq!(value.shape(), "structured");
    }

    #[test]
    fn test_value_shapes() {
        assert_eq!(RecordValue::from(Bytes::from("x")).shape(), "bytes");
        assert_eq!(RecordValue::from(vec![1u8, 2]).shape(), "bytes");
        assert_eq!(RecordValue::from("x").shape(), "string");
        assert_eq!(RecordValue::Null.shape(), "null");
    }

    #[test]
    fn test_offset_range_next_offset() {
        let range = OffsetRange::new(10, 19);
        assert_eq!(range.next_offset(), 20);
        assert_eq!(range.to_string(), "[10..=19]");
    }
}
