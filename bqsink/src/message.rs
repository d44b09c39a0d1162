use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A record handed to the sink. Its identity is its position in the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputMessage {
    pub key: Bytes,
    pub value: Bytes,
    /// Source metadata (topic, partition, offset, ...) that can be injected into the row.
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// Value of a metadata entry.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

impl InputMessage {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(value: DateTime<Utc>) -> Self {
        MetadataValue::Timestamp(value)
    }
}
