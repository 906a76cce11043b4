use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::record::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId(pub Uuid);

impl BucketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BucketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A time slice of one stream partition.
///
/// Owns every timestamp from `creation_time` up to the next bucket's `creation_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: BucketId,
    pub stream_id: String,
    pub partition: u32,
    pub creation_time: u64,
    pub record_count: u64,
    pub byte_size: u64,
}

impl Bucket {
    pub fn new(stream_id: &str, partition: u32, creation_time: u64) -> Self {
        Self {
            id: BucketId::new(),
            stream_id: stream_id.to_string(),
            partition,
            creation_time,
            record_count: 0,
            byte_size: 0,
        }
    }

    pub fn is_full(&self, max_records: u64) -> bool {
        self.record_count >= max_records
    }
}

/// Clustering key of a record inside its bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub timestamp: u64,
    pub sequence_number: u32,
    pub publisher_id: String,
    pub msg_chain_id: String,
}

impl From<&MessageId> for RecordKey {
    fn from(id: &MessageId) -> Self {
        Self {
            timestamp: id.timestamp,
            sequence_number: id.sequence_number,
            publisher_id: id.publisher_id.clone(),
            msg_chain_id: id.msg_chain_id.clone(),
        }
    }
}

/// A row as the backend returns it. The payload may be missing or unreadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: RecordKey,
    pub payload: Option<Vec<u8>>,
}

/// Inclusive `(timestamp, sequence_number)` bounds for a bucket scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanBounds {
    pub from: (u64, u32),
    pub to: (u64, u32),
}

impl ScanBounds {
    pub fn all() -> Self {
        Self {
            from: (0, 0),
            to: (u64::MAX, u32::MAX),
        }
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        let point = (key.timestamp, key.sequence_number);
        point >= self.from && point <= self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }
}

/// Per stream-partition aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub total_bytes: u64,
    pub total_messages: u64,
    pub first_message: Option<u64>,
    pub last_message: Option<u64>,
}
