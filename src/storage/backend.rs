use crate::error::StorageError;

use super::types::{Bucket, BucketId, RecordKey, ScanBounds, StoredRecord};

/// Table-level access used by the log store.
///
/// Mirrors a wide-column layout: a bucket table keyed by
/// `(stream, partition, creation_time)` and a record table keyed by
/// `(stream, partition, bucket_id, ts, seq, publisher, chain)`.
pub trait RecordBackend: Send + Sync {
    /// Buckets of one stream partition, oldest first.
    fn buckets(&self, stream_id: &str, partition: u32) -> Result<Vec<Bucket>, StorageError>;

    fn insert_bucket(&self, bucket: Bucket) -> Result<(), StorageError>;

    /// Inserts a row and bumps the bucket counters. Returns `false` if the row already existed,
    /// in which case nothing changes.
    fn insert_record(
        &self,
        bucket: &BucketId,
        key: RecordKey,
        payload: Option<Vec<u8>>,
    ) -> Result<bool, StorageError>;

    /// Rows of one bucket within `bounds`, ordered by key.
    fn select_records(
        &self,
        bucket: &BucketId,
        bounds: ScanBounds,
    ) -> Result<Vec<StoredRecord>, StorageError>;

    fn get_record(
        &self,
        stream_id: &str,
        partition: u32,
        key: &RecordKey,
    ) -> Result<Option<StoredRecord>, StorageError>;
}
