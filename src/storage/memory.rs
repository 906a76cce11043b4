use dashmap::DashMap;
use std::collections::BTreeMap;

use super::backend::RecordBackend;
use super::types::{Bucket, BucketId, RecordKey, ScanBounds, StoredRecord};
use crate::error::StorageError;

type StreamPart = (String, u32);

/// In-memory tables backed by `DashMap`s.
#[derive(Default)]
pub struct MemoryBackend {
    buckets: DashMap<StreamPart, Vec<Bucket>>,
    bucket_owner: DashMap<BucketId, StreamPart>,
    records: DashMap<BucketId, BTreeMap<RecordKey, Option<Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordBackend for MemoryBackend {
    fn buckets(&self, stream_id: &str, partition: u32) -> Result<Vec<Bucket>, StorageError> {
        Ok(self
            .buckets
            .get(&(stream_id.to_string(), partition))
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    fn insert_bucket(&self, bucket: Bucket) -> Result<(), StorageError> {
        let part = (bucket.stream_id.clone(), bucket.partition);
        self.bucket_owner.insert(bucket.id, part.clone());
        self.records.entry(bucket.id).or_default();

        let mut list = self.buckets.entry(part).or_default();
        let pos = list.partition_point(|b| b.creation_time <= bucket.creation_time);
        list.insert(pos, bucket);
        Ok(())
    }

    fn insert_record(
        &self,
        bucket: &BucketId,
        key: RecordKey,
        payload: Option<Vec<u8>>,
    ) -> Result<bool, StorageError> {
        let part = self
            .bucket_owner
            .get(bucket)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::Backend(format!("unknown bucket {}", bucket)))?;

        let size = payload.as_ref().map(|p| p.len() as u64).unwrap_or(0);
        {
            let mut rows = self.records.entry(*bucket).or_default();
            if rows.contains_key(&key) {
                return Ok(false);
            }
            rows.insert(key, payload);
        }

        if let Some(mut list) = self.buckets.get_mut(&part)
            && let Some(b) = list.iter_mut().find(|b| b.id == *bucket)
        {
            b.record_count += 1;
            b.byte_size += size;
        }

        Ok(true)
    }

    fn select_records(
        &self,
        bucket: &BucketId,
        bounds: ScanBounds,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let Some(rows) = self.records.get(bucket) else {
            return Ok(Vec::new());
        };

        Ok(rows
            .iter()
            .filter(|(key, _)| bounds.contains(key))
            .map(|(key, payload)| StoredRecord {
                key: key.clone(),
                payload: payload.clone(),
            })
            .collect())
    }

    fn get_record(
        &self,
        stream_id: &str,
        partition: u32,
        key: &RecordKey,
    ) -> Result<Option<StoredRecord>, StorageError> {
        for bucket in self.buckets(stream_id, partition)? {
            if let Some(rows) = self.records.get(&bucket.id)
                && let Some(payload) = rows.get(key)
            {
                return Ok(Some(StoredRecord {
                    key: key.clone(),
                    payload: payload.clone(),
                }));
            }
        }
        Ok(None)
    }
}
