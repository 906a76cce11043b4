use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::backend::RecordBackend;
use super::bucket::{WriteTarget, write_target};
use super::stream::{Plan, RecordFilter, RecordStream};
use super::types::{Bucket, RecordKey, ScanBounds, StreamStats};
use crate::error::StorageError;
use crate::record::{MessageId, StreamMessage};

/// Time-bucketed record store over a [`RecordBackend`].
pub struct LogStore {
    backend: Arc<dyn RecordBackend>,
    max_bucket_records: u64,
    write_lock: Mutex<()>,
}

impl LogStore {
    pub fn new(backend: Arc<dyn RecordBackend>, max_bucket_records: u64) -> Arc<Self> {
        Arc::new(Self {
            backend,
            max_bucket_records: max_bucket_records.max(1),
            write_lock: Mutex::new(()),
        })
    }

    /// Appends a record. Returns `false` when the record was already stored.
    #[tracing::instrument(level = "debug", skip_all, fields(id = %msg.message_id))]
    pub fn store(&self, msg: &StreamMessage) -> Result<bool, StorageError> {
        let id = &msg.message_id;
        let key = RecordKey::from(id);
        let payload = msg
            .to_json()
            .map_err(|e| StorageError::Encoding(e.to_string()))?
            .into_bytes();

        let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;

        if self
            .backend
            .get_record(&id.stream_id, id.partition, &key)?
            .is_some()
        {
            debug!("Record already stored");
            return Ok(false);
        }

        let buckets = self.backend.buckets(&id.stream_id, id.partition)?;
        let bucket_id = match write_target(&buckets, id.timestamp, self.max_bucket_records) {
            WriteTarget::Existing(idx) => buckets[idx].id,
            WriteTarget::Create => {
                let bucket = Bucket::new(&id.stream_id, id.partition, id.timestamp);
                let bucket_id = bucket.id;
                debug!(
                    "Opening bucket {} for {}/{} at {}",
                    bucket_id,
                    id.stream_id,
                    id.partition,
                    id.timestamp
                );
                self.backend.insert_bucket(bucket)?;
                bucket_id
            }
        };

        self.backend.insert_record(&bucket_id, key, Some(payload))
    }

    pub fn request_last(&self, stream_id: &str, partition: u32, count: u32) -> RecordStream {
        RecordStream::new(
            self.backend.clone(),
            stream_id,
            partition,
            Plan::Last {
                count: count as usize,
            },
            None,
        )
    }

    pub fn request_from(
        &self,
        stream_id: &str,
        partition: u32,
        from_timestamp: u64,
        from_sequence_number: u32,
        publisher_id: Option<&str>,
        limit: Option<u32>,
    ) -> RecordStream {
        let plan = Plan::Range {
            bounds: ScanBounds {
                from: (from_timestamp, from_sequence_number),
                to: (u64::MAX, u32::MAX),
            },
            filter: RecordFilter {
                publisher_id: publisher_id.map(str::to_string),
                msg_chain_id: None,
            },
        };
        RecordStream::new(
            self.backend.clone(),
            stream_id,
            partition,
            plan,
            limit.map(|l| l as usize),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn request_range(
        &self,
        stream_id: &str,
        partition: u32,
        from_timestamp: u64,
        from_sequence_number: u32,
        to_timestamp: u64,
        to_sequence_number: u32,
        publisher_id: Option<&str>,
        msg_chain_id: Option<&str>,
        limit: Option<u32>,
    ) -> RecordStream {
        let plan = Plan::Range {
            bounds: ScanBounds {
                from: (from_timestamp, from_sequence_number),
                to: (to_timestamp, to_sequence_number),
            },
            filter: RecordFilter {
                publisher_id: publisher_id.map(str::to_string),
                msg_chain_id: msg_chain_id.map(str::to_string),
            },
        };
        RecordStream::new(
            self.backend.clone(),
            stream_id,
            partition,
            plan,
            limit.map(|l| l as usize),
        )
    }

    pub fn request_by_message_id(&self, id: &MessageId) -> RecordStream {
        self.request_by_message_ids(std::slice::from_ref(id))
    }

    /// Looks up each id in the given order; missing ids are skipped.
    pub fn request_by_message_ids(&self, ids: &[MessageId]) -> RecordStream {
        let plan = if ids.is_empty() {
            Plan::Empty
        } else {
            Plan::Ids(ids.iter().cloned().collect::<VecDeque<_>>())
        };
        let (stream_id, partition) = ids
            .first()
            .map(|id| (id.stream_id.as_str(), id.partition))
            .unwrap_or(("", 0));
        RecordStream::new(self.backend.clone(), stream_id, partition, plan, None)
    }

    pub fn get_first_message_timestamp_in_stream(
        &self,
        stream_id: &str,
        partition: u32,
    ) -> Result<Option<u64>, StorageError> {
        for bucket in self.backend.buckets(stream_id, partition)? {
            let rows = self.backend.select_records(&bucket.id, ScanBounds::all())?;
            if let Some(row) = rows.first() {
                return Ok(Some(row.key.timestamp));
            }
        }
        Ok(None)
    }

    pub fn get_last_message_timestamp_in_stream(
        &self,
        stream_id: &str,
        partition: u32,
    ) -> Result<Option<u64>, StorageError> {
        for bucket in self.backend.buckets(stream_id, partition)?.iter().rev() {
            let rows = self.backend.select_records(&bucket.id, ScanBounds::all())?;
            if let Some(row) = rows.last() {
                return Ok(Some(row.key.timestamp));
            }
        }
        Ok(None)
    }

    pub fn get_number_of_messages_in_stream(
        &self,
        stream_id: &str,
        partition: u32,
    ) -> Result<u64, StorageError> {
        Ok(self
            .backend
            .buckets(stream_id, partition)?
            .iter()
            .map(|b| b.record_count)
            .sum())
    }

    pub fn get_total_bytes_in_stream(
        &self,
        stream_id: &str,
        partition: u32,
    ) -> Result<u64, StorageError> {
        Ok(self
            .backend
            .buckets(stream_id, partition)?
            .iter()
            .map(|b| b.byte_size)
            .sum())
    }

    pub fn stream_stats(&self, stream_id: &str, partition: u32) -> Result<StreamStats, StorageError> {
        Ok(StreamStats {
            total_bytes: self.get_total_bytes_in_stream(stream_id, partition)?,
            total_messages: self.get_number_of_messages_in_stream(stream_id, partition)?,
            first_message: self.get_first_message_timestamp_in_stream(stream_id, partition)?,
            last_message: self.get_last_message_timestamp_in_stream(stream_id, partition)?,
        })
    }
}
