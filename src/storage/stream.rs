use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use super::backend::RecordBackend;
use super::bucket::buckets_in_range;
use super::types::{Bucket, RecordKey, ScanBounds, StoredRecord};
use crate::error::StorageError;
use crate::record::{MessageId, StreamMessage};

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordFilter {
    pub publisher_id: Option<String>,
    pub msg_chain_id: Option<String>,
}

impl RecordFilter {
    fn matches(&self, key: &RecordKey) -> bool {
        self.publisher_id
            .as_ref()
            .is_none_or(|p| *p == key.publisher_id)
            && self
                .msg_chain_id
                .as_ref()
                .is_none_or(|c| *c == key.msg_chain_id)
    }
}

pub(crate) enum Plan {
    Range {
        bounds: ScanBounds,
        filter: RecordFilter,
    },
    Last {
        count: usize,
    },
    Ids(VecDeque<MessageId>),
    Empty,
}

enum Phase {
    Unresolved(Plan),
    /// Walking buckets oldest first, one bucket fetched at a time.
    Scanning {
        pending: VecDeque<Bucket>,
        bounds: ScanBounds,
        filter: RecordFilter,
    },
    Buffered,
    ById(VecDeque<MessageId>),
    Finished,
}

/// Lazy, ordered, single-pass query result.
///
/// Rows with missing or undecodable payloads are skipped. A backend failure is
/// reported once as an `Err` item, after which the stream ends.
pub struct RecordStream {
    backend: Arc<dyn RecordBackend>,
    stream_id: String,
    partition: u32,
    phase: Phase,
    buffer: VecDeque<StoredRecord>,
    remaining: Option<usize>,
}

impl RecordStream {
    pub(crate) fn new(
        backend: Arc<dyn RecordBackend>,
        stream_id: &str,
        partition: u32,
        plan: Plan,
        limit: Option<usize>,
    ) -> Self {
        Self {
            backend,
            stream_id: stream_id.to_string(),
            partition,
            phase: Phase::Unresolved(plan),
            buffer: VecDeque::new(),
            remaining: limit,
        }
    }

    fn resolve(&mut self, plan: Plan) -> Result<Phase, StorageError> {
        match plan {
            Plan::Empty => Ok(Phase::Finished),
            Plan::Range { bounds, filter } => {
                if bounds.is_empty() {
                    return Ok(Phase::Finished);
                }
                let buckets = self.backend.buckets(&self.stream_id, self.partition)?;
                let pending = buckets_in_range(&buckets, bounds.from.0, bounds.to.0).into();
                Ok(Phase::Scanning {
                    pending,
                    bounds,
                    filter,
                })
            }
            Plan::Last { count } => {
                let mut collected: VecDeque<StoredRecord> = VecDeque::new();
                if count > 0 {
                    let buckets = self.backend.buckets(&self.stream_id, self.partition)?;
                    for bucket in buckets.iter().rev() {
                        let rows = self.backend.select_records(&bucket.id, ScanBounds::all())?;
                        for row in rows.into_iter().rev() {
                            if row_message(&row).is_some() {
                                collected.push_front(row);
                                if collected.len() == count {
                                    break;
                                }
                            }
                        }
                        if collected.len() == count {
                            break;
                        }
                    }
                }
                self.buffer = collected;
                Ok(Phase::Buffered)
            }
            Plan::Ids(ids) => Ok(Phase::ById(ids)),
        }
    }

    /// Pulls the next bucket into the buffer. Returns `false` when nothing is left.
    fn refill(&mut self) -> Result<bool, StorageError> {
        let Phase::Scanning {
            pending,
            bounds,
            filter,
        } = &mut self.phase
        else {
            return Ok(false);
        };

        while let Some(bucket) = pending.pop_front() {
            let rows = self.backend.select_records(&bucket.id, *bounds)?;
            self.buffer
                .extend(rows.into_iter().filter(|row| filter.matches(&row.key)));
            if !self.buffer.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn next_by_id(&mut self) -> Option<Result<StreamMessage, StorageError>> {
        loop {
            let id = match &mut self.phase {
                Phase::ById(ids) => ids.pop_front()?,
                _ => return None,
            };
            match self
                .backend
                .get_record(&id.stream_id, id.partition, &RecordKey::from(&id))
            {
                Ok(Some(row)) => {
                    if let Some(msg) = row_message(&row) {
                        return Some(Ok(msg));
                    }
                }
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn next_buffered(&mut self) -> Option<Result<StreamMessage, StorageError>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                match row_message(&row) {
                    Some(msg) => return Some(Ok(msg)),
                    None => continue,
                }
            }

            match self.refill() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn row_message(row: &StoredRecord) -> Option<StreamMessage> {
    let payload = row.payload.as_ref()?;
    let raw = std::str::from_utf8(payload).ok()?;
    match StreamMessage::from_json(raw) {
        Ok(msg) => Some(msg),
        Err(e) => {
            debug!("Skipping corrupt record at {:?}: {}", row.key, e);
            None
        }
    }
}

impl Iterator for RecordStream {
    type Item = Result<StreamMessage, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            self.phase = Phase::Finished;
            return None;
        }

        if let Phase::Unresolved(_) = self.phase {
            let Phase::Unresolved(plan) = std::mem::replace(&mut self.phase, Phase::Finished)
            else {
                return None;
            };
            match self.resolve(plan) {
                Ok(phase) => self.phase = phase,
                Err(e) => return Some(Err(e)),
            }
        }

        let item = match self.phase {
            Phase::Finished | Phase::Unresolved(_) => None,
            Phase::ById(_) => self.next_by_id(),
            Phase::Scanning { .. } | Phase::Buffered => self.next_buffered(),
        };

        match &item {
            Some(Ok(_)) => {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
            }
            Some(Err(_)) | None => {
                self.phase = Phase::Finished;
                self.buffer.clear();
            }
        }

        item
    }
}
