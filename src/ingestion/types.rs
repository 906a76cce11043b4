//! Ingestion Data Types
//!
//! Stream-part identifiers, the assignment diff feed and the intake API's response.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One partition of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamPartId {
    pub stream_id: String,
    pub partition: u32,
}

impl StreamPartId {
    pub fn new(stream_id: impl Into<String>, partition: u32) -> Self {
        Self {
            stream_id: stream_id.into(),
            partition,
        }
    }
}

impl fmt::Display for StreamPartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.stream_id, self.partition)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentChange {
    Added,
    Removed,
}

/// One entry of the membership diff feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub stream_part: StreamPartId,
    pub change: AssignmentChange,
}

/// What happened to a record handed to the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// This broker does not store the record's stream part.
    NotAssigned,
    /// Proof published; the record is stored once enough brokers confirm it.
    Announced { hash: String },
}

/// Response returned by the intake endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}
