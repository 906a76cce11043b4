//! HTTP Query Protocol
//!
//! Endpoint paths and the JSON shapes exchanged with stream consumers.

use serde::{Deserialize, Serialize};

use crate::membership::types::NodeId;
use crate::record::StreamMessage;

// --- API Endpoints ---

/// Data query: `last`, `from` or `range` over one stream partition.
pub const ENDPOINT_DATA_QUERY: &str = "/streams/:id/data/partitions/:partition/:query_type";
/// Same query, answered with signed digests from a majority of brokers.
pub const ENDPOINT_CONSENSUS_QUERY: &str =
    "/streams/:id/consensus/partitions/:partition/:query_type";
/// Size and time span of one stream partition.
pub const ENDPOINT_STREAM_METADATA: &str = "/streams/:id/metadata/partitions/:partition";
/// Whether this broker stores a stream part.
pub const ENDPOINT_STORED_STREAM_PART: &str = "/stores/:id/partitions/:partition";
/// Asks peers to replay their system cache.
pub const ENDPOINT_RECOVERY: &str = "/recovery";
/// Record intake from stream publishers.
pub const ENDPOINT_INGEST: &str = "/ingest";

/// Upper bound on records returned by one data query.
pub const DEFAULT_MESSAGE_LIMIT: u32 = 10_000;

// --- Data Transfer Objects ---

/// Query string of a data request. Numbers are kept as text so a malformed value can
/// be reported by name.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQueryParams {
    pub count: Option<String>,
    pub from_timestamp: Option<String>,
    pub from_sequence_number: Option<String>,
    pub to_timestamp: Option<String>,
    pub to_sequence_number: Option<String>,
    pub publisher_id: Option<String>,
    pub msg_chain_id: Option<String>,
    pub consumer: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Brokers whose answers were reconciled into this one.
    pub participants: Vec<NodeId>,
    pub has_next: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_timestamp: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataQueryResponse {
    pub messages: Vec<StreamMessage>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadataResponse {
    pub total_bytes: u64,
    pub total_messages: u64,
    pub first_message: Option<u64>,
    pub last_message: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredStreamPartResponse {
    pub stream_id: String,
    pub partition: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryHttpRequest {
    pub request_id: Option<String>,
    #[serde(default)]
    pub from: u64,
    pub to: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
