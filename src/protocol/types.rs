use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::membership::types::{BrokerIdentity, NodeId};
use crate::record::signing::{sha256_hex, verify_hex};

pub const PROTOCOL_VERSION: u8 = 1;

/// A control-plane message on the system stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub version: u8,
    pub seq_num: u64,
    pub payload: SystemPayload,
}

impl SystemMessage {
    pub fn new(seq_num: u64, payload: SystemPayload) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            seq_num,
            payload,
        }
    }

    pub fn message_type(&self) -> SystemMessageType {
        self.payload.message_type()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SystemPayload {
    Heartbeat,
    RollCallRequest { request_id: String },
    RollCallResponse { request_id: String },
    QueryRequest(QueryRequest),
    QueryResponse(QueryResponse),
    QueryPropagate(QueryPropagate),
    ProofOfMessageStored(ProofOfMessageStored),
    ProofOfReport(ProofOfReport),
    RecoveryRequest(RecoveryRequest),
    RecoveryResponse(RecoveryResponse),
    RecoveryComplete(RecoveryComplete),
}

impl SystemPayload {
    pub fn message_type(&self) -> SystemMessageType {
        match self {
            SystemPayload::Heartbeat => SystemMessageType::Heartbeat,
            SystemPayload::RollCallRequest { .. } => SystemMessageType::RollCallRequest,
            SystemPayload::RollCallResponse { .. } => SystemMessageType::RollCallResponse,
            SystemPayload::QueryRequest(_) => SystemMessageType::QueryRequest,
            SystemPayload::QueryResponse(_) => SystemMessageType::QueryResponse,
            SystemPayload::QueryPropagate(_) => SystemMessageType::QueryPropagate,
            SystemPayload::ProofOfMessageStored(_) => SystemMessageType::ProofOfMessageStored,
            SystemPayload::ProofOfReport(_) => SystemMessageType::ProofOfReport,
            SystemPayload::RecoveryRequest(_) => SystemMessageType::RecoveryRequest,
            SystemPayload::RecoveryResponse(_) => SystemMessageType::RecoveryResponse,
            SystemPayload::RecoveryComplete(_) => SystemMessageType::RecoveryComplete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemMessageType {
    Heartbeat,
    RollCallRequest,
    RollCallResponse,
    QueryRequest,
    QueryResponse,
    QueryPropagate,
    ProofOfMessageStored,
    ProofOfReport,
    RecoveryRequest,
    RecoveryResponse,
    RecoveryComplete,
}

/// Where and by whom a system message was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub stream_id: String,
    pub partition: u32,
    pub publisher_id: NodeId,
    /// Publish time in unix milliseconds.
    pub timestamp: u64,
    pub sequence_number: u64,
}

// --- Queries ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Last,
    From,
    Range,
}

impl FromStr for QueryType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last" => Ok(QueryType::Last),
            "from" => Ok(QueryType::From),
            "range" => Ok(QueryType::Range),
            other => Err(ProtocolError::Malformed(format!("unknown query type {other}"))),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryType::Last => "last",
            QueryType::From => "from",
            QueryType::Range => "range",
        };
        f.write_str(name)
    }
}

/// A query bound. A missing sequence number means the lowest value on a lower
/// bound and the highest value on an upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRef {
    pub timestamp: u64,
    pub sequence_number: Option<u32>,
}

impl QueryRef {
    pub fn lower(&self) -> u32 {
        self.sequence_number.unwrap_or(0)
    }

    pub fn upper(&self) -> u32 {
        self.sequence_number.unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOptions {
    Last {
        last: u32,
    },
    From {
        from: QueryRef,
        publisher_id: Option<String>,
        limit: Option<u32>,
    },
    Range {
        from: QueryRef,
        to: QueryRef,
        publisher_id: Option<String>,
        msg_chain_id: Option<String>,
        limit: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub request_id: String,
    pub consumer_id: String,
    pub stream_id: String,
    pub partition: u32,
    pub query_options: QueryOptions,
}

impl QueryRequest {
    pub fn new(
        consumer_id: impl Into<String>,
        stream_id: impl Into<String>,
        partition: u32,
        query_options: QueryOptions,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            consumer_id: consumer_id.into(),
            stream_id: stream_id.into(),
            partition,
            query_options,
        }
    }

    pub fn query_type(&self) -> QueryType {
        match self.query_options {
            QueryOptions::Last { .. } => QueryType::Last,
            QueryOptions::From { .. } => QueryType::From,
            QueryOptions::Range { .. } => QueryType::Range,
        }
    }
}

/// One broker's answer to a query: message id to content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub request_id: String,
    /// The broker that issued the request being answered.
    pub request_publisher_id: NodeId,
    pub hash_map: BTreeMap<String, String>,
    /// Responder's signature over [`QueryResponse::digest`].
    pub signature: String,
}

impl QueryResponse {
    pub fn signed(
        request_id: impl Into<String>,
        request_publisher_id: NodeId,
        hash_map: BTreeMap<String, String>,
        identity: &BrokerIdentity,
    ) -> Self {
        let mut response = Self {
            request_id: request_id.into(),
            request_publisher_id,
            hash_map,
            signature: String::new(),
        };
        response.signature = identity.sign(response.digest().as_bytes());
        response
    }

    /// Rolling hash over the request id, each entry in key order, then the entry count.
    pub fn digest(&self) -> String {
        let mut hash = sha256_hex(self.request_id.as_bytes());
        for (message_id, content_hash) in &self.hash_map {
            hash = sha256_hex(format!("{hash}{message_id}{content_hash}").as_bytes());
        }
        sha256_hex(format!("{hash}{}", self.hash_map.len()).as_bytes())
    }

    pub fn verify(&self, responder: &NodeId) -> Result<(), ProtocolError> {
        verify_hex(responder.as_str(), self.digest().as_bytes(), &self.signature)
    }
}

/// Records one broker sends to the primary: `(message_id, serialized record)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPropagate {
    pub request_id: String,
    pub request_publisher_id: NodeId,
    pub payload: Vec<(String, String)>,
}

// --- Ingestion & reports ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfMessageStored {
    pub stream_id: String,
    pub partition: u32,
    pub timestamp: u64,
    pub sequence_number: u32,
    pub size: u64,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfReport {
    pub address: String,
    pub hash: String,
    pub signature: String,
    pub timestamp: u64,
}

// --- Recovery ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub request_id: String,
    pub from: u64,
    pub to: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResponse {
    pub request_id: String,
    pub seq_num: u64,
    pub payload: Vec<(SystemMessage, MessageMetadata)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryComplete {
    pub request_id: String,
    pub seq_num: u64,
    pub is_fulfilled: bool,
}
