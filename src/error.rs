//! Domain error types.
//!
//! Each subsystem exposes its own `thiserror` enum. Service loops and the binary
//! work with `anyhow::Result` and convert at the edges.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend failure: {0}")]
    Backend(String),

    #[error("record encoding failed: {0}")]
    Encoding(String),

    #[error("write lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid message id: {0}")]
    InvalidMessageId(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid publisher key: {0}")]
    InvalidPublisher(String),
}

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("Propagation timeout")]
    Timeout,

    #[error("request {0} is already in flight")]
    DuplicateRequest(String),

    #[error("resolution dropped")]
    Cancelled,

    #[error("publish failed: {0}")]
    Publish(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Consensus timeout")]
    Timeout,

    #[error("No consensus")]
    NoConsensus,

    #[error("publish failed: {0}")]
    Publish(String),
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("sequence gap from {responder}: expected {expected}, got {got}")]
    Gap {
        responder: String,
        expected: u64,
        got: u64,
    },

    #[error("recovery did not complete after {0} attempts")]
    Exhausted(u32),

    #[error("recovery round timed out")]
    Timeout,

    #[error("publish failed: {0}")]
    Publish(String),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid pool data: {0}")]
    Invalid(String),
}
