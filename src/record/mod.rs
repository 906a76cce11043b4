//! Stream Records
//!
//! The unit of storage and propagation. A record is identified by its `MessageId`
//! and carries a content payload signed by its publisher.
//!
//! ## Identity & Ordering
//! - **MessageId**: `(stream_id, partition, timestamp, sequence_number, publisher_id, msg_chain_id)`.
//! - **Ordering**: `(timestamp, sequence_number)` within a publisher's message chain.
//! - **Publisher**: the hex-encoded ed25519 verifying key of whoever signed the record.

pub mod signing;
pub mod types;

pub use types::{EncryptionType, MessageId, MessageRef, StreamMessage};
