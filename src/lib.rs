//! Decentralized Log-Store Broker Library
//!
//! Every broker keeps its own replica of the stream records it is assigned and agrees
//! with its peers over a shared system stream. The binary (`main.rs`) wires these
//! modules together through [`node::Broker`].
//!
//! ## Architecture Modules
//! - **`record`**: stream records, their identity and signatures.
//! - **`storage`**: the time-bucketed log store and its query primitives.
//! - **`protocol`**: system-stream messages and their wire codec.
//! - **`broadband`**: signed publish/subscribe over the system stream (in-memory or UDP).
//! - **`membership`**: heartbeat liveness and roll call.
//! - **`propagation`**: query reconciliation. Brokers compare answers and push each
//!   other the records they lack.
//! - **`consensus`**: signed digests from a majority of brokers for one query.
//! - **`cache`**: replayable system traffic and cache recovery from peers.
//! - **`ingestion`**: record intake with storage proofs and stream-part assignments.
//! - **`http`**: the consumer-facing query API.

pub mod broadband;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod error;
pub mod http;
pub mod ingestion;
pub mod membership;
pub mod node;
pub mod propagation;
pub mod protocol;
pub mod record;
pub mod storage;
pub mod util;
