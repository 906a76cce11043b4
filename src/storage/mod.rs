//! Log Storage Module
//!
//! Time-bucketed history of stream records, partitioned by `(stream_id, partition)`.
//!
//! ## Core Concepts
//! - **Buckets**: fixed-capacity time slices. When the newest bucket fills up, the next
//!   later write opens a new one starting at its own timestamp.
//! - **Backend**: `RecordBackend` is the table seam; `MemoryBackend` is the shipped implementation.
//! - **Reads**: every query returns a lazy [`stream::RecordStream`] ordered by
//!   `(timestamp, sequence_number)` that transparently spans buckets.
//! - **Writes**: idempotent. Re-storing a record changes neither rows nor counters.

pub mod backend;
pub mod bucket;
pub mod log_store;
pub mod memory;
pub mod stream;
pub mod types;

pub use backend::RecordBackend;
pub use log_store::LogStore;
pub use memory::MemoryBackend;
pub use stream::RecordStream;
