//! Ingestion Module
//!
//! Brings records from stream publishers into the local store.
//!
//! ## Workflow
//! 1. **Filter**: records for stream parts this broker is not assigned are ignored.
//!    Assignments follow an added/removed diff feed.
//! 2. **Announce**: the broker publishes a `ProofOfMessageStored` carrying a content hash.
//! 3. **Confirm**: once half the online brokers (rounded up) announced the same hash,
//!    the record is stored. Unconfirmed entries expire after a TTL.

pub mod assignments;
pub mod handlers;
pub mod listener;
pub mod types;

pub use assignments::StreamPartAssignments;
pub use listener::MessageListener;
pub use types::{AssignmentChange, AssignmentEvent, IngestOutcome, StreamPartId};

#[cfg(test)]
mod tests;
