//! Broadband Pub/Sub
//!
//! Fan-out publish and fan-in subscribe over every partition of the system stream.
//!
//! ## Core Concepts
//! - **Transport**: moves signed [`types::Envelope`]s between brokers. `MemoryBus` keeps
//!   everything in-process, `UdpTransport` sends datagrams to configured peers, fragmenting envelopes
//!   that do not fit in one.
//! - **Publisher**: round-robins partitions and stamps each message with an increasing
//!   per-node sequence number.
//! - **Subscriber**: merges all partitions into one channel, dropping envelopes whose
//!   signature or encoding does not check out.

pub mod publisher;
pub mod subscriber;
pub mod transport;
pub mod types;

pub use publisher::BroadbandPublisher;
pub use subscriber::BroadbandSubscriber;
pub use transport::{Fragment, MemoryBus, Reassembler, Transport, UdpTransport};
pub use types::{Envelope, Inbound};
