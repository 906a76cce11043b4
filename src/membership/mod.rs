//! Membership & Liveness Module
//!
//! Tracks which brokers are currently participating on the system stream.
//!
//! ## Core Mechanisms
//! - **Heartbeat**: every broker publishes a beat each interval; peers seen within the
//!   threshold count as online. The query protocol snapshots this set as its expected respondents.
//! - **Roll Call**: a jittered poll. Whoever fires first broadcasts a request; everyone
//!   resets their timer, adopts the request id and answers. Responders within one round are alive.
//! - **Identity**: brokers are named by their ed25519 verifying key.

pub mod heartbeat;
pub mod roll_call;
pub mod types;

pub use heartbeat::Heartbeat;
pub use roll_call::RollCall;
pub use types::{BrokerIdentity, NodeId, OnlineBrokers};
