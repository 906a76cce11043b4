//! Simple Consensus
//!
//! Best-effort agreement on a query answer. A request is published, responses are grouped
//! by digest, and the first group to reach `ceil(expected / 2)` signers wins.
//! Resolution fails fast once no group can reach the threshold anymore.

pub mod engine;

pub use engine::{Consensus, ConsensusManager, ConsensusTally, TallyOutcome};
