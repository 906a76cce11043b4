use std::collections::BTreeMap;

use crate::membership::types::NodeId;

/// Message id (string form) to content hash.
pub type QueryHashMap = BTreeMap<String, String>;

/// Outcome of a resolved query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub request_id: String,
    /// Brokers whose answers were reconciled into the local store, the primary included.
    pub participants: Vec<NodeId>,
}
