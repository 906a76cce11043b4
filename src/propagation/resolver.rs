use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::types::{QueryHashMap, Resolution};
use crate::config::PropagationConfig;
use crate::error::{PropagationError, ProtocolError};
use crate::membership::types::{NodeId, OnlineBrokers};
use crate::protocol::{QueryPropagate, QueryRequest, QueryResponse};
use crate::record::StreamMessage;
use crate::storage::LogStore;

/// Reconciliation state of one request on its primary broker.
struct QueryPropagationState {
    stream_id: String,
    partition: u32,
    primary: QueryHashMap,
    /// Ids some responder listed that the primary answer lacks.
    awaiting: HashSet<String>,
    /// Ids already stored from a propagate. Never awaited again.
    received: HashSet<String>,
    /// Entries a responder sent before its own answer listed them.
    held: HashMap<NodeId, Vec<(String, String)>>,
    responded: HashMap<NodeId, bool>,
}

impl QueryPropagationState {
    fn new(request: &QueryRequest, primary: QueryHashMap, expected: &[NodeId]) -> Self {
        Self {
            stream_id: request.stream_id.clone(),
            partition: request.partition,
            primary,
            awaiting: HashSet::new(),
            received: HashSet::new(),
            held: HashMap::new(),
            responded: expected.iter().map(|id| (id.clone(), false)).collect(),
        }
    }

    /// Returns the held records this answer made acceptable.
    fn on_foreign_response(&mut self, from: &NodeId, response: &QueryResponse) -> Vec<StreamMessage> {
        for message_id in response.hash_map.keys() {
            if !self.primary.contains_key(message_id) && !self.received.contains(message_id) {
                self.awaiting.insert(message_id.clone());
            }
        }
        self.responded.insert(from.clone(), true);

        let held = self.held.remove(from).unwrap_or_default();
        held.into_iter()
            .filter_map(|(message_id, raw)| {
                if self.awaiting.contains(&message_id) {
                    self.consume(from, &message_id, &raw)
                } else {
                    debug!("Discarding unlisted record {} from {}", message_id, from);
                    None
                }
            })
            .collect()
    }

    /// Returns the verified records that should be stored.
    fn on_propagate(&mut self, from: &NodeId, propagate: &QueryPropagate) -> Vec<StreamMessage> {
        let answered = self.responded.get(from).copied();
        let mut verified = Vec::new();

        for (message_id, raw) in &propagate.payload {
            if self.awaiting.contains(message_id) {
                verified.extend(self.consume(from, message_id, raw));
                continue;
            }
            if self.primary.contains_key(message_id) || self.received.contains(message_id) {
                continue;
            }
            match answered {
                // Its answer may still list the id
                Some(false) => self
                    .held
                    .entry(from.clone())
                    .or_default()
                    .push((message_id.clone(), raw.clone())),
                _ => warn!(
                    "Dropping unrequested record {} from {}",
                    message_id,
                    from
                ),
            }
        }

        verified
    }

    fn consume(&mut self, from: &NodeId, message_id: &str, raw: &str) -> Option<StreamMessage> {
        self.awaiting.remove(message_id);

        let checked = StreamMessage::from_json(raw).and_then(|msg| {
            let id = &msg.message_id;
            if id.to_string() != message_id
                || id.stream_id != self.stream_id
                || id.partition != self.partition
            {
                return Err(ProtocolError::InvalidMessageId(message_id.to_string()));
            }
            msg.verify().map(|_| msg)
        });

        match checked {
            Ok(msg) => {
                self.received.insert(message_id.to_string());
                Some(msg)
            }
            Err(e) => {
                warn!(
                    "Dropping propagated record {} from {}: {}",
                    message_id,
                    from,
                    e
                );
                None
            }
        }
    }

    fn is_ready(&self, quorum_threshold: f64) -> bool {
        if !self.awaiting.is_empty() {
            return false;
        }
        if self.responded.is_empty() {
            return true;
        }
        let responded = self.responded.values().filter(|r| **r).count();
        responded as f64 / self.responded.len() as f64 >= quorum_threshold
    }

    fn participants(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .responded
            .iter()
            .filter(|(_, responded)| **responded)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

enum Early {
    Foreign(NodeId, QueryResponse),
    Propagate(NodeId, QueryPropagate),
}

struct Waiter {
    request: QueryRequest,
    expected: Vec<NodeId>,
    state: Option<QueryPropagationState>,
    early: Vec<Early>,
    tx: Option<oneshot::Sender<Resolution>>,
}

/// Tracks requests issued by this broker until their answers have converged.
pub struct PropagationResolver {
    local_id: NodeId,
    log_store: Arc<LogStore>,
    online: Arc<dyn OnlineBrokers>,
    config: PropagationConfig,
    waiters: DashMap<String, Waiter>,
}

impl PropagationResolver {
    pub fn new(
        local_id: NodeId,
        log_store: Arc<LogStore>,
        online: Arc<dyn OnlineBrokers>,
        config: PropagationConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            log_store,
            online,
            config,
            waiters: DashMap::new(),
        })
    }

    /// Registers `request` and returns a future that resolves once its answer converged.
    ///
    /// Registration happens before this returns, so the request can be published right
    /// after without losing early responses.
    pub fn wait_for_propagate_resolution(
        self: &Arc<Self>,
        request: &QueryRequest,
    ) -> Result<
        impl Future<Output = Result<Resolution, PropagationError>> + Send + 'static,
        PropagationError,
    > {
        let request_id = request.request_id.clone();
        let expected: Vec<NodeId> = self
            .online
            .online_brokers()
            .into_iter()
            .filter(|id| *id != self.local_id)
            .collect();

        let (tx, rx) = oneshot::channel();
        match self.waiters.entry(request_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(PropagationError::DuplicateRequest(request_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(
                    "Awaiting {} broker(s) for request {}",
                    expected.len(),
                    request_id
                );
                slot.insert(Waiter {
                    request: request.clone(),
                    expected,
                    state: None,
                    early: Vec::new(),
                    tx: Some(tx),
                });
            }
        }

        let resolver = self.clone();
        let timeout = self.config.timeout();
        Ok(async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(resolution)) => Ok(resolution),
                Ok(Err(_)) => Err(PropagationError::Cancelled),
                Err(_) => {
                    resolver.waiters.remove(&request_id);
                    warn!("Propagation for {} timed out", request_id);
                    Err(PropagationError::Timeout)
                }
            }
        })
    }

    /// Drops a registration whose request never went out.
    pub fn cancel(&self, request_id: &str) {
        self.waiters.remove(request_id);
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.waiters.contains_key(request_id)
    }

    /// This broker's own answer to its request.
    pub fn set_primary_response(&self, request_id: &str, hash_map: QueryHashMap) {
        {
            let Some(mut guard) = self.waiters.get_mut(request_id) else {
                debug!("Primary response for unknown request {}", request_id);
                return;
            };
            let waiter = &mut *guard;
            if waiter.state.is_some() {
                return;
            }

            let mut state =
                QueryPropagationState::new(&waiter.request, hash_map, &waiter.expected);
            for early in std::mem::take(&mut waiter.early) {
                let records = match early {
                    Early::Foreign(from, response) => state.on_foreign_response(&from, &response),
                    Early::Propagate(from, propagate) => state.on_propagate(&from, &propagate),
                };
                self.store_all(&records);
            }
            waiter.state = Some(state);
        }

        self.finish_if_ready(request_id);
    }

    /// Another broker's answer to one of this broker's requests.
    pub fn set_foreign_response(&self, from: &NodeId, response: QueryResponse) {
        if let Err(e) = response.verify(from) {
            warn!("Ignoring query response from {}: {}", from, e);
            return;
        }

        let request_id = response.request_id.clone();
        {
            let Some(mut guard) = self.waiters.get_mut(&request_id) else {
                return;
            };
            let waiter = &mut *guard;
            match waiter.state.as_mut() {
                Some(state) => {
                    let records = state.on_foreign_response(from, &response);
                    self.store_all(&records);
                }
                None => waiter.early.push(Early::Foreign(from.clone(), response)),
            }
        }

        self.finish_if_ready(&request_id);
    }

    pub fn on_query_propagate(&self, from: &NodeId, propagate: QueryPropagate) {
        if *from == propagate.request_publisher_id {
            return;
        }

        let request_id = propagate.request_id.clone();
        {
            let Some(mut guard) = self.waiters.get_mut(&request_id) else {
                return;
            };
            let waiter = &mut *guard;
            match waiter.state.as_mut() {
                Some(state) => {
                    let records = state.on_propagate(from, &propagate);
                    self.store_all(&records);
                }
                None => waiter.early.push(Early::Propagate(from.clone(), propagate)),
            }
        }

        self.finish_if_ready(&request_id);
    }

    fn store_all(&self, records: &[StreamMessage]) {
        for record in records {
            if let Err(e) = self.log_store.store(record) {
                error!("Failed to store propagated record {}: {}", record.message_id, e);
            }
        }
    }

    fn finish_if_ready(&self, request_id: &str) {
        let threshold = self.config.quorum_threshold;
        let finished = self.waiters.remove_if(request_id, |_, waiter| {
            waiter
                .state
                .as_ref()
                .is_some_and(|state| state.is_ready(threshold))
        });

        if let Some((request_id, mut waiter)) = finished {
            let mut participants = waiter
                .state
                .as_ref()
                .map(|s| s.participants())
                .unwrap_or_default();
            participants.insert(0, self.local_id.clone());

            debug!(
                "Request {} resolved with {} participant(s)",
                request_id,
                participants.len()
            );

            if let Some(tx) = waiter.tx.take() {
                let _ = tx.send(Resolution {
                    request_id,
                    participants,
                });
            }
        }
    }
}
