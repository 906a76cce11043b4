use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::warn;

use crate::broadband::{BroadbandPublisher, BroadbandSubscriber, Inbound};
use crate::config::ConsensusConfig;
use crate::error::ConsensusError;
use crate::membership::types::NodeId;
use crate::protocol::{QueryRequest, QueryResponse, SystemPayload};

/// One signer's vote for a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consensus {
    pub hash: String,
    pub signer: NodeId,
    pub signature: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TallyOutcome {
    Pending,
    Reached(Vec<Consensus>),
    Impossible,
}

/// Vote counting for a single request, independent of any transport.
#[derive(Debug)]
pub struct ConsensusTally {
    request_id: String,
    expected: usize,
    threshold: usize,
    groups: HashMap<String, Vec<Consensus>>,
    signers: HashSet<NodeId>,
}

impl ConsensusTally {
    pub fn new(request_id: impl Into<String>, expected_total: usize) -> Self {
        let expected = expected_total.max(1);
        Self {
            request_id: request_id.into(),
            expected,
            threshold: expected.div_ceil(2),
            groups: HashMap::new(),
            signers: HashSet::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Counts `response` from `signer`. Repeated signers and bad signatures are ignored.
    pub fn record(&mut self, signer: &NodeId, response: &QueryResponse) -> TallyOutcome {
        if response.request_id != self.request_id || self.signers.contains(signer) {
            return self.outcome();
        }
        if let Err(e) = response.verify(signer) {
            warn!("Ignoring consensus vote from {}: {}", signer, e);
            return self.outcome();
        }

        self.signers.insert(signer.clone());
        let hash = response.digest();
        self.groups.entry(hash.clone()).or_default().push(Consensus {
            hash,
            signer: signer.clone(),
            signature: response.signature.clone(),
        });

        self.outcome()
    }

    fn outcome(&self) -> TallyOutcome {
        let leader = self.groups.values().max_by_key(|votes| votes.len());
        let leading = leader.map(|votes| votes.len()).unwrap_or(0);

        if leading >= self.threshold
            && let Some(votes) = leader
        {
            return TallyOutcome::Reached(votes.clone());
        }

        let awaiting = self.expected.saturating_sub(self.signers.len());
        if leading + awaiting < self.threshold {
            return TallyOutcome::Impossible;
        }

        TallyOutcome::Pending
    }
}

struct PendingConsensus {
    tally: ConsensusTally,
    tx: oneshot::Sender<Result<Vec<Consensus>, ConsensusError>>,
}

pub struct ConsensusManager {
    publisher: Arc<BroadbandPublisher>,
    subscriber: Arc<BroadbandSubscriber>,
    config: ConsensusConfig,
    pending: DashMap<String, PendingConsensus>,
}

impl ConsensusManager {
    pub fn new(
        publisher: Arc<BroadbandPublisher>,
        subscriber: Arc<BroadbandSubscriber>,
        config: ConsensusConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            publisher,
            subscriber,
            config,
            pending: DashMap::new(),
        })
    }

    pub async fn start(self: Arc<Self>) {
        let inbound = self.subscriber.subscribe();
        tokio::spawn(async move {
            self.receive_loop(inbound).await;
        });
    }

    /// Publishes `request` and waits for a majority of `expected_total` brokers to agree.
    pub async fn get_consensus(
        &self,
        request: QueryRequest,
        expected_total: usize,
    ) -> Result<Vec<Consensus>, ConsensusError> {
        let request_id = request.request_id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id.clone(),
            PendingConsensus {
                tally: ConsensusTally::new(request_id.clone(), expected_total),
                tx,
            },
        );

        if let Err(e) = self
            .publisher
            .publish(SystemPayload::QueryRequest(request))
            .await
        {
            self.pending.remove(&request_id);
            return Err(ConsensusError::Publish(e.to_string()));
        }

        match tokio::time::timeout(self.config.timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConsensusError::Timeout),
            Err(_) => {
                self.pending.remove(&request_id);
                warn!("Consensus for {} timed out", request_id);
                Err(ConsensusError::Timeout)
            }
        }
    }

    pub fn on_response(&self, signer: &NodeId, response: &QueryResponse) {
        let outcome = {
            let Some(mut entry) = self.pending.get_mut(&response.request_id) else {
                return;
            };
            entry.tally.record(signer, response)
        };

        let result = match outcome {
            TallyOutcome::Pending => return,
            TallyOutcome::Reached(votes) => Ok(votes),
            TallyOutcome::Impossible => Err(ConsensusError::NoConsensus),
        };

        if let Some((_, pending)) = self.pending.remove(&response.request_id) {
            let _ = pending.tx.send(result);
        }
    }

    async fn receive_loop(self: Arc<Self>, mut inbound: Inbound) {
        while let Some((msg, metadata)) = inbound.recv().await {
            if let SystemPayload::QueryResponse(response) = msg.payload {
                self.on_response(&metadata.publisher_id, &response);
            }
        }
    }
}
