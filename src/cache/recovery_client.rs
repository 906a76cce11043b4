use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::broadband::{BroadbandPublisher, BroadbandSubscriber};
use crate::config::RecoveryConfig;
use crate::error::RecoveryError;
use crate::membership::types::NodeId;
use crate::protocol::{MessageMetadata, RecoveryRequest, SystemMessage, SystemPayload};

/// Per-responder bookkeeping for one recovery round.
///
/// Batches travel on different partitions and may arrive out of order, so they are
/// tracked by sequence number rather than by arrival.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponderProgress {
    pub received: BTreeSet<u64>,
    /// Batch count announced by the responder's completion.
    pub expected: Option<u64>,
    /// Publish time of the last batch received.
    pub timestamp: Option<u64>,
    pub is_fulfilled: bool,
}

impl ResponderProgress {
    pub fn is_complete(&self) -> bool {
        self.expected
            .is_some_and(|total| self.received.len() as u64 == total)
    }

    /// Lowest sequence number not yet received.
    pub fn first_missing(&self) -> u64 {
        (0..)
            .find(|seq| !self.received.contains(seq))
            .unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub request_id: String,
    /// Replayed messages, deduplicated and ordered by publish time.
    pub messages: Vec<(SystemMessage, MessageMetadata)>,
    pub progress: HashMap<NodeId, ResponderProgress>,
}

impl RecoveryReport {
    /// Every responder had its whole window replayed.
    pub fn is_fulfilled(&self) -> bool {
        self.progress.values().all(|p| p.is_fulfilled)
    }
}

/// Asks peers to replay their system cache and checks the replay is gap-free.
pub struct RecoveryClient {
    publisher: Arc<BroadbandPublisher>,
    subscriber: Arc<BroadbandSubscriber>,
    config: RecoveryConfig,
}

impl RecoveryClient {
    pub fn new(
        publisher: Arc<BroadbandPublisher>,
        subscriber: Arc<BroadbandSubscriber>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            publisher,
            subscriber,
            config,
        }
    }

    /// Recovers `[from, to]` from `responders`, retrying failed rounds with a fixed backoff.
    pub async fn recover(
        &self,
        from: u64,
        to: u64,
        responders: &[NodeId],
    ) -> Result<RecoveryReport, RecoveryError> {
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.round(from, to, responders).await {
                Ok(report) => {
                    info!(
                        "Recovered {} system message(s) from {} broker(s)",
                        report.messages.len(),
                        report.progress.len()
                    );
                    return Ok(report);
                }
                Err(e) => {
                    warn!("Recovery attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_backoff()).await;
                    }
                }
            }
        }

        Err(RecoveryError::Exhausted(attempts))
    }

    /// A responder that announced its batch count but left holes is a gap, anything else
    /// still outstanding is a plain timeout.
    fn timeout_error(progress: &HashMap<NodeId, ResponderProgress>) -> RecoveryError {
        progress
            .iter()
            .find_map(|(id, p)| {
                let total = p.expected?;
                (p.received.len() as u64 != total).then(|| RecoveryError::Gap {
                    responder: id.to_string(),
                    expected: p.first_missing(),
                    got: total,
                })
            })
            .unwrap_or(RecoveryError::Timeout)
    }

    async fn round(
        &self,
        from: u64,
        to: u64,
        responders: &[NodeId],
    ) -> Result<RecoveryReport, RecoveryError> {
        let mut inbound = self.subscriber.subscribe();
        let request = RecoveryRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            from,
            to,
        };
        let request_id = request.request_id.clone();

        self.publisher
            .publish(SystemPayload::RecoveryRequest(request))
            .await
            .map_err(|e| RecoveryError::Publish(e.to_string()))?;

        let mut progress: HashMap<NodeId, ResponderProgress> = responders
            .iter()
            .map(|id| (id.clone(), ResponderProgress::default()))
            .collect();
        let mut seen = HashSet::new();
        let mut messages = Vec::new();

        let deadline = tokio::time::sleep(self.config.round_timeout());
        tokio::pin!(deadline);

        while !progress.values().all(|p| p.is_complete()) {
            let (msg, metadata) = tokio::select! {
                _ = &mut deadline => return Err(Self::timeout_error(&progress)),
                next = inbound.recv() => match next {
                    Some(next) => next,
                    None => return Err(Self::timeout_error(&progress)),
                },
            };

            match msg.payload {
                SystemPayload::RecoveryResponse(response) if response.request_id == request_id => {
                    let p = progress.entry(metadata.publisher_id.clone()).or_default();
                    if p.expected.is_some_and(|total| response.seq_num >= total) {
                        return Err(RecoveryError::Gap {
                            responder: metadata.publisher_id.to_string(),
                            expected: p.first_missing(),
                            got: response.seq_num,
                        });
                    }
                    if !p.received.insert(response.seq_num) {
                        continue;
                    }
                    p.timestamp = p.timestamp.max(Some(metadata.timestamp));

                    for (replayed, replayed_meta) in response.payload {
                        let key = (
                            replayed_meta.publisher_id.clone(),
                            replayed_meta.sequence_number,
                        );
                        if seen.insert(key) {
                            messages.push((replayed, replayed_meta));
                        }
                    }
                }
                SystemPayload::RecoveryComplete(complete) if complete.request_id == request_id => {
                    let p = progress.entry(metadata.publisher_id.clone()).or_default();
                    if p.received.last().is_some_and(|last| *last >= complete.seq_num) {
                        return Err(RecoveryError::Gap {
                            responder: metadata.publisher_id.to_string(),
                            expected: complete.seq_num,
                            got: p.received.len() as u64,
                        });
                    }
                    p.timestamp.get_or_insert(0);
                    p.expected = Some(complete.seq_num);
                    p.is_fulfilled = complete.is_fulfilled;
                }
                _ => {}
            }
        }

        messages.sort_by_key(|(_, meta)| meta.timestamp);
        Ok(RecoveryReport {
            request_id,
            messages,
            progress,
        })
    }
}
