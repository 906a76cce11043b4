use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::broadband::BroadbandPublisher;
use crate::config::PropagationConfig;
use crate::protocol::{QueryPropagate, QueryResponse, SystemPayload};
use crate::record::MessageId;
use crate::storage::LogStore;

struct Pending {
    response: QueryResponse,
    received_at: Instant,
}

/// Sends records the primary is missing, on brokers answering a foreign request.
pub struct PropagationDispatcher {
    log_store: Arc<LogStore>,
    publisher: Arc<BroadbandPublisher>,
    config: PropagationConfig,
    /// The issuing broker's answers.
    primary_responses: DashMap<String, Pending>,
    /// This broker's answers to requests issued elsewhere.
    foreign_responses: DashMap<String, Pending>,
}

impl PropagationDispatcher {
    pub fn new(
        log_store: Arc<LogStore>,
        publisher: Arc<BroadbandPublisher>,
        config: PropagationConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            log_store,
            publisher,
            config,
            primary_responses: DashMap::new(),
            foreign_responses: DashMap::new(),
        })
    }

    pub async fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            self.sweep_loop().await;
        });
    }

    pub async fn set_primary_response(&self, response: QueryResponse) {
        let request_id = response.request_id.clone();
        self.primary_responses.insert(
            request_id.clone(),
            Pending {
                response,
                received_at: Instant::now(),
            },
        );
        self.check_and_dispatch(&request_id).await;
    }

    pub async fn set_foreign_response(&self, response: QueryResponse) {
        let request_id = response.request_id.clone();
        self.foreign_responses.insert(
            request_id.clone(),
            Pending {
                response,
                received_at: Instant::now(),
            },
        );
        self.check_and_dispatch(&request_id).await;
    }

    pub fn pending_count(&self) -> usize {
        self.primary_responses.len() + self.foreign_responses.len()
    }

    async fn check_and_dispatch(&self, request_id: &str) {
        if !self.primary_responses.contains_key(request_id)
            || !self.foreign_responses.contains_key(request_id)
        {
            return;
        }

        let (Some((_, primary)), Some((_, foreign))) = (
            self.primary_responses.remove(request_id),
            self.foreign_responses.remove(request_id),
        ) else {
            // Another task claimed the pair first
            return;
        };

        let missing: Vec<&String> = foreign
            .response
            .hash_map
            .keys()
            .filter(|id| !primary.response.hash_map.contains_key(*id))
            .collect();

        if missing.is_empty() {
            return;
        }

        let mut payload = Vec::with_capacity(missing.len());
        for raw_id in missing {
            let id: MessageId = match raw_id.parse() {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping unparsable message id {}: {}", raw_id, e);
                    continue;
                }
            };
            match self.log_store.request_by_message_id(&id).next() {
                Some(Ok(record)) => match record.to_json() {
                    Ok(json) => payload.push((raw_id.clone(), json)),
                    Err(e) => error!("Failed to serialize {}: {}", raw_id, e),
                },
                Some(Err(e)) => error!("Failed to read {}: {}", raw_id, e),
                None => warn!("Record {} vanished before propagation", raw_id),
            }
        }

        let batch_size = self.config.propagate_batch_size.max(1);
        debug!(
            "Propagating {} record(s) for request {} in batches of {}",
            payload.len(),
            request_id,
            batch_size
        );

        for batch in payload.chunks(batch_size) {
            let propagate = QueryPropagate {
                request_id: request_id.to_string(),
                request_publisher_id: primary.response.request_publisher_id.clone(),
                payload: batch.to_vec(),
            };
            if let Err(e) = self
                .publisher
                .publish(SystemPayload::QueryPropagate(propagate))
                .await
            {
                error!("Failed to publish propagate for {}: {}", request_id, e);
            }
        }
    }

    /// Forgets responses whose counterpart never arrived.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let before = self.pending_count();
        self.primary_responses
            .retain(|_, p| p.received_at.elapsed() < ttl);
        self.foreign_responses
            .retain(|_, p| p.received_at.elapsed() < ttl);
        before - self.pending_count()
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.dispatcher_sweep());

        loop {
            interval.tick().await;
            let evicted = self.sweep(self.config.dispatcher_ttl());
            if evicted > 0 {
                debug!("Evicted {} unpaired query response(s)", evicted);
            }
        }
    }
}
