use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error};

use super::assignments::StreamPartAssignments;
use super::types::{IngestOutcome, StreamPartId};
use crate::broadband::{BroadbandPublisher, BroadbandSubscriber, Inbound};
use crate::config::IngestionConfig;
use crate::membership::types::OnlineBrokers;
use crate::protocol::{ProofOfMessageStored, SystemPayload};
use crate::record::StreamMessage;
use crate::record::signing::sha256_hex;
use crate::storage::LogStore;

struct Confirmation {
    /// Absent while only other brokers' proofs have been seen.
    message: Option<StreamMessage>,
    left: i64,
    expires_at: Instant,
    stored: bool,
}

/// Stores incoming records once a majority of brokers have announced the same content.
pub struct MessageListener {
    log_store: Arc<LogStore>,
    assignments: Arc<StreamPartAssignments>,
    publisher: Arc<BroadbandPublisher>,
    subscriber: Arc<BroadbandSubscriber>,
    online: Arc<dyn OnlineBrokers>,
    config: IngestionConfig,
    confirmations: DashMap<String, Confirmation>,
}

impl MessageListener {
    pub fn new(
        log_store: Arc<LogStore>,
        assignments: Arc<StreamPartAssignments>,
        publisher: Arc<BroadbandPublisher>,
        subscriber: Arc<BroadbandSubscriber>,
        online: Arc<dyn OnlineBrokers>,
        config: IngestionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            log_store,
            assignments,
            publisher,
            subscriber,
            online,
            config,
            confirmations: DashMap::new(),
        })
    }

    pub async fn start(self: Arc<Self>) {
        let inbound = self.subscriber.subscribe();

        let receiver = self.clone();
        tokio::spawn(async move {
            receiver.receive_loop(inbound).await;
        });

        tokio::spawn(async move {
            self.cleanup_loop().await;
        });
    }

    /// Proofs needed before a record is stored: half the online brokers, rounded up.
    pub fn threshold(&self) -> usize {
        self.online.online_brokers().len().max(1).div_ceil(2)
    }

    /// Content fingerprint shared by every broker holding the same record.
    pub fn fingerprint(serialized: &str) -> (u64, String) {
        let size = serialized.len() as u64;
        (size, sha256_hex(format!("{serialized}{size}").as_bytes()))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %msg.message_id))]
    pub async fn on_stream_message(&self, msg: StreamMessage) -> anyhow::Result<IngestOutcome> {
        let id = &msg.message_id;
        let stream_part = StreamPartId::new(id.stream_id.clone(), id.partition);
        if !self.assignments.has_stream_part(&stream_part) {
            return Ok(IngestOutcome::NotAssigned);
        }
        msg.verify()?;

        let (size, hash) = Self::fingerprint(&msg.to_json()?);
        let proof = ProofOfMessageStored {
            stream_id: id.stream_id.clone(),
            partition: id.partition,
            timestamp: id.timestamp,
            sequence_number: id.sequence_number,
            size,
            hash: hash.clone(),
        };

        let threshold = self.threshold() as i64;
        self.confirmations
            .entry(hash.clone())
            .or_insert_with(|| self.confirmation(threshold))
            .message = Some(msg);
        self.store_if_confirmed(&hash);

        self.publisher
            .publish(SystemPayload::ProofOfMessageStored(proof))
            .await?;

        Ok(IngestOutcome::Announced { hash })
    }

    pub fn on_proof(&self, proof: &ProofOfMessageStored) {
        let threshold = self.threshold() as i64;
        self.confirmations
            .entry(proof.hash.clone())
            .or_insert_with(|| self.confirmation(threshold))
            .left -= 1;
        self.store_if_confirmed(&proof.hash);
    }

    pub fn is_stored(&self, hash: &str) -> bool {
        self.confirmations.get(hash).is_some_and(|c| c.stored)
    }

    pub fn pending_count(&self) -> usize {
        self.confirmations.len()
    }

    fn confirmation(&self, threshold: i64) -> Confirmation {
        Confirmation {
            message: None,
            left: threshold,
            expires_at: Instant::now() + self.config.confirmation_ttl(),
            stored: false,
        }
    }

    fn store_if_confirmed(&self, hash: &str) {
        let Some(mut confirmation) = self.confirmations.get_mut(hash) else {
            return;
        };
        if confirmation.stored || confirmation.left > 0 {
            return;
        }
        let Some(msg) = confirmation.message.as_ref() else {
            return;
        };

        match self.log_store.store(msg) {
            Ok(_) => confirmation.stored = true,
            Err(e) => error!("Failed to store confirmed record {}: {}", msg.message_id, e),
        }
    }

    /// Forgets expired confirmations. Returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.confirmations.len();
        self.confirmations.retain(|_, c| c.expires_at > now);
        before - self.confirmations.len()
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval());

        loop {
            interval.tick().await;
            let dropped = self.cleanup();
            if dropped > 0 {
                debug!("Dropped {} expired confirmation(s)", dropped);
            }
        }
    }

    async fn receive_loop(self: Arc<Self>, mut inbound: Inbound) {
        while let Some((msg, _)) = inbound.recv().await {
            if let SystemPayload::ProofOfMessageStored(proof) = msg.payload {
                self.on_proof(&proof);
            }
        }
    }
}
