use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::trace;

use super::transport::Transport;
use super::types::Envelope;
use crate::membership::types::{BrokerIdentity, NodeId};
use crate::protocol::{MessageMetadata, SystemMessage, SystemPayload, encode};
use crate::util::now_ms;

pub struct BroadbandPublisher {
    identity: BrokerIdentity,
    transport: Arc<dyn Transport>,
    stream_id: String,
    next_partition: AtomicU32,
    seq_num: AtomicU64,
}

impl BroadbandPublisher {
    pub fn new(
        identity: BrokerIdentity,
        transport: Arc<dyn Transport>,
        stream_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            transport,
            stream_id: stream_id.into(),
            next_partition: AtomicU32::new(0),
            seq_num: AtomicU64::new(0),
        })
    }

    pub fn publisher_id(&self) -> &NodeId {
        &self.identity.id
    }

    pub fn identity(&self) -> &BrokerIdentity {
        &self.identity
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Signs and sends `payload` on the next partition in round-robin order.
    pub async fn publish(&self, payload: SystemPayload) -> Result<MessageMetadata> {
        let partitions = self.transport.partitions().max(1);
        let partition = self.next_partition.fetch_add(1, Ordering::Relaxed) % partitions;
        let seq_num = self.seq_num.fetch_add(1, Ordering::SeqCst);

        let msg = SystemMessage::new(seq_num, payload);
        let content = encode(&msg)?;

        let metadata = MessageMetadata {
            stream_id: self.stream_id.clone(),
            partition,
            publisher_id: self.identity.id.clone(),
            timestamp: now_ms(),
            sequence_number: seq_num,
        };
        let signature = self
            .identity
            .sign(&Envelope::signing_payload(&metadata, &content)?);

        trace!(
            "Publishing {:?} seq={} partition={}",
            msg.message_type(),
            seq_num,
            partition
        );

        self.transport
            .send(Envelope {
                metadata: metadata.clone(),
                content,
                signature,
            })
            .await?;

        Ok(metadata)
    }
}
