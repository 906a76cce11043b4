use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, warn};

use super::transport::Transport;
use super::types::{Envelope, Inbound};
use crate::protocol::{MessageMetadata, SystemMessage, decode};

const INBOUND_CAPACITY: usize = 1024;

pub struct BroadbandSubscriber {
    transport: Arc<dyn Transport>,
}

impl BroadbandSubscriber {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self { transport })
    }

    /// Opens a merged view of every partition.
    ///
    /// Partition receivers are attached before this returns, so nothing published
    /// afterwards is missed.
    pub fn subscribe(&self) -> Inbound {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

        for partition in 0..self.transport.partitions() {
            match self.transport.subscribe(partition) {
                Ok(receiver) => {
                    let tx = tx.clone();
                    tokio::spawn(forward_partition(partition, receiver, tx));
                }
                Err(e) => error!("Failed to subscribe to partition {}: {}", partition, e),
            }
        }

        rx
    }
}

async fn forward_partition(
    partition: u32,
    mut receiver: broadcast::Receiver<Envelope>,
    tx: mpsc::Sender<(SystemMessage, MessageMetadata)>,
) {
    loop {
        let envelope = match receiver.recv().await {
            Ok(envelope) => envelope,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Partition {} subscriber lagged by {} messages", partition, skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if let Err(e) = envelope.verify() {
            warn!(
                "Dropping envelope from {}: {}",
                envelope.metadata.publisher_id,
                e
            );
            continue;
        }

        let msg = match decode(&envelope.content) {
            Ok(msg) => msg,
            Err(e) => {
                error!(
                    "Failed to decode system message from {}: {}",
                    envelope.metadata.publisher_id,
                    e
                );
                continue;
            }
        };

        if tx.send((msg, envelope.metadata)).await.is_err() {
            break;
        }
    }
}
