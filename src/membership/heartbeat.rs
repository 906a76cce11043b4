use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use super::types::{NodeId, OnlineBrokers};
use crate::broadband::{BroadbandPublisher, BroadbandSubscriber, Inbound};
use crate::config::HeartbeatConfig;
use crate::protocol::SystemPayload;

pub struct Heartbeat {
    publisher: Arc<BroadbandPublisher>,
    subscriber: Arc<BroadbandSubscriber>,
    config: HeartbeatConfig,
    /// Local receive time of each broker's latest beat.
    last_seen: DashMap<NodeId, Instant>,
}

impl Heartbeat {
    pub fn new(
        publisher: Arc<BroadbandPublisher>,
        subscriber: Arc<BroadbandSubscriber>,
        config: HeartbeatConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            publisher,
            subscriber,
            config,
            last_seen: DashMap::new(),
        })
    }

    pub async fn start(self: Arc<Self>) {
        info!("Starting heartbeat (every {:?})", self.config.interval());
        let inbound = self.subscriber.subscribe();

        let _receive_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop(inbound).await;
            })
        };

        let _beat_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.beat_loop().await;
            })
        };
    }

    pub fn on_heartbeat(&self, from: &NodeId) {
        if self.last_seen.insert(from.clone(), Instant::now()).is_none() {
            info!("Broker {} came online", from);
        }
    }

    async fn beat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.interval());

        loop {
            interval.tick().await;
            if let Err(e) = self.publisher.publish(SystemPayload::Heartbeat).await {
                warn!("Failed to publish heartbeat: {}", e);
            }
        }
    }

    async fn receive_loop(self: Arc<Self>, mut inbound: Inbound) {
        while let Some((msg, metadata)) = inbound.recv().await {
            if let SystemPayload::Heartbeat = msg.payload {
                self.on_heartbeat(&metadata.publisher_id);
            }
        }
    }
}

impl OnlineBrokers for Heartbeat {
    fn online_brokers(&self) -> Vec<NodeId> {
        let threshold = self.config.threshold();
        let mut brokers: Vec<NodeId> = self
            .last_seen
            .iter()
            .filter(|entry| entry.value().elapsed() <= threshold)
            .map(|entry| entry.key().clone())
            .collect();
        brokers.sort();
        brokers
    }
}
