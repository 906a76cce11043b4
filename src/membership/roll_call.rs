use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::types::NodeId;
use crate::broadband::{BroadbandPublisher, BroadbandSubscriber, Inbound};
use crate::config::RollCallConfig;
use crate::protocol::SystemPayload;

pub struct RollCall {
    publisher: Arc<BroadbandPublisher>,
    subscriber: Arc<BroadbandSubscriber>,
    config: RollCallConfig,
    request_id: RwLock<Option<String>>,
    responses: DashMap<NodeId, Instant>,
    reset: Notify,
}

impl RollCall {
    pub fn new(
        publisher: Arc<BroadbandPublisher>,
        subscriber: Arc<BroadbandSubscriber>,
        config: RollCallConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            publisher,
            subscriber,
            config,
            request_id: RwLock::new(None),
            responses: DashMap::new(),
            reset: Notify::new(),
        })
    }

    pub async fn start(self: Arc<Self>) {
        info!("Starting roll call (round {:?})", self.config.round());
        let inbound = self.subscriber.subscribe();

        let _receive_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop(inbound).await;
            })
        };

        let _timer_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.timer_loop().await;
            })
        };
    }

    /// Brokers that answered the current roll call within the last round.
    pub fn alive_brokers(&self) -> Vec<NodeId> {
        let round = self.config.round();
        let mut alive: Vec<NodeId> = self
            .responses
            .iter()
            .filter(|entry| entry.value().elapsed() <= round)
            .map(|entry| entry.key().clone())
            .collect();
        alive.sort();
        alive
    }

    pub async fn current_request_id(&self) -> Option<String> {
        self.request_id.read().await.clone()
    }

    fn next_delay(&self) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        self.config
            .round()
            .saturating_sub(self.config.spread().mul_f64(jitter))
    }

    async fn timer_loop(self: Arc<Self>) {
        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = self.call().await {
                        warn!("Failed to publish roll call: {}", e);
                    }
                }
                _ = self.reset.notified() => {}
            }
        }
    }

    /// Starts a new roll call round right away.
    pub async fn call(&self) -> anyhow::Result<()> {
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!("Calling roll {}", request_id);
        *self.request_id.write().await = Some(request_id.clone());
        self.publisher
            .publish(SystemPayload::RollCallRequest { request_id })
            .await?;
        Ok(())
    }

    pub async fn on_request(&self, request_id: String, from: &NodeId) -> anyhow::Result<()> {
        trace!("Roll call {} from {}", request_id, from);
        self.reset.notify_one();
        *self.request_id.write().await = Some(request_id.clone());
        self.publisher
            .publish(SystemPayload::RollCallResponse { request_id })
            .await?;
        Ok(())
    }

    pub async fn on_response(&self, request_id: &str, from: &NodeId) {
        let current = self.request_id.read().await;
        if current.as_deref() == Some(request_id) {
            self.responses.insert(from.clone(), Instant::now());
        }
    }

    async fn receive_loop(self: Arc<Self>, mut inbound: Inbound) {
        while let Some((msg, metadata)) = inbound.recv().await {
            match msg.payload {
                SystemPayload::RollCallRequest { request_id } => {
                    if let Err(e) = self.on_request(request_id, &metadata.publisher_id).await {
                        error!("Error answering roll call: {}", e);
                    }
                }
                SystemPayload::RollCallResponse { request_id } => {
                    self.on_response(&request_id, &metadata.publisher_id).await;
                }
                _ => {}
            }
        }
    }
}
