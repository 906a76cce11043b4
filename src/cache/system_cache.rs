use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::pool::PoolDataSource;
use crate::broadband::{BroadbandSubscriber, Inbound};
use crate::config::CacheConfig;
use crate::protocol::{MessageMetadata, SystemMessage, SystemPayload};
use crate::util::now_ms;

const MIN_SHRINK_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub message: SystemMessage,
    pub metadata: MessageMetadata,
}

/// Recent control-plane traffic kept for replay to recovering peers.
pub struct SystemCache {
    subscriber: Arc<BroadbandSubscriber>,
    pool: Option<Arc<dyn PoolDataSource>>,
    config: CacheConfig,
    /// Arrival order, which is also timestamp order for a single broker.
    records: RwLock<VecDeque<CachedRecord>>,
}

impl SystemCache {
    pub fn new(
        subscriber: Arc<BroadbandSubscriber>,
        pool: Option<Arc<dyn PoolDataSource>>,
        config: CacheConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            subscriber,
            pool,
            config,
            records: RwLock::new(VecDeque::new()),
        })
    }

    pub async fn start(self: Arc<Self>) {
        let inbound = self.subscriber.subscribe();

        let receiver = self.clone();
        tokio::spawn(async move {
            receiver.receive_loop(inbound).await;
        });

        tokio::spawn(async move {
            self.shrink_loop().await;
        });
    }

    pub fn is_cacheable(payload: &SystemPayload) -> bool {
        matches!(
            payload,
            SystemPayload::QueryRequest(_)
                | SystemPayload::QueryResponse(_)
                | SystemPayload::QueryPropagate(_)
                | SystemPayload::ProofOfMessageStored(_)
                | SystemPayload::ProofOfReport(_)
        )
    }

    /// Keeps `message` if its type is worth replaying. Returns whether it was kept.
    pub async fn insert(&self, message: SystemMessage, metadata: MessageMetadata) -> bool {
        if !Self::is_cacheable(&message.payload) {
            return false;
        }
        self.records
            .write()
            .await
            .push_back(CachedRecord { message, metadata });
        true
    }

    /// Records published within `[from, to]`, in arrival order.
    pub async fn get(&self, from: u64, to: u64) -> Vec<CachedRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.metadata.timestamp >= from && r.metadata.timestamp <= to)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Drops everything published before `timestamp`. Returns how many were dropped.
    pub async fn shrink(&self, timestamp: u64) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.metadata.timestamp >= timestamp);
        let dropped = before - records.len();

        info!(
            "Shrunk system cache to {}: {} record(s) left",
            timestamp,
            records.len()
        );
        dropped
    }

    /// Next shrink delay and cutoff, from the pool when it answers.
    pub async fn shrink_plan(&self) -> (Duration, u64) {
        if let Some(pool) = &self.pool {
            match pool.get_data().await {
                Ok(data) => return (data.upload_interval(), data.checkpoint_ms()),
                Err(e) => warn!("Pool data unavailable, using default window: {}", e),
            }
        }

        let window = self.config.default_window().as_millis() as u64;
        (
            self.config.default_shrink_interval(),
            now_ms().saturating_sub(window),
        )
    }

    async fn shrink_loop(self: Arc<Self>) {
        let (delay, _) = self.shrink_plan().await;
        let mut delay = delay.max(MIN_SHRINK_DELAY);

        loop {
            tokio::time::sleep(delay).await;
            let (next_delay, cutoff) = self.shrink_plan().await;
            self.shrink(cutoff).await;
            delay = next_delay.max(MIN_SHRINK_DELAY);
        }
    }

    async fn receive_loop(self: Arc<Self>, mut inbound: Inbound) {
        while let Some((msg, metadata)) = inbound.recv().await {
            self.insert(msg, metadata).await;
        }
    }
}
