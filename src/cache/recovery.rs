use std::sync::Arc;
use tracing::{debug, error, info};

use super::system_cache::SystemCache;
use crate::broadband::{BroadbandPublisher, BroadbandSubscriber, Inbound};
use crate::config::RecoveryConfig;
use crate::membership::types::NodeId;
use crate::protocol::{RecoveryComplete, RecoveryRequest, RecoveryResponse, SystemPayload};

/// Replays cached system traffic to peers that ask for it.
pub struct RecoveryServer {
    publisher: Arc<BroadbandPublisher>,
    subscriber: Arc<BroadbandSubscriber>,
    cache: Arc<SystemCache>,
    config: RecoveryConfig,
}

impl RecoveryServer {
    pub fn new(
        publisher: Arc<BroadbandPublisher>,
        subscriber: Arc<BroadbandSubscriber>,
        cache: Arc<SystemCache>,
        config: RecoveryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            publisher,
            subscriber,
            cache,
            config,
        })
    }

    pub fn publisher_id(&self) -> &NodeId {
        self.publisher.publisher_id()
    }

    pub async fn start(self: Arc<Self>) {
        let inbound = self.subscriber.subscribe();
        tokio::spawn(async move {
            self.receive_loop(inbound).await;
        });
        info!("Recovery server started");
    }

    /// Streams the cached window `[from, to]` as numbered batches followed by a completion.
    #[tracing::instrument(level = "debug", skip_all, fields(request_id = %request.request_id))]
    pub async fn process_request(&self, request: RecoveryRequest) -> anyhow::Result<RecoveryComplete> {
        let records = self.cache.get(request.from, request.to).await;
        let batch_size = self.config.batch_size.max(1);

        let mut seq_num = 0u64;
        let mut sent = 0usize;
        for batch in records.chunks(batch_size) {
            if seq_num >= self.config.response_limit {
                break;
            }
            if seq_num > 0 {
                tokio::time::sleep(self.config.interval()).await;
            }

            let response = RecoveryResponse {
                request_id: request.request_id.clone(),
                seq_num,
                payload: batch
                    .iter()
                    .map(|r| (r.message.clone(), r.metadata.clone()))
                    .collect(),
            };
            self.publisher
                .publish(SystemPayload::RecoveryResponse(response))
                .await?;
            debug!("Published recovery batch {} ({} records)", seq_num, batch.len());

            seq_num += 1;
            sent += batch.len();
        }

        let complete = RecoveryComplete {
            request_id: request.request_id,
            seq_num,
            is_fulfilled: sent == records.len(),
        };
        self.publisher
            .publish(SystemPayload::RecoveryComplete(complete.clone()))
            .await?;
        debug!(
            "Published recovery completion after {} batch(es), fulfilled={}",
            seq_num,
            complete.is_fulfilled
        );

        Ok(complete)
    }

    async fn receive_loop(self: Arc<Self>, mut inbound: Inbound) {
        while let Some((msg, metadata)) = inbound.recv().await {
            let SystemPayload::RecoveryRequest(request) = msg.payload else {
                continue;
            };
            debug!(
                "Recovery request {} from {} for [{}, {}]",
                request.request_id,
                metadata.publisher_id,
                request.from,
                request.to
            );

            // Paced batches must not hold up the next request
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.process_request(request).await {
                    error!("Recovery replay failed: {}", e);
                }
            });
        }
    }
}
