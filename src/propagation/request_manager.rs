use std::sync::Arc;
use tracing::{debug, error};

use super::resolver::PropagationResolver;
use super::types::{QueryHashMap, Resolution};
use crate::broadband::{BroadbandPublisher, BroadbandSubscriber, Inbound};
use crate::error::{PropagationError, StorageError};
use crate::membership::types::NodeId;
use crate::protocol::{QueryOptions, QueryRequest, QueryResponse, SystemPayload};
use crate::record::StreamMessage;
use crate::storage::{LogStore, RecordStream};

/// Answers query requests from local storage and issues this broker's own requests.
pub struct QueryRequestManager {
    log_store: Arc<LogStore>,
    publisher: Arc<BroadbandPublisher>,
    subscriber: Arc<BroadbandSubscriber>,
    resolver: Arc<PropagationResolver>,
}

impl QueryRequestManager {
    pub fn new(
        log_store: Arc<LogStore>,
        publisher: Arc<BroadbandPublisher>,
        subscriber: Arc<BroadbandSubscriber>,
        resolver: Arc<PropagationResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            log_store,
            publisher,
            subscriber,
            resolver,
        })
    }

    pub async fn start(self: Arc<Self>) {
        let inbound = self.subscriber.subscribe();
        tokio::spawn(async move {
            self.receive_loop(inbound).await;
        });
    }

    /// Local answer to `request` as a lazy record stream.
    pub fn get_data_for_query_request(&self, request: &QueryRequest) -> RecordStream {
        let stream_id = request.stream_id.as_str();
        let partition = request.partition;

        match &request.query_options {
            QueryOptions::Last { last } => self.log_store.request_last(stream_id, partition, *last),
            QueryOptions::From {
                from,
                publisher_id,
                limit,
            } => self.log_store.request_from(
                stream_id,
                partition,
                from.timestamp,
                from.lower(),
                publisher_id.as_deref(),
                *limit,
            ),
            QueryOptions::Range {
                from,
                to,
                publisher_id,
                msg_chain_id,
                limit,
            } => self.log_store.request_range(
                stream_id,
                partition,
                from.timestamp,
                from.lower(),
                to.timestamp,
                to.upper(),
                publisher_id.as_deref(),
                msg_chain_id.as_deref(),
                *limit,
            ),
        }
    }

    pub fn get_hash_map(&self, request: &QueryRequest) -> Result<QueryHashMap, StorageError> {
        let mut hash_map = QueryHashMap::new();
        for record in self.get_data_for_query_request(request) {
            let record: StreamMessage = record?;
            hash_map.insert(record.message_id.to_string(), record.content_hash());
        }
        Ok(hash_map)
    }

    /// Publishes this broker's answer to a request issued by `request_publisher`.
    #[tracing::instrument(level = "debug", skip_all, fields(request_id = %request.request_id))]
    pub async fn on_request(
        &self,
        request: QueryRequest,
        request_publisher: &NodeId,
    ) -> anyhow::Result<()> {
        let hash_map = self.get_hash_map(&request)?;
        debug!("Answering with {} record(s)", hash_map.len());

        let response = QueryResponse::signed(
            request.request_id,
            request_publisher.clone(),
            hash_map,
            self.publisher.identity(),
        );
        self.publisher
            .publish(SystemPayload::QueryResponse(response))
            .await?;
        Ok(())
    }

    /// Issues `request` and waits until the local store reflects every online broker's answer.
    pub async fn publish_query_request_and_wait_for_propagate_resolution(
        &self,
        request: QueryRequest,
    ) -> Result<Resolution, PropagationError> {
        let request_id = request.request_id.clone();
        let resolution = self.resolver.wait_for_propagate_resolution(&request)?;

        if let Err(e) = self
            .publisher
            .publish(SystemPayload::QueryRequest(request))
            .await
        {
            self.resolver.cancel(&request_id);
            return Err(PropagationError::Publish(e.to_string()));
        }

        resolution.await
    }

    async fn receive_loop(self: Arc<Self>, mut inbound: Inbound) {
        while let Some((msg, metadata)) = inbound.recv().await {
            if let SystemPayload::QueryRequest(request) = msg.payload
                && let Err(e) = self.on_request(request, &metadata.publisher_id).await
            {
                error!(
                    "Error answering query request from {}: {}",
                    metadata.publisher_id,
                    e
                );
            }
        }
    }
}
