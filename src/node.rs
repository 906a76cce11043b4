//! Broker Assembly
//!
//! Builds every service of one broker over a shared system-stream transport and
//! exposes them to the HTTP layer. Construction is explicit: `build` wires, `start`
//! spawns the loops.

use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::broadband::{BroadbandPublisher, BroadbandSubscriber, Transport};
use crate::cache::{HttpPoolDataSource, PoolDataSource, RecoveryClient, RecoveryServer, SystemCache};
use crate::config::NodeConfig;
use crate::consensus::ConsensusManager;
use crate::error::RecoveryError;
use crate::http::handlers::{
    handle_consensus_query, handle_data_query, handle_recovery, handle_stored_stream_part,
    handle_stream_metadata,
};
use crate::http::protocol::{
    ENDPOINT_CONSENSUS_QUERY, ENDPOINT_DATA_QUERY, ENDPOINT_INGEST, ENDPOINT_RECOVERY,
    ENDPOINT_STORED_STREAM_PART, ENDPOINT_STREAM_METADATA,
};
use crate::ingestion::handlers::handle_ingest;
use crate::ingestion::{AssignmentEvent, MessageListener, StreamPartAssignments};
use crate::membership::types::{BrokerIdentity, NodeId, OnlineBrokers};
use crate::membership::{Heartbeat, RollCall};
use crate::propagation::{
    PropagationDispatcher, PropagationResolver, QueryRequestManager, QueryResponseManager,
};
use crate::storage::{LogStore, MemoryBackend};

pub struct Broker {
    pub config: NodeConfig,
    pub identity: BrokerIdentity,
    pub publisher: Arc<BroadbandPublisher>,
    pub subscriber: Arc<BroadbandSubscriber>,
    pub log_store: Arc<LogStore>,
    pub heartbeat: Arc<Heartbeat>,
    pub roll_call: Arc<RollCall>,
    pub resolver: Arc<PropagationResolver>,
    pub dispatcher: Arc<PropagationDispatcher>,
    pub query_requests: Arc<QueryRequestManager>,
    pub query_responses: Arc<QueryResponseManager>,
    pub consensus: Arc<ConsensusManager>,
    pub cache: Arc<SystemCache>,
    pub recovery: Arc<RecoveryServer>,
    pub assignments: Arc<StreamPartAssignments>,
    pub listener: Arc<MessageListener>,
}

impl Broker {
    /// Restores the configured key, or generates one for this run.
    pub fn identity_from_config(config: &NodeConfig) -> anyhow::Result<BrokerIdentity> {
        match config.node.private_key.as_deref() {
            Some(secret) => BrokerIdentity::from_hex(secret),
            None => {
                let identity = BrokerIdentity::generate();
                warn!("No private key configured, using ephemeral identity {}", identity.id);
                Ok(identity)
            }
        }
    }

    /// Wires every service over `transport`. Nothing runs until [`Broker::start`].
    pub fn build(
        config: NodeConfig,
        identity: BrokerIdentity,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let publisher = BroadbandPublisher::new(
            identity.clone(),
            transport.clone(),
            config.node.system_stream_id.clone(),
        );
        let subscriber = BroadbandSubscriber::new(transport);
        let log_store = LogStore::new(
            Arc::new(MemoryBackend::new()),
            config.storage.max_bucket_records,
        );

        let heartbeat = Heartbeat::new(publisher.clone(), subscriber.clone(), config.heartbeat.clone());
        let roll_call = RollCall::new(publisher.clone(), subscriber.clone(), config.roll_call.clone());
        let online: Arc<dyn OnlineBrokers> = heartbeat.clone();

        let resolver = PropagationResolver::new(
            identity.id.clone(),
            log_store.clone(),
            online.clone(),
            config.propagation.clone(),
        );
        let dispatcher = PropagationDispatcher::new(
            log_store.clone(),
            publisher.clone(),
            config.propagation.clone(),
        );
        let query_requests = QueryRequestManager::new(
            log_store.clone(),
            publisher.clone(),
            subscriber.clone(),
            resolver.clone(),
        );
        let query_responses = QueryResponseManager::new(
            identity.id.clone(),
            resolver.clone(),
            dispatcher.clone(),
            subscriber.clone(),
        );
        let consensus =
            ConsensusManager::new(publisher.clone(), subscriber.clone(), config.consensus.clone());

        let pool: Option<Arc<dyn PoolDataSource>> = match (&config.pool.url, &config.pool.pool_id) {
            (Some(url), Some(pool_id)) => Some(Arc::new(HttpPoolDataSource::new(url, pool_id))),
            _ => None,
        };
        let cache = SystemCache::new(subscriber.clone(), pool, config.cache.clone());
        let recovery = RecoveryServer::new(
            publisher.clone(),
            subscriber.clone(),
            cache.clone(),
            config.recovery.clone(),
        );

        let assignments = StreamPartAssignments::new();
        let listener = MessageListener::new(
            log_store.clone(),
            assignments.clone(),
            publisher.clone(),
            subscriber.clone(),
            online,
            config.ingestion.clone(),
        );

        Arc::new(Self {
            config,
            identity,
            publisher,
            subscriber,
            log_store,
            heartbeat,
            roll_call,
            resolver,
            dispatcher,
            query_requests,
            query_responses,
            consensus,
            cache,
            recovery,
            assignments,
            listener,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.identity.id
    }

    /// Spawns every receive and timer loop, then starts consuming `assignment_feed`.
    pub async fn start(&self, assignment_feed: mpsc::Receiver<AssignmentEvent>) {
        info!("Starting broker {}", self.identity.id);

        self.heartbeat.clone().start().await;
        self.roll_call.clone().start().await;
        self.query_requests.clone().start().await;
        self.query_responses.clone().start().await;
        self.dispatcher.clone().start().await;
        self.consensus.clone().start().await;
        self.cache.clone().start().await;
        self.recovery.clone().start().await;
        self.listener.clone().start().await;
        self.assignments.clone().start(assignment_feed);
    }

    pub fn recovery_client(&self) -> RecoveryClient {
        RecoveryClient::new(
            self.publisher.clone(),
            self.subscriber.clone(),
            self.config.recovery.clone(),
        )
    }

    /// Refills the system cache from the brokers currently answering roll call.
    /// Returns how many replayed messages were kept.
    pub async fn recover_cache(&self, from: u64, to: u64) -> Result<usize, RecoveryError> {
        let responders: Vec<NodeId> = self
            .roll_call
            .alive_brokers()
            .into_iter()
            .filter(|id| *id != self.identity.id)
            .collect();
        if responders.is_empty() {
            info!("No peers to recover from");
            return Ok(0);
        }

        let report = self.recovery_client().recover(from, to, &responders).await?;
        let mut kept = 0;
        for (message, metadata) in report.messages {
            if self.cache.insert(message, metadata).await {
                kept += 1;
            }
        }
        Ok(kept)
    }

    pub fn router(&self) -> Router {
        let online: Arc<dyn OnlineBrokers> = self.heartbeat.clone();

        Router::new()
            .route(ENDPOINT_DATA_QUERY, get(handle_data_query))
            .route(ENDPOINT_CONSENSUS_QUERY, get(handle_consensus_query))
            .route(ENDPOINT_STREAM_METADATA, get(handle_stream_metadata))
            .route(ENDPOINT_STORED_STREAM_PART, get(handle_stored_stream_part))
            .route(ENDPOINT_RECOVERY, post(handle_recovery))
            .route(ENDPOINT_INGEST, post(handle_ingest))
            .layer(Extension(self.query_requests.clone()))
            .layer(Extension(self.consensus.clone()))
            .layer(Extension(online))
            .layer(Extension(self.log_store.clone()))
            .layer(Extension(self.publisher.clone()))
            .layer(Extension(self.roll_call.clone()))
            .layer(Extension(self.listener.clone()))
            .layer(Extension(self.assignments.clone()))
    }
}
