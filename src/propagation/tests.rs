//! Propagation Module Tests
//!
//! Brokers are wired over a single-partition `MemoryBus` so delivery order is deterministic.
//!
//! ## Test Scopes
//! - **Convergence**: solo broker, matching peers, gap filling.
//! - **Integrity**: forged, unlisted and off-stream records are dropped without
//!   blocking resolution.
//! - **Timing**: the timeout path, late messages and early-arriving messages.
//! - **Dispatcher**: diffing against the primary, batching and TTL eviction.

#[cfg(test)]
mod tests {
    use crate::broadband::{BroadbandPublisher, BroadbandSubscriber, Inbound, MemoryBus};
    use crate::config::PropagationConfig;
    use crate::error::PropagationError;
    use crate::membership::types::{BrokerIdentity, NodeId, OnlineBrokers};
    use crate::propagation::{
        PropagationDispatcher, PropagationResolver, QueryHashMap, QueryRequestManager,
        QueryResponseManager,
    };
    use crate::protocol::{
        QueryOptions, QueryPropagate, QueryRef, QueryRequest, QueryResponse, SystemMessageType,
        SystemPayload,
    };
    use crate::record::signing::{generate_key, public_id};
    use crate::record::{MessageId, StreamMessage};
    use crate::storage::{LogStore, MemoryBackend};
    use ed25519_dalek::SigningKey;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const STREAM: &str = "stream-1";

    struct StaticOnline(Mutex<Vec<NodeId>>);

    impl OnlineBrokers for StaticOnline {
        fn online_brokers(&self) -> Vec<NodeId> {
            self.0.lock().unwrap().clone()
        }
    }

    struct TestBroker {
        id: NodeId,
        identity: BrokerIdentity,
        log_store: Arc<LogStore>,
        resolver: Arc<PropagationResolver>,
        dispatcher: Arc<PropagationDispatcher>,
        requests: Arc<QueryRequestManager>,
        responses: Arc<QueryResponseManager>,
    }

    fn broker(bus: &Arc<MemoryBus>, online: Arc<StaticOnline>, config: PropagationConfig) -> TestBroker {
        let identity = BrokerIdentity::generate();
        let id = identity.id.clone();
        let publisher = BroadbandPublisher::new(identity.clone(), bus.clone(), "system");
        let subscriber = BroadbandSubscriber::new(bus.clone());
        let log_store = LogStore::new(Arc::new(MemoryBackend::new()), 100);

        let resolver = PropagationResolver::new(id.clone(), log_store.clone(), online, config.clone());
        let dispatcher = PropagationDispatcher::new(log_store.clone(), publisher.clone(), config);
        let requests = QueryRequestManager::new(
            log_store.clone(),
            publisher,
            subscriber.clone(),
            resolver.clone(),
        );
        let responses =
            QueryResponseManager::new(id.clone(), resolver.clone(), dispatcher.clone(), subscriber);

        TestBroker {
            id,
            identity,
            log_store,
            resolver,
            dispatcher,
            requests,
            responses,
        }
    }

    impl TestBroker {
        async fn start(&self) {
            self.requests.clone().start().await;
            self.responses.clone().start().await;
        }
    }

    /// Brokers that all see each other as online.
    async fn cluster(size: usize, config: PropagationConfig) -> (Arc<MemoryBus>, Vec<TestBroker>) {
        let bus = MemoryBus::new(1);
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let brokers: Vec<TestBroker> = (0..size)
            .map(|_| broker(&bus, online.clone(), config.clone()))
            .collect();
        *online.0.lock().unwrap() = brokers.iter().map(|b| b.id.clone()).collect();
        for b in &brokers {
            b.start().await;
        }
        (bus, brokers)
    }

    fn record(key: &SigningKey, ts: u64) -> StreamMessage {
        StreamMessage::signed(
            MessageId::new(STREAM, 0, ts, 0, "", "chain"),
            None,
            format!(r#"{{"ts":{ts}}}"#),
            key,
        )
    }

    fn propagate_of(request: &QueryRequest, primary: &NodeId, records: &[StreamMessage]) -> QueryPropagate {
        QueryPropagate {
            request_id: request.request_id.clone(),
            request_publisher_id: primary.clone(),
            payload: records
                .iter()
                .map(|m| (m.message_id.to_string(), m.to_json().unwrap()))
                .collect(),
        }
    }

    fn hashes_of(records: &[StreamMessage]) -> QueryHashMap {
        records
            .iter()
            .map(|m| (m.message_id.to_string(), m.content_hash()))
            .collect()
    }

    /// A primary broker plus one peer identity it expects an answer from.
    fn primary_with_peer(config: PropagationConfig) -> (TestBroker, BrokerIdentity) {
        let bus = MemoryBus::new(1);
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let primary = broker(&bus, online.clone(), config);
        let peer = BrokerIdentity::generate();
        *online.0.lock().unwrap() = vec![primary.id.clone(), peer.id.clone()];
        (primary, peer)
    }

    fn range_query() -> QueryRequest {
        QueryRequest::new(
            "consumer",
            STREAM,
            0,
            QueryOptions::Range {
                from: QueryRef {
                    timestamp: 0,
                    sequence_number: None,
                },
                to: QueryRef {
                    timestamp: u64::MAX,
                    sequence_number: None,
                },
                publisher_id: None,
                msg_chain_id: None,
                limit: None,
            },
        )
    }

    async fn drain(inbound: &mut Inbound) -> Vec<(SystemMessageType, NodeId)> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut seen = Vec::new();
        while let Ok((msg, meta)) = inbound.try_recv() {
            seen.push((msg.message_type(), meta.publisher_id));
        }
        seen
    }

    fn count(seen: &[(SystemMessageType, NodeId)], kind: SystemMessageType) -> usize {
        seen.iter().filter(|(t, _)| *t == kind).count()
    }

    // ============================================================
    // CONVERGENCE
    // ============================================================

    #[tokio::test]
    async fn test_solo_broker_resolves_with_single_request() {
        let (bus, brokers) = cluster(1, PropagationConfig::default()).await;
        let mut observer = BroadbandSubscriber::new(bus.clone()).subscribe();
        let primary = &brokers[0];
        let key = generate_key();
        primary.log_store.store(&record(&key, 1000)).unwrap();

        let resolution = primary
            .requests
            .publish_query_request_and_wait_for_propagate_resolution(range_query())
            .await
            .unwrap();

        assert_eq!(resolution.participants, vec![primary.id.clone()]);
        let seen = drain(&mut observer).await;
        assert_eq!(count(&seen, SystemMessageType::QueryRequest), 1);
        assert_eq!(count(&seen, SystemMessageType::QueryPropagate), 0);
        assert!(!primary.resolver.is_pending(&resolution.request_id));
    }

    #[tokio::test]
    async fn test_matching_peers_resolve_without_propagation() {
        let (bus, brokers) = cluster(3, PropagationConfig::default()).await;
        let mut observer = BroadbandSubscriber::new(bus.clone()).subscribe();
        let key = generate_key();
        for b in &brokers {
            b.log_store.store(&record(&key, 1000)).unwrap();
            b.log_store.store(&record(&key, 2000)).unwrap();
        }

        let resolution = brokers[0]
            .requests
            .publish_query_request_and_wait_for_propagate_resolution(range_query())
            .await
            .unwrap();

        assert_eq!(resolution.participants.len(), 3);
        assert_eq!(resolution.participants[0], brokers[0].id);
        let seen = drain(&mut observer).await;
        assert_eq!(count(&seen, SystemMessageType::QueryResponse), 3);
        assert_eq!(count(&seen, SystemMessageType::QueryPropagate), 0);
    }

    #[tokio::test]
    async fn test_missing_records_are_propagated_and_stored_once() {
        let (bus, brokers) = cluster(3, PropagationConfig::default()).await;
        let mut observer = BroadbandSubscriber::new(bus.clone()).subscribe();
        let key = generate_key();
        let shared = record(&key, 1000);
        let missing = vec![record(&key, 2000), record(&key, 3000)];

        brokers[0].log_store.store(&shared).unwrap();
        for peer in &brokers[1..] {
            peer.log_store.store(&shared).unwrap();
            for m in &missing {
                peer.log_store.store(m).unwrap();
            }
        }

        brokers[0]
            .requests
            .publish_query_request_and_wait_for_propagate_resolution(range_query())
            .await
            .unwrap();

        // Both peers propagate, the primary stores each record once
        assert_eq!(
            brokers[0]
                .log_store
                .get_number_of_messages_in_stream(STREAM, 0)
                .unwrap(),
            3
        );
        let local: Vec<StreamMessage> = brokers[0]
            .requests
            .get_data_for_query_request(&range_query())
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(local[1..], missing[..]);

        let seen = drain(&mut observer).await;
        assert_eq!(count(&seen, SystemMessageType::QueryPropagate), 2);
    }

    // ============================================================
    // INTEGRITY
    // ============================================================

    #[tokio::test]
    async fn test_forged_record_is_dropped() {
        let (_bus, brokers) = cluster(2, PropagationConfig::default()).await;
        let key = generate_key();

        // Signed with a real key but claiming someone else's publisher id
        let mut forged = record(&key, 5000);
        forged.message_id.publisher_id = public_id(&generate_key());
        let genuine = record(&key, 6000);
        brokers[1].log_store.store(&forged).unwrap();
        brokers[1].log_store.store(&genuine).unwrap();

        brokers[0]
            .requests
            .publish_query_request_and_wait_for_propagate_resolution(range_query())
            .await
            .unwrap();

        let stored: Vec<StreamMessage> = brokers[0]
            .log_store
            .request_last(STREAM, 0, 10)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(stored, vec![genuine]);
    }

    #[tokio::test]
    async fn test_propagate_from_request_publisher_is_ignored() {
        let bus = MemoryBus::new(1);
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let primary = broker(&bus, online.clone(), PropagationConfig::default());
        let peer = BrokerIdentity::generate();
        *online.0.lock().unwrap() = vec![primary.id.clone(), peer.id.clone()];

        let request = range_query();
        let _wait = primary.resolver.wait_for_propagate_resolution(&request).unwrap();
        primary
            .resolver
            .set_primary_response(&request.request_id, QueryHashMap::new());

        let m = record(&generate_key(), 1000);
        let mut hash_map = QueryHashMap::new();
        hash_map.insert(m.message_id.to_string(), m.content_hash());
        primary.resolver.set_foreign_response(
            &peer.id,
            QueryResponse::signed(request.request_id.clone(), primary.id.clone(), hash_map, &peer),
        );

        primary.resolver.on_query_propagate(
            &primary.id,
            QueryPropagate {
                request_id: request.request_id.clone(),
                request_publisher_id: primary.id.clone(),
                payload: vec![(m.message_id.to_string(), m.to_json().unwrap())],
            },
        );

        assert!(primary.resolver.is_pending(&request.request_id));
        assert_eq!(
            primary.log_store.get_number_of_messages_in_stream(STREAM, 0).unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_unlisted_records_are_not_stored() {
        let bus = MemoryBus::new(1);
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let primary = broker(&bus, online.clone(), PropagationConfig::default());
        let peer = BrokerIdentity::generate();
        // The silent ghost keeps the request open
        *online.0.lock().unwrap() =
            vec![primary.id.clone(), peer.id.clone(), NodeId::from("ghost")];

        let request = range_query();
        let _wait = primary.resolver.wait_for_propagate_resolution(&request).unwrap();
        primary
            .resolver
            .set_primary_response(&request.request_id, QueryHashMap::new());
        primary.resolver.set_foreign_response(
            &peer.id,
            QueryResponse::signed(request.request_id.clone(), primary.id.clone(), QueryHashMap::new(), &peer),
        );

        // ARRANGE: validly signed, but nobody listed them
        let key = generate_key();
        let unrelated = StreamMessage::signed(
            MessageId::new("unrelated-stream", 7, 1000, 0, "", "chain"),
            None,
            "{}",
            &key,
        );
        let same_stream = record(&key, 1000);

        // ACT
        primary.resolver.on_query_propagate(
            &peer.id,
            propagate_of(&request, &primary.id, &[unrelated, same_stream]),
        );

        // ASSERT
        assert!(primary.resolver.is_pending(&request.request_id));
        assert_eq!(
            primary.log_store.get_number_of_messages_in_stream("unrelated-stream", 7).unwrap(),
            0
        );
        assert_eq!(primary.log_store.get_number_of_messages_in_stream(STREAM, 0).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unlisted_record_from_answered_peer_is_dropped() {
        let (primary, peer) = primary_with_peer(PropagationConfig::default());
        let key = generate_key();
        let listed = record(&key, 1000);
        let extra = record(&key, 2000);
        let request = range_query();
        let wait = primary.resolver.wait_for_propagate_resolution(&request).unwrap();
        primary
            .resolver
            .set_primary_response(&request.request_id, QueryHashMap::new());
        primary.resolver.set_foreign_response(
            &peer.id,
            QueryResponse::signed(
                request.request_id.clone(),
                primary.id.clone(),
                hashes_of(std::slice::from_ref(&listed)),
                &peer,
            ),
        );

        primary.resolver.on_query_propagate(
            &peer.id,
            propagate_of(&request, &primary.id, &[listed.clone(), extra]),
        );

        wait.await.unwrap();
        let stored: Vec<StreamMessage> = primary
            .log_store
            .request_last(STREAM, 0, 10)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(stored, vec![listed]);
    }

    #[tokio::test]
    async fn test_listed_record_from_other_stream_is_dropped() {
        let (primary, peer) = primary_with_peer(PropagationConfig::default());
        let off_stream = StreamMessage::signed(
            MessageId::new("unrelated-stream", 7, 1000, 0, "", "chain"),
            None,
            "{}",
            &generate_key(),
        );
        let request = range_query();
        let wait = primary.resolver.wait_for_propagate_resolution(&request).unwrap();
        primary
            .resolver
            .set_primary_response(&request.request_id, QueryHashMap::new());

        // The peer lists it in its own answer, then ships it
        primary.resolver.set_foreign_response(
            &peer.id,
            QueryResponse::signed(
                request.request_id.clone(),
                primary.id.clone(),
                hashes_of(std::slice::from_ref(&off_stream)),
                &peer,
            ),
        );
        assert!(primary.resolver.is_pending(&request.request_id));
        primary.resolver.on_query_propagate(
            &peer.id,
            propagate_of(&request, &primary.id, &[off_stream]),
        );

        // Dropping it still settles the request
        assert!(wait.await.is_ok());
        assert_eq!(
            primary.log_store.get_number_of_messages_in_stream("unrelated-stream", 7).unwrap(),
            0
        );
    }

    // ============================================================
    // TIMING
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_peer_times_out() {
        let bus = MemoryBus::new(1);
        let mut observer = BroadbandSubscriber::new(bus.clone()).subscribe();
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let primary = broker(&bus, online.clone(), PropagationConfig::default());
        primary.start().await;
        *online.0.lock().unwrap() = vec![primary.id.clone(), NodeId::from("ghost")];

        let request = range_query();
        let request_id = request.request_id.clone();
        let started = tokio::time::Instant::now();
        let err = primary
            .requests
            .publish_query_request_and_wait_for_propagate_resolution(request)
            .await
            .unwrap_err();

        assert!(matches!(err, PropagationError::Timeout));
        assert_eq!(err.to_string(), "Propagation timeout");
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(!primary.resolver.is_pending(&request_id));

        let mut requests = 0;
        while let Ok((msg, _)) = observer.try_recv() {
            if msg.message_type() == SystemMessageType::QueryRequest {
                requests += 1;
            }
        }
        assert_eq!(requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_after_timeout_are_ignored() {
        let (primary, peer) = primary_with_peer(PropagationConfig::default());
        let m = record(&generate_key(), 1000);
        let request = range_query();
        let wait = primary.resolver.wait_for_propagate_resolution(&request).unwrap();
        primary
            .resolver
            .set_primary_response(&request.request_id, QueryHashMap::new());

        assert!(matches!(wait.await, Err(PropagationError::Timeout)));
        assert!(!primary.resolver.is_pending(&request.request_id));

        // ACT: the peer answers and ships the record too late
        primary.resolver.set_foreign_response(
            &peer.id,
            QueryResponse::signed(
                request.request_id.clone(),
                primary.id.clone(),
                hashes_of(std::slice::from_ref(&m)),
                &peer,
            ),
        );
        primary
            .resolver
            .on_query_propagate(&peer.id, propagate_of(&request, &primary.id, &[m]));

        // ASSERT
        assert!(!primary.resolver.is_pending(&request.request_id));
        assert_eq!(primary.log_store.get_number_of_messages_in_stream(STREAM, 0).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_held_record_is_discarded_when_answer_omits_it() {
        let (primary, peer) = primary_with_peer(PropagationConfig::default());
        let m = record(&generate_key(), 1000);
        let request = range_query();
        let wait = primary.resolver.wait_for_propagate_resolution(&request).unwrap();
        primary
            .resolver
            .set_primary_response(&request.request_id, QueryHashMap::new());

        // Arrives before the peer's answer, which then lists nothing
        primary
            .resolver
            .on_query_propagate(&peer.id, propagate_of(&request, &primary.id, &[m]));
        primary.resolver.set_foreign_response(
            &peer.id,
            QueryResponse::signed(request.request_id.clone(), primary.id.clone(), QueryHashMap::new(), &peer),
        );

        assert!(wait.await.is_ok());
        assert_eq!(primary.log_store.get_number_of_messages_in_stream(STREAM, 0).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_early_messages_are_replayed_after_primary_answer() {
        let bus = MemoryBus::new(1);
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let primary = broker(&bus, online.clone(), PropagationConfig::default());
        let peer = BrokerIdentity::generate();
        *online.0.lock().unwrap() = vec![primary.id.clone(), peer.id.clone()];

        let request = range_query();
        let wait = primary.resolver.wait_for_propagate_resolution(&request).unwrap();

        let m = record(&generate_key(), 1000);
        let mut hash_map = QueryHashMap::new();
        hash_map.insert(m.message_id.to_string(), m.content_hash());

        // ARRANGE: propagate first, then the foreign answer listing it, then the primary
        // answer. The record is held until the peer's own answer names it.
        primary.resolver.on_query_propagate(
            &peer.id,
            QueryPropagate {
                request_id: request.request_id.clone(),
                request_publisher_id: primary.id.clone(),
                payload: vec![(m.message_id.to_string(), m.to_json().unwrap())],
            },
        );
        primary.resolver.set_foreign_response(
            &peer.id,
            QueryResponse::signed(request.request_id.clone(), primary.id.clone(), hash_map, &peer),
        );
        assert!(primary.resolver.is_pending(&request.request_id));

        // ACT
        primary
            .resolver
            .set_primary_response(&request.request_id, QueryHashMap::new());

        // ASSERT
        let resolution = wait.await.unwrap();
        assert_eq!(resolution.participants, vec![primary.id.clone(), peer.id.clone()]);
        assert_eq!(
            primary.log_store.request_last(STREAM, 0, 1).next().unwrap().unwrap(),
            m
        );
    }

    #[tokio::test]
    async fn test_partial_quorum_resolves() {
        let bus = MemoryBus::new(1);
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let config = PropagationConfig {
            quorum_threshold: 0.5,
            ..PropagationConfig::default()
        };
        let primary = broker(&bus, online.clone(), config);
        let peer = BrokerIdentity::generate();
        *online.0.lock().unwrap() =
            vec![primary.id.clone(), peer.id.clone(), NodeId::from("ghost")];

        let request = range_query();
        let wait = primary.resolver.wait_for_propagate_resolution(&request).unwrap();
        primary
            .resolver
            .set_primary_response(&request.request_id, QueryHashMap::new());
        assert!(primary.resolver.is_pending(&request.request_id));

        primary.resolver.set_foreign_response(
            &peer.id,
            QueryResponse::signed(
                request.request_id.clone(),
                primary.id.clone(),
                QueryHashMap::new(),
                &peer,
            ),
        );

        assert!(wait.await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let bus = MemoryBus::new(1);
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let primary = broker(&bus, online, PropagationConfig::default());
        let request = range_query();

        let _first = primary.resolver.wait_for_propagate_resolution(&request).unwrap();

        assert!(matches!(
            primary.resolver.wait_for_propagate_resolution(&request),
            Err(PropagationError::DuplicateRequest(_))
        ));
    }

    // ============================================================
    // DISPATCHER
    // ============================================================

    #[tokio::test]
    async fn test_dispatcher_sends_only_what_primary_lacks() {
        let bus = MemoryBus::new(1);
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let peer = broker(&bus, online, PropagationConfig::default());
        let mut observer = BroadbandSubscriber::new(bus.clone()).subscribe();
        let primary = BrokerIdentity::generate();
        let key = generate_key();
        let shared = record(&key, 1000);
        let extra = record(&key, 2000);
        peer.log_store.store(&shared).unwrap();
        peer.log_store.store(&extra).unwrap();

        let request = range_query();
        let own_hashes = peer.requests.get_hash_map(&request).unwrap();
        let mut primary_hashes = QueryHashMap::new();
        primary_hashes.insert(shared.message_id.to_string(), shared.content_hash());

        peer.dispatcher
            .set_primary_response(QueryResponse::signed(
                request.request_id.clone(),
                primary.id.clone(),
                primary_hashes,
                &primary,
            ))
            .await;
        assert_eq!(peer.dispatcher.pending_count(), 1);

        peer.dispatcher
            .set_foreign_response(QueryResponse::signed(
                request.request_id.clone(),
                primary.id.clone(),
                own_hashes,
                &peer.identity,
            ))
            .await;
        assert_eq!(peer.dispatcher.pending_count(), 0);

        let (msg, _) = observer.recv().await.unwrap();
        match msg.payload {
            SystemPayload::QueryPropagate(p) => {
                assert_eq!(p.request_publisher_id, primary.id);
                assert_eq!(p.payload.len(), 1);
                assert_eq!(p.payload[0].0, extra.message_id.to_string());
                assert_eq!(StreamMessage::from_json(&p.payload[0].1).unwrap(), extra);
            }
            other => panic!("expected propagate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_splits_large_propagates() {
        let bus = MemoryBus::new(1);
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let config = PropagationConfig {
            propagate_batch_size: 2,
            ..PropagationConfig::default()
        };
        let peer = broker(&bus, online, config);
        let mut inbound = BroadbandSubscriber::new(bus.clone()).subscribe();
        let primary = BrokerIdentity::generate();
        let key = generate_key();
        for ts in 1..=5 {
            peer.log_store.store(&record(&key, ts * 1000)).unwrap();
        }
        let request = range_query();
        let own_hashes = peer.requests.get_hash_map(&request).unwrap();

        peer.dispatcher
            .set_primary_response(QueryResponse::signed(
                request.request_id.clone(),
                primary.id.clone(),
                QueryHashMap::new(),
                &primary,
            ))
            .await;
        peer.dispatcher
            .set_foreign_response(QueryResponse::signed(
                request.request_id.clone(),
                primary.id.clone(),
                own_hashes,
                &peer.identity,
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut sizes = Vec::new();
        while let Ok((msg, _)) = inbound.try_recv() {
            if let SystemPayload::QueryPropagate(p) = msg.payload {
                sizes.push(p.payload.len());
            }
        }
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_dispatcher_sweeps_unpaired_responses() {
        let bus = MemoryBus::new(1);
        let online = Arc::new(StaticOnline(Mutex::new(Vec::new())));
        let peer = broker(&bus, online, PropagationConfig::default());
        let primary = BrokerIdentity::generate();

        peer.dispatcher
            .set_primary_response(QueryResponse::signed(
                "orphan",
                primary.id.clone(),
                QueryHashMap::new(),
                &primary,
            ))
            .await;

        assert_eq!(peer.dispatcher.sweep(Duration::from_secs(60)), 0);
        assert_eq!(peer.dispatcher.sweep(Duration::ZERO), 1);
        assert_eq!(peer.dispatcher.pending_count(), 0);
    }
}
