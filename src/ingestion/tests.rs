//! Ingestion Module Tests
//!
//! ## Test Scopes
//! - **Assignments**: the diff feed and stream-part lookups.
//! - **Listener**: majority confirmation, proof ordering and expiry.
//! - **Handler**: the intake endpoint's status mapping.

#[cfg(test)]
mod tests {
    use crate::broadband::{BroadbandPublisher, BroadbandSubscriber, MemoryBus};
    use crate::config::IngestionConfig;
    use crate::ingestion::handlers::handle_ingest;
    use crate::ingestion::{
        AssignmentChange, AssignmentEvent, IngestOutcome, MessageListener, StreamPartAssignments,
        StreamPartId,
    };
    use crate::membership::types::{BrokerIdentity, NodeId, OnlineBrokers};
    use crate::protocol::{ProofOfMessageStored, SystemMessageType};
    use crate::record::signing::generate_key;
    use crate::record::{MessageId, StreamMessage};
    use crate::storage::{LogStore, MemoryBackend};
    use axum::http::StatusCode;
    use axum::{Extension, Json};
    use ed25519_dalek::SigningKey;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FixedOnline(usize);

    impl OnlineBrokers for FixedOnline {
        fn online_brokers(&self) -> Vec<NodeId> {
            (0..self.0).map(|i| NodeId(format!("broker-{i}"))).collect()
        }
    }

    struct Node {
        log_store: Arc<LogStore>,
        listener: Arc<MessageListener>,
    }

    fn part() -> StreamPartId {
        StreamPartId::new("sensors", 0)
    }

    fn assigned() -> Arc<StreamPartAssignments> {
        let assignments = StreamPartAssignments::new();
        assignments.apply(&AssignmentEvent {
            stream_part: part(),
            change: AssignmentChange::Added,
        });
        assignments
    }

    async fn node(bus: &Arc<MemoryBus>, online: usize, config: IngestionConfig) -> Node {
        let log_store = LogStore::new(Arc::new(MemoryBackend::new()), 100);
        let listener = MessageListener::new(
            log_store.clone(),
            assigned(),
            BroadbandPublisher::new(BrokerIdentity::generate(), bus.clone(), "system"),
            BroadbandSubscriber::new(bus.clone()),
            Arc::new(FixedOnline(online)),
            config,
        );
        listener.clone().start().await;
        Node {
            log_store,
            listener,
        }
    }

    fn record(key: &SigningKey, stream: &str, ts: u64) -> StreamMessage {
        StreamMessage::signed(
            MessageId::new(stream, 0, ts, 0, "", "chain"),
            None,
            r#"{"temp":21}"#.to_string(),
            key,
        )
    }

    fn stored(node: &Node) -> u64 {
        node.log_store
            .get_number_of_messages_in_stream("sensors", 0)
            .unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // ============================================================
    // ASSIGNMENT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_feed_adds_and_removes_parts() {
        let assignments = StreamPartAssignments::new();
        let (tx, rx) = mpsc::channel(8);
        assignments.clone().start(rx);

        tx.send(AssignmentEvent {
            stream_part: StreamPartId::new("a", 0),
            change: AssignmentChange::Added,
        })
        .await
        .unwrap();
        tx.send(AssignmentEvent {
            stream_part: StreamPartId::new("b", 1),
            change: AssignmentChange::Added,
        })
        .await
        .unwrap();
        tx.send(AssignmentEvent {
            stream_part: StreamPartId::new("a", 0),
            change: AssignmentChange::Removed,
        })
        .await
        .unwrap();
        drop(tx);
        settle().await;

        assert!(!assignments.has_stream_part(&StreamPartId::new("a", 0)));
        assert!(assignments.has_stream_part(&StreamPartId::new("b", 1)));
        assert_eq!(assignments.stream_parts(), vec![StreamPartId::new("b", 1)]);
    }

    #[test]
    fn test_stream_part_display() {
        assert_eq!(StreamPartId::new("sensors", 3).to_string(), "sensors#3");
    }

    // ============================================================
    // LISTENER TESTS
    // ============================================================

    #[test]
    fn test_threshold_is_half_rounded_up() {
        let bus = MemoryBus::new(1);
        for (online, expected) in [(0, 1), (1, 1), (2, 1), (3, 2), (4, 2), (5, 3)] {
            let listener = MessageListener::new(
                LogStore::new(Arc::new(MemoryBackend::new()), 100),
                assigned(),
                BroadbandPublisher::new(BrokerIdentity::generate(), bus.clone(), "system"),
                BroadbandSubscriber::new(bus.clone()),
                Arc::new(FixedOnline(online)),
                IngestionConfig::default(),
            );
            assert_eq!(listener.threshold(), expected, "online={online}");
        }
    }

    #[tokio::test]
    async fn test_majority_confirmation_stores_everywhere() {
        let bus = MemoryBus::new(1);
        let mut nodes = Vec::new();
        for _ in 0..3 {
            nodes.push(node(&bus, 3, IngestionConfig::default()).await);
        }
        let msg = record(&generate_key(), "sensors", 1_000);

        for n in &nodes {
            let outcome = n.listener.on_stream_message(msg.clone()).await.unwrap();
            assert!(matches!(outcome, IngestOutcome::Announced { .. }));
        }
        settle().await;

        for n in &nodes {
            assert_eq!(stored(n), 1);
        }
    }

    #[tokio::test]
    async fn test_lone_announcement_is_not_stored() {
        let bus = MemoryBus::new(1);
        let lonely = node(&bus, 3, IngestionConfig::default()).await;
        let msg = record(&generate_key(), "sensors", 1_000);

        let IngestOutcome::Announced { hash } = lonely.listener.on_stream_message(msg).await.unwrap()
        else {
            panic!("expected announcement");
        };
        settle().await;

        assert!(!lonely.listener.is_stored(&hash));
        assert_eq!(stored(&lonely), 0);
    }

    #[tokio::test]
    async fn test_proofs_before_record_still_store() {
        let bus = MemoryBus::new(1);
        let n = node(&bus, 3, IngestionConfig::default()).await;
        let msg = record(&generate_key(), "sensors", 1_000);
        let (size, hash) = MessageListener::fingerprint(&msg.to_json().unwrap());
        let proof = ProofOfMessageStored {
            stream_id: "sensors".into(),
            partition: 0,
            timestamp: 1_000,
            sequence_number: 0,
            size,
            hash: hash.clone(),
        };

        n.listener.on_proof(&proof);
        n.listener.on_proof(&proof);
        assert_eq!(stored(&n), 0);

        n.listener.on_stream_message(msg).await.unwrap();

        assert!(n.listener.is_stored(&hash));
        assert_eq!(stored(&n), 1);
    }

    #[tokio::test]
    async fn test_unassigned_part_is_ignored() {
        let bus = MemoryBus::new(1);
        let mut observer = BroadbandSubscriber::new(bus.clone()).subscribe();
        let n = node(&bus, 1, IngestionConfig::default()).await;

        let outcome = n
            .listener
            .on_stream_message(record(&generate_key(), "elsewhere", 1_000))
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::NotAssigned);
        settle().await;
        assert!(observer.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forged_record_is_rejected() {
        let bus = MemoryBus::new(1);
        let n = node(&bus, 1, IngestionConfig::default()).await;
        let mut msg = record(&generate_key(), "sensors", 1_000);
        msg.content = r#"{"temp":99}"#.to_string();

        assert!(n.listener.on_stream_message(msg).await.is_err());
        assert_eq!(n.listener.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_entries_expire() {
        let bus = MemoryBus::new(1);
        // Keep the background sweep out of the way
        let config = IngestionConfig {
            cleanup_interval_ms: 3_600_000,
            ..IngestionConfig::default()
        };
        let n = node(&bus, 3, config).await;
        n.listener
            .on_stream_message(record(&generate_key(), "sensors", 1_000))
            .await
            .unwrap();
        assert_eq!(n.listener.pending_count(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(n.listener.cleanup(), 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(n.listener.cleanup(), 1);
        assert_eq!(n.listener.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_solo_broker_announces_and_stores() {
        let bus = MemoryBus::new(1);
        let mut observer = BroadbandSubscriber::new(bus.clone()).subscribe();
        let n = node(&bus, 1, IngestionConfig::default()).await;

        n.listener
            .on_stream_message(record(&generate_key(), "sensors", 1_000))
            .await
            .unwrap();
        settle().await;

        let (msg, _) = observer.try_recv().unwrap();
        assert_eq!(msg.message_type(), SystemMessageType::ProofOfMessageStored);
        assert_eq!(stored(&n), 1);
    }

    // ============================================================
    // HANDLER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_handler_maps_outcomes_to_status() {
        let bus = MemoryBus::new(1);
        let n = node(&bus, 1, IngestionConfig::default()).await;
        let key = generate_key();

        let (status, Json(body)) = handle_ingest(
            Extension(n.listener.clone()),
            Json(record(&key, "sensors", 1_000)),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body.status, "announced");
        assert!(body.hash.is_some());

        let (status, Json(body)) = handle_ingest(
            Extension(n.listener.clone()),
            Json(record(&key, "elsewhere", 1_000)),
        )
        .await;
        assert_eq!(status, StatusCode::MISDIRECTED_REQUEST);
        assert_eq!(body.status, "not_assigned");

        let mut forged = record(&key, "sensors", 2_000);
        forged.signature = "00".repeat(64);
        let (status, Json(body)) =
            handle_ingest(Extension(n.listener.clone()), Json(forged)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.status, "rejected");
    }
}
