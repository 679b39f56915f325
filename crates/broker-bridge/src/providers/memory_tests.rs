//! Tests for the in-memory broker.

use super::*;
use crate::message::{Payload, PropertyValue};
use std::time::Duration;

const SHORT: ReceiveTimeout = ReceiveTimeout::Bounded(Duration::from_millis(50));

fn client(seed: &str) -> ClientId {
    ClientId::for_subscription("tester", "MemoryTests", seed)
}

fn subscription(name: &str) -> SubscriptionName {
    SubscriptionName::new(name).unwrap()
}

async fn open(
    broker: &InMemoryBroker,
    seed: &str,
) -> (Arc<dyn BrokerConnection>, Arc<dyn BrokerSession>) {
    let connection = broker.create_connection(&client(seed), None).await.unwrap();
    let session = connection.create_session().await.unwrap();
    (connection, session)
}

async fn send(session: &Arc<dyn BrokerSession>, destination: &Destination, envelope: MessageEnvelope) {
    let producer = session.create_producer(destination).await.unwrap();
    producer.send(&envelope).await.unwrap();
    producer.close().await.unwrap();
}

fn text_of(message: &ReceivedMessage) -> &str {
    match &message.payload {
        Payload::Text(text) => text,
        other => panic!("expected text payload, got {}", other.kind_name()),
    }
}

// ============================================================================
// Directory Tests
// ============================================================================

mod directory {
    use super::*;

    #[tokio::test]
    async fn test_declared_destinations_resolve_with_their_kind() {
        let broker = InMemoryBroker::default();
        broker.declare_queue("orders").declare_topic("prices");

        let queue = broker.resolve_destination(&"orders".into()).await.unwrap();
        let topic = broker.resolve_destination(&"prices".into()).await.unwrap();

        assert_eq!(queue, Destination::queue("orders"));
        assert_eq!(topic, Destination::topic("prices"));
    }

    #[tokio::test]
    async fn test_dynamic_prefixes_resolve_on_demand() {
        let broker = InMemoryBroker::default();

        let queue = broker
            .resolve_destination(&"dynamicQueues/Q1".into())
            .await
            .unwrap();
        let topic = broker
            .resolve_destination(&"dynamicTopics/T1".into())
            .await
            .unwrap();

        assert_eq!(queue.kind(), DestinationKind::Queue);
        assert_eq!(topic.kind(), DestinationKind::Topic);
    }

    #[tokio::test]
    async fn test_unknown_and_bare_prefix_names_are_not_found() {
        let broker = InMemoryBroker::default();

        for name in ["nope", "dynamicQueues/", "dynamicTopics/"] {
            let result = broker.resolve_destination(&name.into()).await;
            assert!(
                matches!(result, Err(BrokerError::NotFound { .. })),
                "'{}' should not resolve",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_connection_factory_lookup() {
        let broker = InMemoryBroker::default();
        broker.register_connection_factory("XAConnectionFactory");

        assert!(broker
            .resolve_connection_factory(DEFAULT_CONNECTION_FACTORY)
            .await
            .is_ok());
        assert!(broker
            .resolve_connection_factory("XAConnectionFactory")
            .await
            .is_ok());
        assert!(broker
            .resolve_connection_factory("Missing")
            .await
            .err()
            .is_some_and(|e| e.is_not_found()));
    }

    #[test]
    fn test_vm_urls_share_one_broker_per_name() {
        let first = InMemoryBroker::for_url("vm://memory-tests-shared").unwrap();
        let second = InMemoryBroker::for_url("vm://memory-tests-shared?create=false").unwrap();
        let other = InMemoryBroker::for_url("vm://memory-tests-other").unwrap();

        first.declare_queue("shared-queue");

        assert_eq!(second.name(), "memory-tests-shared");
        assert!(second.lookup(&"shared-queue".into()).is_some());
        assert!(other.lookup(&"shared-queue".into()).is_none());
    }

    #[test]
    fn test_non_vm_urls_are_rejected() {
        assert!(InMemoryBroker::for_url("tcp://localhost:61616").is_err());
        assert!(InMemoryBroker::for_url("not a url").is_err());
    }
}

// ============================================================================
// Connection Tests
// ============================================================================

mod connections {
    use super::*;

    #[tokio::test]
    async fn test_client_id_is_exclusive_while_open() {
        let broker = InMemoryBroker::default();
        let first = broker.create_connection(&client("A"), None).await.unwrap();

        let duplicate = broker.create_connection(&client("A"), None).await;
        assert!(matches!(
            duplicate,
            Err(BrokerError::InvalidClientId { .. })
        ));

        first.close().await.unwrap();
        assert!(broker.create_connection(&client("A"), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_authentication_when_users_are_registered() {
        let broker = InMemoryBroker::default();
        broker.add_user("tester", "secret");

        let anonymous = broker.create_connection(&client("anon"), None).await;
        let wrong = broker
            .create_connection(&client("wrong"), Some(&Credentials::new("tester", "bad")))
            .await;
        let right = broker
            .create_connection(&client("right"), Some(&Credentials::new("tester", "secret")))
            .await;

        assert!(matches!(
            anonymous,
            Err(BrokerError::AuthenticationFailed { .. })
        ));
        assert!(matches!(wrong, Err(BrokerError::AuthenticationFailed { .. })));
        assert!(right.is_ok());
    }

    #[tokio::test]
    async fn test_closing_connection_releases_everything_created_from_it() {
        let broker = InMemoryBroker::default();
        let queue = Destination::queue("dynamicQueues/release");
        let (connection, session) = open(&broker, "release").await;
        let _producer = session.create_producer(&queue).await.unwrap();
        let _consumer = session.create_consumer(&queue, None).await.unwrap();

        assert_eq!(broker.open_connections(), 1);
        assert_eq!(broker.open_producers(), 1);
        assert_eq!(broker.open_consumers(), 1);

        connection.close().await.unwrap();

        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.open_producers(), 0);
        assert_eq!(broker.open_consumers(), 0);
        assert!(session.create_producer(&queue).await.is_err());
    }
}

// ============================================================================
// Queue Delivery Tests
// ============================================================================

mod queues {
    use super::*;

    #[tokio::test]
    async fn test_stopped_connection_does_not_deliver() {
        let broker = InMemoryBroker::default();
        let queue = Destination::queue("dynamicQueues/stopped");
        let (connection, session) = open(&broker, "stopped").await;
        send(&session, &queue, MessageEnvelope::text("hello")).await;
        let consumer = session.create_consumer(&queue, None).await.unwrap();

        let before_start = consumer.receive(SHORT).await.unwrap();
        connection.start().await.unwrap();
        let after_start = consumer.receive(SHORT).await.unwrap();

        assert!(before_start.is_none());
        assert_eq!(text_of(&after_start.unwrap()), "hello");
    }

    #[tokio::test]
    async fn test_queue_delivers_in_order_and_only_once() {
        let broker = InMemoryBroker::default();
        let queue = Destination::queue("dynamicQueues/fifo");
        let (connection, session) = open(&broker, "fifo").await;
        connection.start().await.unwrap();
        send(&session, &queue, MessageEnvelope::text("one")).await;
        send(&session, &queue, MessageEnvelope::text("two")).await;

        let consumer = session.create_consumer(&queue, None).await.unwrap();
        let first = consumer.receive(SHORT).await.unwrap().unwrap();
        let second = consumer.receive(SHORT).await.unwrap().unwrap();
        let third = consumer.receive(SHORT).await.unwrap();

        assert_eq!(text_of(&first), "one");
        assert_eq!(text_of(&second), "two");
        assert!(third.is_none());
        assert_eq!(broker.queue_depth("dynamicQueues/fifo"), 0);
    }

    #[tokio::test]
    async fn test_selector_skips_but_keeps_non_matching_messages() {
        let broker = InMemoryBroker::default();
        let queue = Destination::queue("dynamicQueues/selective");
        let (connection, session) = open(&broker, "selective").await;
        connection.start().await.unwrap();
        send(
            &session,
            &queue,
            MessageEnvelope::text("us").with_property("region", "US"),
        )
        .await;
        send(
            &session,
            &queue,
            MessageEnvelope::text("eu").with_property("region", "EU"),
        )
        .await;

        let selector = Selector::parse("region = 'EU'").unwrap();
        let consumer = session
            .create_consumer(&queue, Some(&selector))
            .await
            .unwrap();
        let received = consumer.receive(SHORT).await.unwrap().unwrap();

        assert_eq!(text_of(&received), "eu");
        assert_eq!(
            received.property("region"),
            Some(&PropertyValue::from("EU"))
        );
        assert_eq!(broker.queue_depth("dynamicQueues/selective"), 1);
    }

    #[tokio::test]
    async fn test_waiting_receive_wakes_on_send() {
        let broker = InMemoryBroker::default();
        let queue = Destination::queue("dynamicQueues/wake");
        let (connection, session) = open(&broker, "wake").await;
        connection.start().await.unwrap();
        let consumer = session.create_consumer(&queue, None).await.unwrap();

        let waiter = tokio::spawn(async move { consumer.receive(ReceiveTimeout::Indefinite).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        send(&session, &queue, MessageEnvelope::text("late")).await;

        let received = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("receive should wake up")
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(text_of(&received), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_receive_returns_none_after_timeout() {
        let broker = InMemoryBroker::default();
        let queue = Destination::queue("dynamicQueues/empty");
        let (connection, session) = open(&broker, "empty").await;
        connection.start().await.unwrap();
        let consumer = session.create_consumer(&queue, None).await.unwrap();

        let started = Instant::now();
        let received = consumer
            .receive(ReceiveTimeout::Bounded(Duration::from_secs(2)))
            .await
            .unwrap();

        assert!(received.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unrepresentable_bound_waits_like_indefinite() {
        let broker = InMemoryBroker::default();
        let queue = Destination::queue("dynamicQueues/huge");
        let (connection, session) = open(&broker, "huge").await;
        connection.start().await.unwrap();
        let consumer = session.create_consumer(&queue, None).await.unwrap();
        send(&session, &queue, MessageEnvelope::text("ready")).await;

        let ready = consumer
            .receive(ReceiveTimeout::from(Duration::MAX))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text_of(&ready), "ready");

        let waiter =
            tokio::spawn(async move { consumer.receive(ReceiveTimeout::from(Duration::MAX)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        send(&session, &queue, MessageEnvelope::text("late")).await;

        let late = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("receive should wake up")
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(text_of(&late), "late");
    }

    #[tokio::test]
    async fn test_closed_consumer_fails_to_receive() {
        let broker = InMemoryBroker::default();
        let queue = Destination::queue("dynamicQueues/closed");
        let (_connection, session) = open(&broker, "closed").await;
        let consumer = session.create_consumer(&queue, None).await.unwrap();

        consumer.close().await.unwrap();

        assert!(matches!(
            consumer.receive(SHORT).await,
            Err(BrokerError::Closed { .. })
        ));
    }
}

// ============================================================================
// Topic Delivery Tests
// ============================================================================

mod topics {
    use super::*;

    #[tokio::test]
    async fn test_every_subscription_gets_a_copy() {
        let broker = InMemoryBroker::default();
        let topic = Destination::topic("dynamicTopics/fanout");
        let (connection, session) = open(&broker, "fanout").await;
        connection.start().await.unwrap();
        let first = session.create_consumer(&topic, None).await.unwrap();
        let second = session.create_consumer(&topic, None).await.unwrap();

        send(&session, &topic, MessageEnvelope::text("news")).await;

        assert_eq!(text_of(&first.receive(SHORT).await.unwrap().unwrap()), "news");
        assert_eq!(text_of(&second.receive(SHORT).await.unwrap().unwrap()), "news");
    }

    #[tokio::test]
    async fn test_non_durable_subscription_misses_messages_while_stopped() {
        let broker = InMemoryBroker::default();
        let topic = Destination::topic("dynamicTopics/live");
        let (subscriber, session) = open(&broker, "live-subscriber").await;
        let (_publisher, publish_session) = open(&broker, "live-publisher").await;
        let consumer = session.create_consumer(&topic, None).await.unwrap();

        send(&publish_session, &topic, MessageEnvelope::text("missed")).await;
        subscriber.start().await.unwrap();
        send(&publish_session, &topic, MessageEnvelope::text("seen")).await;

        let received = consumer.receive(SHORT).await.unwrap().unwrap();
        assert_eq!(text_of(&received), "seen");
        assert!(consumer.receive(SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscription_selector_filters_at_publish_time() {
        let broker = InMemoryBroker::default();
        let topic = Destination::topic("dynamicTopics/filtered");
        let (connection, session) = open(&broker, "filtered").await;
        connection.start().await.unwrap();
        let selector = Selector::parse("priority > 5").unwrap();
        let consumer = session
            .create_consumer(&topic, Some(&selector))
            .await
            .unwrap();

        send(
            &session,
            &topic,
            MessageEnvelope::text("low").with_property("priority", 1),
        )
        .await;
        send(
            &session,
            &topic,
            MessageEnvelope::text("high").with_property("priority", 9),
        )
        .await;

        assert_eq!(text_of(&consumer.receive(SHORT).await.unwrap().unwrap()), "high");
        assert!(consumer.receive(SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_durable_subscription_retains_while_detached() {
        let broker = InMemoryBroker::default();
        let topic = Destination::topic("dynamicTopics/durable");
        let name = subscription("S1");
        let (_publisher, publish_session) = open(&broker, "durable-publisher").await;

        let (connection, session) = open(&broker, "S1").await;
        let consumer = session
            .create_durable_subscriber(&topic, &name, None)
            .await
            .unwrap();
        consumer.close().await.unwrap();
        connection.close().await.unwrap();

        send(&publish_session, &topic, MessageEnvelope::text("kept")).await;
        assert_eq!(broker.durable_backlog(&client("S1"), &name), Some(1));

        let (connection, session) = open(&broker, "S1").await;
        connection.start().await.unwrap();
        let consumer = session
            .create_durable_subscriber(&topic, &name, None)
            .await
            .unwrap();

        assert_eq!(text_of(&consumer.receive(SHORT).await.unwrap().unwrap()), "kept");
    }

    #[tokio::test]
    async fn test_redefining_durable_subscription_discards_backlog() {
        let broker = InMemoryBroker::default();
        let topic = Destination::topic("dynamicTopics/redefine");
        let name = subscription("S2");
        let (connection, session) = open(&broker, "S2").await;
        let consumer = session
            .create_durable_subscriber(&topic, &name, None)
            .await
            .unwrap();
        send(&session, &topic, MessageEnvelope::text("old")).await;
        consumer.close().await.unwrap();

        let selector = Selector::parse("kind = 'new'").unwrap();
        let _consumer = session
            .create_durable_subscriber(&topic, &name, Some(&selector))
            .await
            .unwrap();

        assert_eq!(broker.durable_backlog(&client("S2"), &name), Some(0));
        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_durable_subscription_allows_one_active_consumer() {
        let broker = InMemoryBroker::default();
        let topic = Destination::topic("dynamicTopics/single");
        let name = subscription("S3");
        let (_connection, session) = open(&broker, "S3").await;
        let _consumer = session
            .create_durable_subscriber(&topic, &name, None)
            .await
            .unwrap();

        let second = session.create_durable_subscriber(&topic, &name, None).await;

        assert!(matches!(second, Err(BrokerError::IllegalState { .. })));
    }

    #[tokio::test]
    async fn test_unsubscribe_requires_detached_subscription() {
        let broker = InMemoryBroker::default();
        let topic = Destination::topic("dynamicTopics/unsubscribe");
        let name = subscription("S4");
        let (_connection, session) = open(&broker, "S4").await;
        let consumer = session
            .create_durable_subscriber(&topic, &name, None)
            .await
            .unwrap();

        let while_active = session.unsubscribe(&name).await;
        consumer.close().await.unwrap();
        let after_close = session.unsubscribe(&name).await;
        let again = session.unsubscribe(&name).await;

        assert!(matches!(while_active, Err(BrokerError::IllegalState { .. })));
        assert!(after_close.is_ok());
        assert!(matches!(again, Err(BrokerError::NotFound { .. })));
        assert_eq!(broker.durable_backlog(&client("S4"), &name), None);
    }

    #[tokio::test]
    async fn test_durable_subscription_requires_topic() {
        let broker = InMemoryBroker::default();
        let (_connection, session) = open(&broker, "S5").await;

        let result = session
            .create_durable_subscriber(
                &Destination::queue("dynamicQueues/q"),
                &subscription("S5"),
                None,
            )
            .await;

        assert!(matches!(
            result,
            Err(BrokerError::InvalidDestination { .. })
        ));
    }
}
