//! Tests for the topic subscription registry.

use super::*;
use crate::client::{ConnectionFactory, Credentials, Destination};
use crate::error::ErrorKind;
use crate::message::{ClientId, MessageEnvelope, Payload};
use crate::providers::InMemoryBroker;
use std::time::Duration;

const SHORT: ReceiveTimeout = ReceiveTimeout::Bounded(Duration::from_millis(50));
const TOPIC: &str = "dynamicTopics/registry";

fn registry_for(broker: &InMemoryBroker) -> TopicSubscriptionRegistry {
    let connections = Arc::new(ConnectionManager::new(
        Arc::new(broker.clone()),
        Some(Credentials::new("tester", "secret")),
    ));
    TopicSubscriptionRegistry::new(Arc::new(broker.clone()), connections)
}

fn request(name: &str, durable: bool) -> SubscriptionRequest {
    SubscriptionRequest {
        name: name.to_string(),
        destination: DestinationName::new(TOPIC),
        selector: None,
        durable,
    }
}

async fn publish(broker: &InMemoryBroker, envelope: MessageEnvelope) {
    let connection = broker
        .create_connection(&ClientId::unique("publisher", "SubscriptionTests"), None)
        .await
        .unwrap();
    let session = connection.create_session().await.unwrap();
    let producer = session
        .create_producer(&Destination::topic(TOPIC))
        .await
        .unwrap();
    producer.send(&envelope).await.unwrap();
    connection.close().await.unwrap();
}

fn text(message: Option<ReceivedMessage>) -> String {
    match message.map(|m| m.payload) {
        Some(Payload::Text(text)) => text,
        other => panic!("expected a text message, got {:?}", other),
    }
}

// ============================================================================
// Start Tests
// ============================================================================

mod start {
    use super::*;

    #[tokio::test]
    async fn test_empty_name_fails_fast() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);

        let error = registry.start(request("  ", false)).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Automation);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_invalid_selector_is_automation_error() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);
        let mut bad = request("S1", false);
        bad.selector = Some("region = ".to_string());

        let error = registry.start(bad).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Automation);
    }

    #[tokio::test]
    async fn test_unresolvable_or_queue_destination_is_automation_error() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);

        let mut unknown = request("S1", false);
        unknown.destination = DestinationName::new("missing");
        let mut queue = request("S2", false);
        queue.destination = DestinationName::new("dynamicQueues/Q");

        assert_eq!(
            registry.start(unknown).await.unwrap_err().kind(),
            ErrorKind::Automation
        );
        assert_eq!(
            registry.start(queue).await.unwrap_err().kind(),
            ErrorKind::Automation
        );
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_started_subscription_receives_immediately() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);

        registry.start(request("S1", false)).await.unwrap();
        publish(&broker, MessageEnvelope::text("x")).await;

        let handle = registry.get("S1").await.unwrap();
        assert_eq!(handle.state(), SubscriptionState::Started);
        assert_eq!(text(registry.receive("S1", SHORT).await.unwrap()), "x");
    }

    #[tokio::test]
    async fn test_starting_twice_reuses_the_handle() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);

        registry.start(request("S1", false)).await.unwrap();
        registry.start(request("S1", false)).await.unwrap();

        assert_eq!(broker.open_connections(), 1);
        assert_eq!(registry.names().await.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_with_other_selector_keeps_original() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);
        let mut first = request("S1", false);
        first.selector = Some("level > 2".to_string());
        let mut second = request("S1", false);
        second.selector = Some("level > 7".to_string());

        registry.start(first).await.unwrap();
        registry.stop("S1").await.unwrap();
        registry.start(second).await.unwrap();
        publish(&broker, MessageEnvelope::text("five").with_property("level", 5)).await;

        let handle = registry.get("S1").await.unwrap();
        assert_eq!(handle.selector().map(Selector::as_str), Some("level > 2"));
        assert_eq!(handle.state(), SubscriptionState::Started);
        assert_eq!(text(registry.receive("S1", SHORT).await.unwrap()), "five");
    }

    #[tokio::test]
    async fn test_each_subscription_has_its_own_connection() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);

        registry.start(request("S1", false)).await.unwrap();
        registry.start(request("S2", true)).await.unwrap();

        assert_eq!(broker.open_connections(), 2);
        assert!(registry.get("S2").await.unwrap().is_durable());
    }
}

// ============================================================================
// Stop and Receive Tests
// ============================================================================

mod stop_and_receive {
    use super::*;

    #[tokio::test]
    async fn test_unknown_subscription_is_automation_error() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);

        assert_eq!(
            registry.stop("nope").await.unwrap_err().kind(),
            ErrorKind::Automation
        );
        assert_eq!(
            registry.receive("nope", SHORT).await.unwrap_err().kind(),
            ErrorKind::Automation
        );
    }

    #[tokio::test]
    async fn test_stopped_non_durable_misses_messages() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);
        registry.start(request("S1", false)).await.unwrap();

        registry.stop("S1").await.unwrap();
        publish(&broker, MessageEnvelope::text("missed")).await;

        assert_eq!(
            registry.get("S1").await.unwrap().state(),
            SubscriptionState::Stopped
        );
        assert!(registry.receive("S1", SHORT).await.unwrap().is_none());

        registry.start(request("S1", false)).await.unwrap();
        assert!(registry.receive("S1", SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stopped_durable_keeps_messages_for_resume() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);
        registry.start(request("S1", true)).await.unwrap();

        registry.stop("S1").await.unwrap();
        publish(&broker, MessageEnvelope::text("kept")).await;
        assert!(registry.receive("S1", SHORT).await.unwrap().is_none());

        registry.start(request("S1", true)).await.unwrap();
        assert_eq!(text(registry.receive("S1", SHORT).await.unwrap()), "kept");
    }

    #[tokio::test]
    async fn test_timed_out_receive_leaves_later_messages() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);
        registry.start(request("S1", false)).await.unwrap();

        assert!(registry.receive("S1", SHORT).await.unwrap().is_none());
        publish(&broker, MessageEnvelope::text("later")).await;

        assert_eq!(text(registry.receive("S1", SHORT).await.unwrap()), "later");
    }
}

// ============================================================================
// Unsubscribe and Close Tests
// ============================================================================

mod teardown {
    use super::*;

    #[tokio::test]
    async fn test_unsubscribe_removes_durable_registration() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);
        registry.start(request("S1", true)).await.unwrap();
        let client_id = ClientId::for_subscription("tester", "MessageBridge", "S1");
        let name = SubscriptionName::new("S1").unwrap();
        assert_eq!(broker.durable_backlog(&client_id, &name), Some(0));

        registry.unsubscribe("S1").await.unwrap();

        assert_eq!(broker.durable_backlog(&client_id, &name), None);
        assert_eq!(broker.open_connections(), 0);
        assert!(registry.names().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_non_durable_is_automation_error() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);
        registry.start(request("S1", false)).await.unwrap();

        let error = registry.unsubscribe("S1").await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Automation);
        assert!(registry.get("S1").await.is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_automation_error() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);

        let error = registry.unsubscribe("S1").await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Automation);
    }

    #[tokio::test]
    async fn test_close_all_keeps_durable_registrations() {
        let broker = InMemoryBroker::default();
        let registry = registry_for(&broker);
        registry.start(request("S1", true)).await.unwrap();
        registry.start(request("S2", false)).await.unwrap();

        registry.close_all().await;
        publish(&broker, MessageEnvelope::text("while closed")).await;

        let client_id = ClientId::for_subscription("tester", "MessageBridge", "S1");
        let name = SubscriptionName::new("S1").unwrap();
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.open_consumers(), 0);
        assert_eq!(broker.durable_backlog(&client_id, &name), Some(1));
        assert!(registry.names().await.is_empty());
    }
}
