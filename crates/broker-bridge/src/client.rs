//! Broker client traits.
//!
//! These traits are the seam between the bridge and a concrete broker. They
//! mirror the classic connection → session → producer/consumer hierarchy:
//!
//! - [`DirectoryResolver`] turns logical names into [`Destination`]s and
//!   [`ConnectionFactory`] handles
//! - [`ConnectionFactory`] opens [`BrokerConnection`]s under a client id
//! - [`BrokerConnection`] gates delivery with `start`/`stop` and hands out sessions
//! - [`BrokerSession`] creates producers, consumers and durable subscribers
//!
//! [`InMemoryBroker`](crate::providers::InMemoryBroker) is the reference
//! implementation.

use crate::error::BrokerError;
use crate::message::{
    ClientId, DestinationName, MessageEnvelope, MessageId, ReceiveTimeout, ReceivedMessage,
    SubscriptionName,
};
use crate::selector::Selector;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

// ============================================================================
// Directory Types
// ============================================================================

/// Kind of a resolved destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    /// Point-to-point: each message goes to exactly one consumer
    Queue,
    /// Publish/subscribe: each subscription gets its own copy
    Topic,
}

/// A resolved queue or topic reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    name: DestinationName,
    kind: DestinationKind,
}

impl Destination {
    /// Create queue reference
    pub fn queue(name: impl Into<DestinationName>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
        }
    }

    /// Create topic reference
    pub fn topic(name: impl Into<DestinationName>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
        }
    }

    pub fn name(&self) -> &DestinationName {
        &self.name
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn is_topic(&self) -> bool {
        self.kind == DestinationKind::Topic
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DestinationKind::Queue => write!(f, "queue://{}", self.name),
            DestinationKind::Topic => write!(f, "topic://{}", self.name),
        }
    }
}

/// Principal and secret used to authenticate a connection
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    principal: String,
    secret: String,
}

impl Credentials {
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: secret.into(),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Client Traits
// ============================================================================

/// Resolves logical names to broker resources
#[async_trait]
pub trait DirectoryResolver: Send + Sync {
    /// Resolve a queue or topic; unknown names fail with [`BrokerError::NotFound`]
    async fn resolve_destination(&self, name: &DestinationName)
        -> Result<Destination, BrokerError>;

    /// Resolve a connection factory by name
    async fn resolve_connection_factory(
        &self,
        name: &str,
    ) -> Result<Arc<dyn ConnectionFactory>, BrokerError>;
}

/// Opens connections to the broker
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a connection identified by `client_id`.
    ///
    /// The connection starts out stopped: no messages are delivered to its
    /// consumers until [`BrokerConnection::start`] is called.
    async fn create_connection(
        &self,
        client_id: &ClientId,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// A live connection to the broker
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Client id this connection was opened with
    fn client_id(&self) -> &ClientId;

    /// Resume delivery to consumers of this connection
    async fn start(&self) -> Result<(), BrokerError>;

    /// Pause delivery to consumers of this connection
    async fn stop(&self) -> Result<(), BrokerError>;

    /// Create a session bound to this connection
    async fn create_session(&self) -> Result<Arc<dyn BrokerSession>, BrokerError>;

    /// Close the connection and everything created from it
    async fn close(&self) -> Result<(), BrokerError>;
}

/// A single-threaded context for producing and consuming messages
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Create a producer sending to `destination`
    async fn create_producer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageProducer>, BrokerError>;

    /// Create a consumer for a queue, or a non-durable subscriber for a topic
    async fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&Selector>,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError>;

    /// Create or re-attach the durable subscription `name` of this connection's client id
    async fn create_durable_subscriber(
        &self,
        topic: &Destination,
        name: &SubscriptionName,
        selector: Option<&Selector>,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError>;

    /// Permanently delete the durable subscription `name`; it must have no active consumer
    async fn unsubscribe(&self, name: &SubscriptionName) -> Result<(), BrokerError>;

    /// Close the session
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Sends messages to one destination
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Send a message
    async fn send(&self, message: &MessageEnvelope) -> Result<MessageId, BrokerError>;

    /// Close the producer
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Receives messages from one destination or subscription
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Wait up to `timeout` for the next message; `None` when none arrived in time
    async fn receive(&self, timeout: ReceiveTimeout)
        -> Result<Option<ReceivedMessage>, BrokerError>;

    /// Close the consumer
    async fn close(&self) -> Result<(), BrokerError>;
}
