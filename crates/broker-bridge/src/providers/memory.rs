//! In-memory broker implementation for testing and development.
//!
//! This module provides a fully functional in-process broker that:
//! - Resolves declared and dynamic (`dynamicQueues/…`, `dynamicTopics/…`) destinations
//! - Delivers queue messages to exactly one consumer, honouring selectors
//! - Fans topic messages out to every matching subscription
//! - Retains messages for durable subscriptions while they are stopped or detached
//! - Gates delivery on connection `start`/`stop`
//! - Enforces one open connection per client id
//!
//! Brokers can be addressed by `vm://<name>` URLs so that independently
//! configured bridges in one process share the same broker.

use crate::client::{
    BrokerConnection, BrokerSession, ConnectionFactory, Credentials, Destination,
    DestinationKind, DirectoryResolver, MessageConsumer, MessageProducer,
};
use crate::error::{BrokerError, ConfigurationError};
use crate::message::{
    ClientId, DestinationName, MessageEnvelope, MessageId, ReceiveTimeout, ReceivedMessage,
    SubscriptionName, Timestamp,
};
use crate::selector::Selector;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Name prefix resolving to an on-demand queue
pub const DYNAMIC_QUEUE_PREFIX: &str = "dynamicQueues/";

/// Name prefix resolving to an on-demand topic
pub const DYNAMIC_TOPIC_PREFIX: &str = "dynamicTopics/";

/// Connection factory registered on every broker
pub const DEFAULT_CONNECTION_FACTORY: &str = "ConnectionFactory";

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Key of a topic subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SubscriptionKey {
    Durable {
        client_id: ClientId,
        name: SubscriptionName,
    },
    /// Owned by a single consumer and gone when it closes
    NonDurable(u64),
}

/// Messages pending for one topic subscription
struct SubscriptionQueue {
    topic: DestinationName,
    selector: Option<Selector>,
    messages: VecDeque<ReceivedMessage>,
    /// Connection of the attached consumer, if any
    connection_id: Option<u64>,
}

enum ConsumerSource {
    Queue {
        destination: DestinationName,
        selector: Option<Selector>,
    },
    Subscription(SubscriptionKey),
}

struct ConsumerRecord {
    connection_id: u64,
    session_id: u64,
    source: ConsumerSource,
}

struct ProducerRecord {
    connection_id: u64,
    session_id: u64,
}

struct ConnectionRecord {
    client_id: ClientId,
    started: bool,
}

/// All broker state, guarded by one lock
#[derive(Default)]
struct BrokerState {
    declared: HashMap<DestinationName, DestinationKind>,
    connection_factories: HashSet<String>,
    users: HashMap<String, String>,
    queues: HashMap<DestinationName, VecDeque<ReceivedMessage>>,
    subscriptions: HashMap<SubscriptionKey, SubscriptionQueue>,
    connections: HashMap<u64, ConnectionRecord>,
    sessions: HashMap<u64, u64>,
    producers: HashMap<u64, ProducerRecord>,
    consumers: HashMap<u64, ConsumerRecord>,
    next_id: u64,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_connection_open(&self, connection_id: u64) -> Result<(), BrokerError> {
        if self.connections.contains_key(&connection_id) {
            Ok(())
        } else {
            Err(BrokerError::Closed {
                resource: "connection".to_string(),
            })
        }
    }

    fn ensure_session_open(&self, session_id: u64) -> Result<(), BrokerError> {
        if self.sessions.contains_key(&session_id) {
            Ok(())
        } else {
            Err(BrokerError::Closed {
                resource: "session".to_string(),
            })
        }
    }

    fn enqueue(&mut self, destination: &Destination, message: ReceivedMessage) {
        match destination.kind() {
            DestinationKind::Queue => {
                self.queues
                    .entry(destination.name().clone())
                    .or_default()
                    .push_back(message);
            }
            DestinationKind::Topic => {
                let started: HashSet<u64> = self
                    .connections
                    .iter()
                    .filter(|(_, connection)| connection.started)
                    .map(|(id, _)| *id)
                    .collect();

                for (key, subscription) in self.subscriptions.iter_mut() {
                    if &subscription.topic != destination.name() {
                        continue;
                    }
                    if let Some(selector) = &subscription.selector {
                        if !selector.matches(&message.properties) {
                            continue;
                        }
                    }
                    // Non-durable subscriptions only see what is published while they run
                    let retains = match key {
                        SubscriptionKey::Durable { .. } => true,
                        SubscriptionKey::NonDurable(_) => subscription
                            .connection_id
                            .map(|id| started.contains(&id))
                            .unwrap_or(false),
                    };
                    if retains {
                        subscription.messages.push_back(message.clone());
                    }
                }
            }
        }
    }

    fn remove_consumer(&mut self, consumer_id: u64) {
        let Some(record) = self.consumers.remove(&consumer_id) else {
            return;
        };
        if let ConsumerSource::Subscription(key) = record.source {
            match key {
                SubscriptionKey::NonDurable(_) => {
                    self.subscriptions.remove(&key);
                }
                SubscriptionKey::Durable { .. } => {
                    if let Some(subscription) = self.subscriptions.get_mut(&key) {
                        subscription.connection_id = None;
                    }
                }
            }
        }
    }

    fn remove_session(&mut self, session_id: u64) {
        self.sessions.remove(&session_id);
        self.producers
            .retain(|_, producer| producer.session_id != session_id);
        let consumers: Vec<u64> = self
            .consumers
            .iter()
            .filter(|(_, consumer)| consumer.session_id == session_id)
            .map(|(id, _)| *id)
            .collect();
        for consumer_id in consumers {
            self.remove_consumer(consumer_id);
        }
    }

    fn remove_connection(&mut self, connection_id: u64) {
        let sessions: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, owner)| **owner == connection_id)
            .map(|(id, _)| *id)
            .collect();
        for session_id in sessions {
            self.remove_session(session_id);
        }
        self.producers
            .retain(|_, producer| producer.connection_id != connection_id);
        self.connections.remove(&connection_id);
    }

    fn take_message(&mut self, consumer_id: u64) -> Result<Option<ReceivedMessage>, BrokerError> {
        let record = self
            .consumers
            .get(&consumer_id)
            .ok_or_else(|| BrokerError::Closed {
                resource: "consumer".to_string(),
            })?;

        let started = self
            .connections
            .get(&record.connection_id)
            .map(|connection| connection.started)
            .unwrap_or(false);
        if !started {
            return Ok(None);
        }

        match &record.source {
            ConsumerSource::Queue {
                destination,
                selector,
            } => {
                let Some(queue) = self.queues.get_mut(destination) else {
                    return Ok(None);
                };
                let position = queue.iter().position(|message| {
                    selector
                        .as_ref()
                        .map(|s| s.matches(&message.properties))
                        .unwrap_or(true)
                });
                Ok(position.and_then(|index| queue.remove(index)))
            }
            ConsumerSource::Subscription(key) => Ok(self
                .subscriptions
                .get_mut(key)
                .and_then(|subscription| subscription.messages.pop_front())),
        }
    }
}

/// State shared by a broker and every handle it hands out
struct BrokerShared {
    name: String,
    state: Mutex<BrokerState>,
    changed: Notify,
}

impl BrokerShared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every receive waiting on this broker
    fn notify(&self) {
        self.changed.notify_waiters();
    }
}

/// Process-wide registry backing `vm://` URLs
fn vm_registry() -> &'static Mutex<HashMap<String, InMemoryBroker>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, InMemoryBroker>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// In-process message broker.
///
/// Cloning yields another handle to the same broker. The broker implements
/// both [`DirectoryResolver`] and [`ConnectionFactory`].
///
/// ```rust
/// use broker_bridge::{InMemoryBroker, MessageBridge, ReceiveTimeout};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let broker = InMemoryBroker::new("docs");
/// broker.declare_queue("orders");
/// let bridge = MessageBridge::new(Arc::new(broker.clone()), Arc::new(broker.clone()), None);
///
/// bridge.send_text("hello", "orders").await.unwrap();
/// assert_eq!(broker.queue_depth("orders"), 1);
///
/// let text = bridge
///     .receive_text_from_queue("orders", None, ReceiveTimeout::from_millis(100))
///     .await
///     .unwrap();
/// assert_eq!(text, "hello");
/// # });
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<BrokerShared>,
}

impl InMemoryBroker {
    /// Create a new, empty broker
    pub fn new(name: impl Into<String>) -> Self {
        let mut state = BrokerState::default();
        state
            .connection_factories
            .insert(DEFAULT_CONNECTION_FACTORY.to_string());

        Self {
            shared: Arc::new(BrokerShared {
                name: name.into(),
                state: Mutex::new(state),
                changed: Notify::new(),
            }),
        }
    }

    /// Get the broker registered for a `vm://name` URL, creating it on first use
    pub fn for_url(provider_url: &str) -> Result<Self, ConfigurationError> {
        let url = url::Url::parse(provider_url).map_err(|e| ConfigurationError::Invalid {
            message: format!("provider URL '{}' is not a valid URL: {}", provider_url, e),
        })?;

        if url.scheme() != "vm" {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "in-memory broker requires a vm:// provider URL, got '{}'",
                    provider_url
                ),
            });
        }

        let name = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConfigurationError::Invalid {
                message: format!("provider URL '{}' does not name a broker", provider_url),
            })?
            .to_string();

        let mut registry = vm_registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let broker = registry
            .entry(name.clone())
            .or_insert_with(|| {
                debug!(broker = %name, "Creating in-memory broker");
                Self::new(name.clone())
            })
            .clone();

        Ok(broker)
    }

    /// Name of this broker
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Register a queue under `name`
    pub fn declare_queue(&self, name: impl Into<DestinationName>) -> &Self {
        self.shared
            .lock()
            .declared
            .insert(name.into(), DestinationKind::Queue);
        self
    }

    /// Register a topic under `name`
    pub fn declare_topic(&self, name: impl Into<DestinationName>) -> &Self {
        self.shared
            .lock()
            .declared
            .insert(name.into(), DestinationKind::Topic);
        self
    }

    /// Register an additional connection factory name
    pub fn register_connection_factory(&self, name: impl Into<String>) -> &Self {
        self.shared.lock().connection_factories.insert(name.into());
        self
    }

    /// Require authentication and accept this principal/secret pair
    pub fn add_user(&self, principal: impl Into<String>, secret: impl Into<String>) -> &Self {
        self.shared
            .lock()
            .users
            .insert(principal.into(), secret.into());
        self
    }

    /// Number of messages waiting on a queue
    pub fn queue_depth(&self, name: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(&DestinationName::new(name))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Number of messages retained for a durable subscription, if it exists
    pub fn durable_backlog(&self, client_id: &ClientId, name: &SubscriptionName) -> Option<usize> {
        let key = SubscriptionKey::Durable {
            client_id: client_id.clone(),
            name: name.clone(),
        };
        self.shared
            .lock()
            .subscriptions
            .get(&key)
            .map(|subscription| subscription.messages.len())
    }

    /// Number of open connections
    pub fn open_connections(&self) -> usize {
        self.shared.lock().connections.len()
    }

    /// Number of open producers
    pub fn open_producers(&self) -> usize {
        self.shared.lock().producers.len()
    }

    /// Number of open consumers
    pub fn open_consumers(&self) -> usize {
        self.shared.lock().consumers.len()
    }

    fn lookup(&self, name: &DestinationName) -> Option<Destination> {
        if let Some(kind) = self.shared.lock().declared.get(name) {
            return Some(match kind {
                DestinationKind::Queue => Destination::queue(name.clone()),
                DestinationKind::Topic => Destination::topic(name.clone()),
            });
        }

        let raw = name.as_str();
        if let Some(rest) = raw.strip_prefix(DYNAMIC_QUEUE_PREFIX) {
            (!rest.is_empty()).then(|| Destination::queue(name.clone()))
        } else if let Some(rest) = raw.strip_prefix(DYNAMIC_TOPIC_PREFIX) {
            (!rest.is_empty()).then(|| Destination::topic(name.clone()))
        } else {
            None
        }
    }

    fn authenticate(
        state: &BrokerState,
        credentials: Option<&Credentials>,
    ) -> Result<(), BrokerError> {
        if state.users.is_empty() {
            return Ok(());
        }

        match credentials {
            Some(credentials)
                if state.users.get(credentials.principal()).map(String::as_str)
                    == Some(credentials.secret()) =>
            {
                Ok(())
            }
            Some(credentials) => Err(BrokerError::AuthenticationFailed {
                principal: credentials.principal().to_string(),
            }),
            None => Err(BrokerError::AuthenticationFailed {
                principal: String::new(),
            }),
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new("localhost")
    }
}

#[async_trait]
impl DirectoryResolver for InMemoryBroker {
    async fn resolve_destination(
        &self,
        name: &DestinationName,
    ) -> Result<Destination, BrokerError> {
        self.lookup(name).ok_or_else(|| BrokerError::NotFound {
            name: name.to_string(),
        })
    }

    async fn resolve_connection_factory(
        &self,
        name: &str,
    ) -> Result<Arc<dyn ConnectionFactory>, BrokerError> {
        if self.shared.lock().connection_factories.contains(name) {
            Ok(Arc::new(self.clone()))
        } else {
            Err(BrokerError::NotFound {
                name: name.to_string(),
            })
        }
    }
}

#[async_trait]
impl ConnectionFactory for InMemoryBroker {
    async fn create_connection(
        &self,
        client_id: &ClientId,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let mut state = self.shared.lock();
        Self::authenticate(&state, credentials)?;

        if state
            .connections
            .values()
            .any(|connection| &connection.client_id == client_id)
        {
            return Err(BrokerError::InvalidClientId {
                client_id: client_id.to_string(),
                message: "already in use by an open connection".to_string(),
            });
        }

        let id = state.next_id();
        state.connections.insert(
            id,
            ConnectionRecord {
                client_id: client_id.clone(),
                started: false,
            },
        );
        debug!(broker = %self.shared.name, client_id = %client_id, "Connection opened");

        Ok(Arc::new(InMemoryConnection {
            shared: Arc::clone(&self.shared),
            id,
            client_id: client_id.clone(),
        }))
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Connection to an [`InMemoryBroker`]
pub struct InMemoryConnection {
    shared: Arc<BrokerShared>,
    id: u64,
    client_id: ClientId,
}

impl InMemoryConnection {
    fn set_started(&self, started: bool) -> Result<(), BrokerError> {
        let mut state = self.shared.lock();
        let connection = state
            .connections
            .get_mut(&self.id)
            .ok_or_else(|| BrokerError::Closed {
                resource: format!("connection '{}'", self.client_id),
            })?;
        connection.started = started;
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    async fn start(&self) -> Result<(), BrokerError> {
        self.set_started(true)?;
        self.shared.notify();
        Ok(())
    }

    async fn stop(&self) -> Result<(), BrokerError> {
        self.set_started(false)
    }

    async fn create_session(&self) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        let mut state = self.shared.lock();
        state.ensure_connection_open(self.id)?;
        let session_id = state.next_id();
        state.sessions.insert(session_id, self.id);

        Ok(Arc::new(InMemorySession {
            shared: Arc::clone(&self.shared),
            id: session_id,
            connection_id: self.id,
            client_id: self.client_id.clone(),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.shared.lock().remove_connection(self.id);
        debug!(broker = %self.shared.name, client_id = %self.client_id, "Connection closed");
        // Receivers blocked on this connection must observe the close
        self.shared.notify();
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session of an [`InMemoryConnection`]
pub struct InMemorySession {
    shared: Arc<BrokerShared>,
    id: u64,
    connection_id: u64,
    client_id: ClientId,
}

impl InMemorySession {
    fn register_consumer(
        &self,
        state: &mut BrokerState,
        source: ConsumerSource,
    ) -> Box<dyn MessageConsumer> {
        let consumer_id = state.next_id();
        state.consumers.insert(
            consumer_id,
            ConsumerRecord {
                connection_id: self.connection_id,
                session_id: self.id,
                source,
            },
        );
        Box::new(InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            id: consumer_id,
        })
    }
}

#[async_trait]
impl BrokerSession for InMemorySession {
    async fn create_producer(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn MessageProducer>, BrokerError> {
        let mut state = self.shared.lock();
        state.ensure_session_open(self.id)?;
        let producer_id = state.next_id();
        state.producers.insert(
            producer_id,
            ProducerRecord {
                connection_id: self.connection_id,
                session_id: self.id,
            },
        );

        Ok(Box::new(InMemoryProducer {
            shared: Arc::clone(&self.shared),
            id: producer_id,
            destination: destination.clone(),
        }))
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&Selector>,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        let mut state = self.shared.lock();
        state.ensure_session_open(self.id)?;

        let source = match destination.kind() {
            DestinationKind::Queue => ConsumerSource::Queue {
                destination: destination.name().clone(),
                selector: selector.cloned(),
            },
            DestinationKind::Topic => {
                let key = SubscriptionKey::NonDurable(state.next_id());
                state.subscriptions.insert(
                    key.clone(),
                    SubscriptionQueue {
                        topic: destination.name().clone(),
                        selector: selector.cloned(),
                        messages: VecDeque::new(),
                        connection_id: Some(self.connection_id),
                    },
                );
                ConsumerSource::Subscription(key)
            }
        };

        Ok(self.register_consumer(&mut state, source))
    }

    async fn create_durable_subscriber(
        &self,
        topic: &Destination,
        name: &SubscriptionName,
        selector: Option<&Selector>,
    ) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        if !topic.is_topic() {
            return Err(BrokerError::InvalidDestination {
                name: topic.name().to_string(),
                message: "durable subscriptions require a topic".to_string(),
            });
        }

        let mut state = self.shared.lock();
        state.ensure_session_open(self.id)?;

        let key = SubscriptionKey::Durable {
            client_id: self.client_id.clone(),
            name: name.clone(),
        };

        match state.subscriptions.get_mut(&key) {
            Some(existing) if existing.connection_id.is_some() => {
                return Err(BrokerError::IllegalState {
                    message: format!(
                        "durable subscription '{}' of client '{}' already has an active consumer",
                        name, self.client_id
                    ),
                });
            }
            Some(existing)
                if &existing.topic == topic.name() && existing.selector.as_ref() == selector =>
            {
                debug!(subscription = %name, client_id = %self.client_id, backlog = existing.messages.len(), "Re-attaching durable subscription");
                existing.connection_id = Some(self.connection_id);
            }
            Some(existing) => {
                debug!(subscription = %name, client_id = %self.client_id, "Durable subscription redefined; retained messages discarded");
                existing.topic = topic.name().clone();
                existing.selector = selector.cloned();
                existing.messages.clear();
                existing.connection_id = Some(self.connection_id);
            }
            None => {
                state.subscriptions.insert(
                    key.clone(),
                    SubscriptionQueue {
                        topic: topic.name().clone(),
                        selector: selector.cloned(),
                        messages: VecDeque::new(),
                        connection_id: Some(self.connection_id),
                    },
                );
            }
        }

        Ok(self.register_consumer(&mut state, ConsumerSource::Subscription(key)))
    }

    async fn unsubscribe(&self, name: &SubscriptionName) -> Result<(), BrokerError> {
        let mut state = self.shared.lock();
        state.ensure_session_open(self.id)?;

        let key = SubscriptionKey::Durable {
            client_id: self.client_id.clone(),
            name: name.clone(),
        };
        match state.subscriptions.get(&key) {
            None => Err(BrokerError::NotFound {
                name: name.to_string(),
            }),
            Some(subscription) if subscription.connection_id.is_some() => {
                Err(BrokerError::IllegalState {
                    message: format!(
                        "durable subscription '{}' still has an active consumer",
                        name
                    ),
                })
            }
            Some(_) => {
                state.subscriptions.remove(&key);
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.shared.lock().remove_session(self.id);
        self.shared.notify();
        Ok(())
    }
}

// ============================================================================
// Producer and Consumer
// ============================================================================

/// Producer of an [`InMemorySession`]
pub struct InMemoryProducer {
    shared: Arc<BrokerShared>,
    id: u64,
    destination: Destination,
}

#[async_trait]
impl MessageProducer for InMemoryProducer {
    async fn send(&self, message: &MessageEnvelope) -> Result<MessageId, BrokerError> {
        let message_id = MessageId::new();
        {
            let mut state = self.shared.lock();
            if !state.producers.contains_key(&self.id) {
                return Err(BrokerError::Closed {
                    resource: "producer".to_string(),
                });
            }

            state.enqueue(
                &self.destination,
                ReceivedMessage {
                    message_id: message_id.clone(),
                    destination: self.destination.name().clone(),
                    payload: message.payload.clone(),
                    properties: message.properties.clone(),
                    sent_at: Timestamp::now(),
                },
            );
        }
        self.shared.notify();
        Ok(message_id)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.shared.lock().producers.remove(&self.id);
        Ok(())
    }
}

/// Consumer of an [`InMemorySession`]
pub struct InMemoryConsumer {
    shared: Arc<BrokerShared>,
    id: u64,
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    async fn receive(
        &self,
        timeout: ReceiveTimeout,
    ) -> Result<Option<ReceivedMessage>, BrokerError> {
        // A bound too large to represent as an instant waits indefinitely
        let deadline = timeout
            .as_duration()
            .and_then(|duration| Instant::now().checked_add(duration));

        loop {
            // Register interest before looking so a concurrent send cannot slip between
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.shared.lock().take_message(self.id)? {
                return Ok(Some(message));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.shared.lock().remove_consumer(self.id);
        self.shared.notify();
        Ok(())
    }
}
