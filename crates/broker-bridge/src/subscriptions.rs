//! Topic subscription registry.
//!
//! Each named subscription owns a dedicated connection, so pausing one
//! subscription never affects another subscription or the queue traffic on
//! the bridge's default connection.
//!
//! Lifecycle per subscription name:
//!
//! ```text
//! Unregistered --start--> Started --stop--> Stopped --start--> Started
//!                                                   --unsubscribe--> Unregistered (durable only)
//! ```

use crate::client::{BrokerConnection, BrokerSession, DirectoryResolver, MessageConsumer};
use crate::closer;
use crate::connection::{start_connection, stop_connection, ConnectionManager};
use crate::error::BridgeError;
use crate::message::{DestinationName, ReceiveTimeout, ReceivedMessage, SubscriptionName};
use crate::selector::Selector;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "subscriptions_tests.rs"]
mod tests;

/// Delivery state of a registered subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Started,
    Stopped,
}

/// What a caller asks for when starting a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub name: String,
    pub destination: DestinationName,
    pub selector: Option<String>,
    pub durable: bool,
}

/// A live topic subscription and the resources it owns
pub struct SubscriptionHandle {
    name: SubscriptionName,
    destination: DestinationName,
    selector: Option<Selector>,
    durable: bool,
    connection: Arc<dyn BrokerConnection>,
    session: Arc<dyn BrokerSession>,
    consumer: Box<dyn MessageConsumer>,
    state: Mutex<SubscriptionState>,
}

impl SubscriptionHandle {
    pub fn name(&self) -> &SubscriptionName {
        &self.name
    }

    pub fn destination(&self) -> &DestinationName {
        &self.destination
    }

    /// Selector fixed when the subscription was created
    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SubscriptionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Wait up to `timeout` for the next message of this subscription
    pub async fn receive(
        &self,
        timeout: ReceiveTimeout,
    ) -> Result<Option<ReceivedMessage>, BridgeError> {
        self.consumer.receive(timeout).await.map_err(|e| {
            BridgeError::access(
                format!("Could not receive from subscription '{}'", self.name),
                e,
            )
        })
    }

    async fn resume(&self) -> Result<(), BridgeError> {
        start_connection(self.connection.as_ref()).await?;
        self.set_state(SubscriptionState::Started);
        Ok(())
    }

    async fn pause(&self) -> Result<(), BridgeError> {
        stop_connection(self.connection.as_ref()).await?;
        self.set_state(SubscriptionState::Stopped);
        Ok(())
    }

    /// Close consumer, session and connection; durable registrations persist
    async fn release(&self) {
        closer::close_consumer(self.consumer.as_ref()).await;
        closer::close_session(self.session.as_ref()).await;
        closer::close_connection(self.connection.as_ref()).await;
    }
}

/// Registry of named topic subscriptions
pub struct TopicSubscriptionRegistry {
    resolver: Arc<dyn DirectoryResolver>,
    connections: Arc<ConnectionManager>,
    handles: RwLock<HashMap<SubscriptionName, Arc<SubscriptionHandle>>>,
}

impl TopicSubscriptionRegistry {
    pub fn new(resolver: Arc<dyn DirectoryResolver>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            resolver,
            connections,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Start or resume a subscription.
    ///
    /// An existing subscription of the same name is resumed as-is; its topic,
    /// selector and durability are not changed.
    pub async fn start(&self, request: SubscriptionRequest) -> Result<(), BridgeError> {
        let name = parse_name(&request.name)?;
        let selector = Selector::parse_optional(request.selector.as_deref()).map_err(|e| {
            BridgeError::automation_caused_by(
                format!("Invalid selector for subscription '{}'", name),
                e,
            )
        })?;

        // Write lock guards against creating the same subscription twice
        let mut handles = self.handles.write().await;

        if let Some(handle) = handles.get(&name) {
            if handle.destination() != &request.destination
                || handle.is_durable() != request.durable
                || handle.selector() != selector.as_ref()
            {
                warn!(
                    subscription = %name,
                    destination = %handle.destination(),
                    requested = %request.destination,
                    "Subscription already exists with a different definition; resuming existing one"
                );
            }
            handle.resume().await?;
            debug!(subscription = %name, "Subscription resumed");
            return Ok(());
        }

        let topic = self
            .resolver
            .resolve_destination(&request.destination)
            .await
            .map_err(|e| {
                BridgeError::automation_caused_by(
                    format!("Could not lookup destination {}", request.destination),
                    e,
                )
            })?;
        if !topic.is_topic() {
            return Err(BridgeError::automation(format!(
                "Destination {} is not a topic",
                request.destination
            )));
        }

        let connection = self
            .connections
            .create_dedicated_connection(name.as_str())
            .await?;

        let session = match connection.create_session().await {
            Ok(session) => session,
            Err(e) => {
                closer::close_connection(connection.as_ref()).await;
                return Err(BridgeError::access(
                    format!("Could not create session for subscription '{}'", name),
                    e,
                ));
            }
        };

        let consumer = if request.durable {
            session
                .create_durable_subscriber(&topic, &name, selector.as_ref())
                .await
        } else {
            session.create_consumer(&topic, selector.as_ref()).await
        };
        let consumer = match consumer {
            Ok(consumer) => consumer,
            Err(e) => {
                closer::close_session(session.as_ref()).await;
                closer::close_connection(connection.as_ref()).await;
                return Err(BridgeError::access(
                    format!("Could not create subscriber '{}' on {}", name, topic),
                    e,
                ));
            }
        };

        let handle = Arc::new(SubscriptionHandle {
            name: name.clone(),
            destination: request.destination.clone(),
            selector,
            durable: request.durable,
            connection,
            session,
            consumer,
            state: Mutex::new(SubscriptionState::Stopped),
        });

        if let Err(e) = handle.resume().await {
            handle.release().await;
            return Err(e);
        }

        info!(
            subscription = %name,
            destination = %request.destination,
            durable = request.durable,
            "Subscription started"
        );
        handles.insert(name, handle);
        Ok(())
    }

    /// Pause delivery to a subscription; durable registrations keep collecting messages
    pub async fn stop(&self, name: &str) -> Result<(), BridgeError> {
        let handle = self.get(name).await?;
        handle.pause().await?;
        debug!(subscription = %handle.name(), "Subscription stopped");
        Ok(())
    }

    /// Permanently delete a durable subscription and release its resources
    pub async fn unsubscribe(&self, name: &str) -> Result<(), BridgeError> {
        let key = parse_name(name)?;

        let handle = {
            let mut handles = self.handles.write().await;
            let handle = handles
                .get(&key)
                .ok_or_else(|| unknown_subscription(&key))?;
            if !handle.is_durable() {
                return Err(BridgeError::automation(format!(
                    "Subscription '{}' is not durable and cannot be unsubscribed",
                    key
                )));
            }
            handles.remove(&key).ok_or_else(|| unknown_subscription(&key))?
        };

        // The consumer must be gone before the broker accepts the unsubscribe
        closer::close_consumer(handle.consumer.as_ref()).await;
        let result = handle.session.unsubscribe(&key).await;
        closer::close_session(handle.session.as_ref()).await;
        closer::close_connection(handle.connection.as_ref()).await;

        result.map_err(|e| {
            BridgeError::access(format!("Could not unsubscribe '{}'", key), e)
        })?;

        info!(subscription = %key, "Durable subscription removed");
        Ok(())
    }

    /// Wait up to `timeout` for the next message of a subscription
    pub async fn receive(
        &self,
        name: &str,
        timeout: ReceiveTimeout,
    ) -> Result<Option<ReceivedMessage>, BridgeError> {
        let handle = self.get(name).await?;
        handle.receive(timeout).await
    }

    /// Look up a registered subscription
    pub async fn get(&self, name: &str) -> Result<Arc<SubscriptionHandle>, BridgeError> {
        let key = parse_name(name)?;
        self.handles
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| unknown_subscription(&key))
    }

    /// Names of all registered subscriptions
    pub async fn names(&self) -> Vec<SubscriptionName> {
        let mut names: Vec<_> = self.handles.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Release every subscription; durable registrations persist on the broker
    pub async fn close_all(&self) {
        let handles: Vec<_> = self.handles.write().await.drain().collect();
        for (name, handle) in handles {
            handle.release().await;
            debug!(subscription = %name, "Subscription closed");
        }
    }
}

fn parse_name(name: &str) -> Result<SubscriptionName, BridgeError> {
    SubscriptionName::new(name)
        .ok_or_else(|| BridgeError::automation("Subscription name must not be empty"))
}

fn unknown_subscription(name: &SubscriptionName) -> BridgeError {
    BridgeError::automation(format!("Subscription '{}' does not exist", name))
}
