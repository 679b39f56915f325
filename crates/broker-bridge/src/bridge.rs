//! The message bridge facade.
//!
//! [`MessageBridge`] is the operation surface used by test automation code:
//! send to queues and topics, receive from queues with required delivery, and
//! manage named topic subscriptions whose delivery may be optional.
//!
//! Every send and receive creates its producer or consumer for that call only
//! and closes it before returning, whatever the outcome. Connections are never
//! closed by an individual operation.

use crate::client::{
    ConnectionFactory, Credentials, Destination, DirectoryResolver, MessageConsumer,
    MessageProducer,
};
use crate::closer;
use crate::config::{BridgeConfig, DirectoryFactoryKind};
use crate::connection::{ConnectionManager, DefaultLease};
use crate::error::{BridgeError, BrokerError, ConfigurationError};
use crate::memo::{Attachment, RecentMessageMemo};
use crate::message::{
    DestinationName, MessageEnvelope, MessageId, Payload, PropertyMap, ReceiveTimeout,
    ReceivedMessage,
};
use crate::providers::InMemoryBroker;
use crate::selector::Selector;
use crate::subscriptions::{SubscriptionRequest, TopicSubscriptionRegistry};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;

/// Stateful client facade over a message broker
pub struct MessageBridge {
    resolver: Arc<dyn DirectoryResolver>,
    connections: Arc<ConnectionManager>,
    subscriptions: TopicSubscriptionRegistry,
    memo: RecentMessageMemo,
}

impl MessageBridge {
    /// Create a bridge; no connection is opened until the first operation
    pub fn new(
        resolver: Arc<dyn DirectoryResolver>,
        factory: Arc<dyn ConnectionFactory>,
        credentials: Option<Credentials>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(factory, credentials));
        let subscriptions =
            TopicSubscriptionRegistry::new(Arc::clone(&resolver), Arc::clone(&connections));

        info!(principal = %connections.principal(), "Message bridge created");

        Self {
            resolver,
            connections,
            subscriptions,
            memo: RecentMessageMemo::new(),
        }
    }

    /// Create a bridge from configuration.
    ///
    /// Builds the directory for the configured factory kind and resolves the
    /// named connection factory; a missing factory is a configuration error.
    pub async fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;

        let resolver: Arc<dyn DirectoryResolver> = match config.directory_kind()? {
            DirectoryFactoryKind::InMemory => Arc::new(InMemoryBroker::for_url(&config.provider_url)?),
        };

        let factory = resolver
            .resolve_connection_factory(&config.connection_factory_name)
            .await
            .map_err(|e| match e {
                BrokerError::NotFound { .. } => {
                    BridgeError::from(ConfigurationError::ConnectionFactoryNotFound {
                        name: config.connection_factory_name.clone(),
                    })
                }
                other => BridgeError::technical(
                    format!(
                        "Could not lookup connection factory '{}'",
                        config.connection_factory_name
                    ),
                    other,
                ),
            })?;

        Ok(Self::new(resolver, factory, config.credentials()))
    }

    /// Topic subscriptions managed by this bridge
    pub fn subscriptions(&self) -> &TopicSubscriptionRegistry {
        &self.subscriptions
    }

    // ========================================================================
    // Directory
    // ========================================================================

    /// Check whether `name` resolves to a destination; never fails
    pub async fn is_destination_available(&self, name: &str) -> bool {
        self.memo.clear();
        match self
            .resolver
            .resolve_destination(&DestinationName::new(name))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                if !e.is_not_found() {
                    debug!(destination = %name, error = %e, "Destination lookup failed");
                }
                false
            }
        }
    }

    /// Fail with a content-validation error when `name` does not resolve
    pub async fn assert_destination_available(&self, name: &str) -> Result<(), BridgeError> {
        if self.is_destination_available(name).await {
            Ok(())
        } else {
            Err(BridgeError::ContentValidation {
                message: format!("Destination {} is not available", name),
            })
        }
    }

    // ========================================================================
    // Send Operations
    // ========================================================================

    /// Send a text message
    pub async fn send_text(&self, text: &str, destination: &str) -> Result<MessageId, BridgeError> {
        self.memo.record(text);
        self.send(MessageEnvelope::text(text), destination).await
    }

    /// Serialize `value` and send it as an object message
    pub async fn send_object<T>(&self, value: &T, destination: &str) -> Result<MessageId, BridgeError>
    where
        T: Serialize + ?Sized,
    {
        self.memo.clear();
        let value = serde_json::to_value(value).map_err(|e| {
            BridgeError::automation_caused_by("Object could not be serialized", e)
        })?;
        self.memo.record(value.to_string());
        self.send(MessageEnvelope::object(value), destination).await
    }

    /// Send a binary message
    pub async fn send_binary(
        &self,
        bytes: impl Into<Bytes>,
        destination: &str,
    ) -> Result<MessageId, BridgeError> {
        let envelope = MessageEnvelope::binary(bytes);
        self.memo.record(envelope.payload.to_display_string());
        self.send(envelope, destination).await
    }

    /// Send a message carrying selector-visible properties
    pub async fn send_with_properties(
        &self,
        envelope: MessageEnvelope,
        destination: &str,
    ) -> Result<MessageId, BridgeError> {
        self.memo.record(envelope.payload.to_display_string());
        self.send(envelope, destination).await
    }

    /// Send the content of a file as a text message and return that content
    pub async fn send_file_as_text(
        &self,
        file_uri: &str,
        destination: &str,
    ) -> Result<String, BridgeError> {
        self.send_file_with_properties(file_uri, PropertyMap::new(), destination)
            .await
    }

    /// Send the content of a file as a binary message and return it base64-encoded
    pub async fn send_file_as_binary(
        &self,
        file_uri: &str,
        destination: &str,
    ) -> Result<String, BridgeError> {
        self.memo.clear();
        let bytes = tokio::fs::read(file_path(file_uri))
            .await
            .map_err(|e| BridgeError::access(format!("Could not read resource {}", file_uri), e))?;
        let encoded = general_purpose::STANDARD.encode(&bytes);

        self.memo.record(encoded.clone());
        self.send(MessageEnvelope::binary(bytes), destination).await?;
        Ok(encoded)
    }

    /// Send the content of a file as a text message with properties and return that content
    pub async fn send_file_with_properties(
        &self,
        file_uri: &str,
        properties: PropertyMap,
        destination: &str,
    ) -> Result<String, BridgeError> {
        self.memo.clear();
        let content = tokio::fs::read_to_string(file_path(file_uri))
            .await
            .map_err(|e| BridgeError::access(format!("Could not read resource {}", file_uri), e))?;

        self.memo.record(content.clone());
        let envelope = MessageEnvelope {
            payload: Payload::Text(content.clone()),
            properties,
        };
        self.send(envelope, destination).await?;
        Ok(content)
    }

    async fn send(
        &self,
        envelope: MessageEnvelope,
        destination: &str,
    ) -> Result<MessageId, BridgeError> {
        let name = DestinationName::new(destination);
        let destination = self.resolve(&name).await?;

        let lease = self.connections.lease().await?;
        let producer = lease
            .session()
            .create_producer(&destination)
            .await
            .map_err(|e| {
                BridgeError::access(format!("Could not create producer for {}", name), e)
            })?;

        let result = send_with(&lease, producer.as_ref(), &envelope, &name).await;
        closer::close_producer(producer.as_ref()).await;

        let message_id = result?;
        debug!(destination = %name, message_id = %message_id, kind = envelope.payload.kind_name(), "Message sent");
        Ok(message_id)
    }

    // ========================================================================
    // Queue Receive Operations
    // ========================================================================

    /// Receive the next message from a queue.
    ///
    /// Absence of a message within `timeout` is a required-delivery failure.
    pub async fn receive_from_queue(
        &self,
        destination: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
    ) -> Result<ReceivedMessage, BridgeError> {
        self.memo.clear();
        let selector = parse_selector(selector)?;
        let name = DestinationName::new(destination);
        let destination = self.resolve(&name).await?;
        if destination.is_topic() {
            return Err(BridgeError::automation(format!(
                "Destination {} is a topic; use a subscription to receive from it",
                name
            )));
        }

        let lease = self.connections.lease().await?;
        let consumer = lease
            .session()
            .create_consumer(&destination, selector.as_ref())
            .await
            .map_err(|e| {
                BridgeError::access(format!("Could not create consumer for {}", name), e)
            })?;

        let result = receive_with(&lease, consumer.as_ref(), timeout, &name).await;
        closer::close_consumer(consumer.as_ref()).await;
        drop(lease);

        let message = result?.ok_or_else(|| BridgeError::RequiredDelivery {
            source_name: format!("Destination {}", name),
            timeout,
        })?;

        self.memo.record(message.payload.to_display_string());
        debug!(destination = %name, message_id = %message.message_id, "Message received");
        Ok(message)
    }

    /// Receive a text message from a queue
    pub async fn receive_text_from_queue(
        &self,
        destination: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
    ) -> Result<String, BridgeError> {
        let message = self
            .receive_from_queue(destination, selector, timeout)
            .await?;
        expect_text(message)
    }

    /// Receive an object message from a queue and deserialize it
    pub async fn receive_object_from_queue<T: DeserializeOwned>(
        &self,
        destination: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
    ) -> Result<T, BridgeError> {
        let message = self
            .receive_from_queue(destination, selector, timeout)
            .await?;
        expect_object(message)
    }

    /// Receive a binary message from a queue
    pub async fn receive_binary_from_queue(
        &self,
        destination: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
    ) -> Result<Bytes, BridgeError> {
        let message = self
            .receive_from_queue(destination, selector, timeout)
            .await?;
        expect_binary(message)
    }

    /// Receive a text message from a queue and check it with `validator`
    pub async fn receive_text_from_queue_and_validate<F>(
        &self,
        destination: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
        validator: F,
    ) -> Result<String, BridgeError>
    where
        F: FnOnce(&str) -> bool,
    {
        let text = self
            .receive_text_from_queue(destination, selector, timeout)
            .await?;
        validate(validator(text.as_str()), destination)?;
        Ok(text)
    }

    /// Receive an object message from a queue and check it with `validator`
    pub async fn receive_object_from_queue_and_validate<T, F>(
        &self,
        destination: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
        validator: F,
    ) -> Result<T, BridgeError>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> bool,
    {
        let value: T = self
            .receive_object_from_queue(destination, selector, timeout)
            .await?;
        validate(validator(&value), destination)?;
        Ok(value)
    }

    /// Receive a binary message from a queue and check it with `validator`
    pub async fn receive_binary_from_queue_and_validate<F>(
        &self,
        destination: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
        validator: F,
    ) -> Result<Bytes, BridgeError>
    where
        F: FnOnce(&[u8]) -> bool,
    {
        let bytes = self
            .receive_binary_from_queue(destination, selector, timeout)
            .await?;
        validate(validator(&bytes[..]), destination)?;
        Ok(bytes)
    }

    // ========================================================================
    // Topic Subscription Operations
    // ========================================================================

    /// Start, or resume, the named subscription to a topic
    pub async fn start_subscriber(
        &self,
        subscription: &str,
        destination: &str,
        selector: Option<&str>,
        durable: bool,
    ) -> Result<(), BridgeError> {
        self.memo.clear();
        self.subscriptions
            .start(SubscriptionRequest {
                name: subscription.to_string(),
                destination: DestinationName::new(destination),
                selector: selector.map(str::to_string),
                durable,
            })
            .await
    }

    /// Pause delivery to the named subscription
    pub async fn stop_subscriber(&self, subscription: &str) -> Result<(), BridgeError> {
        self.memo.clear();
        self.subscriptions.stop(subscription).await
    }

    /// Permanently delete the named durable subscription
    pub async fn unsubscribe(&self, subscription: &str) -> Result<(), BridgeError> {
        self.memo.clear();
        self.subscriptions.unsubscribe(subscription).await
    }

    /// Receive the next message of a subscription.
    ///
    /// `selector` must be absent or equivalent to the selector the subscription
    /// was started with; spacing and keyword case do not matter. When no message arrives in time the result is `Ok(None)`
    /// unless `required` is set, in which case it is a required-delivery failure.
    pub async fn receive_from_topic(
        &self,
        subscription: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
        required: bool,
    ) -> Result<Option<ReceivedMessage>, BridgeError> {
        self.memo.clear();
        let selector = parse_selector(selector)?;
        let handle = self.subscriptions.get(subscription).await?;

        if let Some(selector) = &selector {
            if handle.selector() != Some(selector) {
                return Err(BridgeError::automation(format!(
                    "Selector '{}' does not match the selector of subscription '{}'",
                    selector,
                    handle.name()
                )));
            }
        }

        match handle.receive(timeout).await? {
            Some(message) => {
                self.memo.record(message.payload.to_display_string());
                debug!(subscription = %handle.name(), message_id = %message.message_id, "Message received");
                Ok(Some(message))
            }
            None if required => Err(BridgeError::RequiredDelivery {
                source_name: format!("Subscription {}", handle.name()),
                timeout,
            }),
            None => Ok(None),
        }
    }

    /// Receive a text message from a subscription
    pub async fn receive_text_from_topic(
        &self,
        subscription: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
        required: bool,
    ) -> Result<Option<String>, BridgeError> {
        self.receive_from_topic(subscription, selector, timeout, required)
            .await?
            .map(expect_text)
            .transpose()
    }

    /// Receive an object message from a subscription and deserialize it
    pub async fn receive_object_from_topic<T: DeserializeOwned>(
        &self,
        subscription: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
        required: bool,
    ) -> Result<Option<T>, BridgeError> {
        self.receive_from_topic(subscription, selector, timeout, required)
            .await?
            .map(expect_object)
            .transpose()
    }

    /// Receive a binary message from a subscription
    pub async fn receive_binary_from_topic(
        &self,
        subscription: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
        required: bool,
    ) -> Result<Option<Bytes>, BridgeError> {
        self.receive_from_topic(subscription, selector, timeout, required)
            .await?
            .map(expect_binary)
            .transpose()
    }

    /// Receive a text message from a subscription and check it with `validator`.
    ///
    /// The validator also runs when an optional message is absent, with `None`.
    pub async fn receive_text_from_topic_and_validate<F>(
        &self,
        subscription: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
        required: bool,
        validator: F,
    ) -> Result<Option<String>, BridgeError>
    where
        F: FnOnce(Option<&str>) -> bool,
    {
        let text = self
            .receive_text_from_topic(subscription, selector, timeout, required)
            .await?;
        validate(validator(text.as_deref()), subscription)?;
        Ok(text)
    }

    /// Receive an object message from a subscription and check it with `validator`
    pub async fn receive_object_from_topic_and_validate<T, F>(
        &self,
        subscription: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
        required: bool,
        validator: F,
    ) -> Result<Option<T>, BridgeError>
    where
        T: DeserializeOwned,
        F: FnOnce(Option<&T>) -> bool,
    {
        let value: Option<T> = self
            .receive_object_from_topic(subscription, selector, timeout, required)
            .await?;
        validate(validator(value.as_ref()), subscription)?;
        Ok(value)
    }

    /// Receive a binary message from a subscription and check it with `validator`
    pub async fn receive_binary_from_topic_and_validate<F>(
        &self,
        subscription: &str,
        selector: Option<&str>,
        timeout: ReceiveTimeout,
        required: bool,
        validator: F,
    ) -> Result<Option<Bytes>, BridgeError>
    where
        F: FnOnce(Option<&[u8]>) -> bool,
    {
        let bytes = self
            .receive_binary_from_topic(subscription, selector, timeout, required)
            .await?;
        validate(validator(bytes.as_deref()), subscription)?;
        Ok(bytes)
    }

    // ========================================================================
    // Diagnostics and Shutdown
    // ========================================================================

    /// Payload of the most recent send or receive, if it produced one
    pub fn recent_message(&self) -> Option<String> {
        self.memo.get()
    }

    /// Attachments describing the most recent payload
    pub fn debug_attachments(&self) -> Vec<Attachment> {
        self.memo.attachments()
    }

    /// Wrap any displayable value as an attachment
    pub fn attachment_for(value: &dyn fmt::Display, title: &str) -> Attachment {
        Attachment::for_value(value, title)
    }

    /// Release every subscription and the default connection.
    ///
    /// Durable subscriptions stay registered on the broker. Close failures are
    /// logged and ignored.
    pub async fn close(&self) {
        self.subscriptions.close_all().await;
        self.connections.close().await;
        info!("Message bridge closed");
    }

    async fn resolve(&self, name: &DestinationName) -> Result<Destination, BridgeError> {
        self.resolver
            .resolve_destination(name)
            .await
            .map_err(|e| {
                BridgeError::automation_caused_by(format!("Could not lookup destination {}", name), e)
            })
    }
}

async fn send_with(
    lease: &DefaultLease<'_>,
    producer: &dyn MessageProducer,
    envelope: &MessageEnvelope,
    name: &DestinationName,
) -> Result<MessageId, BridgeError> {
    lease.start().await?;
    let sent = producer
        .send(envelope)
        .await
        .map_err(|e| BridgeError::access(format!("Could not send message to {}", name), e));
    let stopped = lease.stop().await;

    let message_id = sent?;
    stopped?;
    Ok(message_id)
}

async fn receive_with(
    lease: &DefaultLease<'_>,
    consumer: &dyn MessageConsumer,
    timeout: ReceiveTimeout,
    name: &DestinationName,
) -> Result<Option<ReceivedMessage>, BridgeError> {
    lease.start().await?;
    let received = consumer
        .receive(timeout)
        .await
        .map_err(|e| BridgeError::access(format!("Could not receive from {}", name), e));
    let stopped = lease.stop().await;

    let message = received?;
    stopped?;
    Ok(message)
}

fn parse_selector(selector: Option<&str>) -> Result<Option<Selector>, BridgeError> {
    Selector::parse_optional(selector)
        .map_err(|e| BridgeError::automation_caused_by("Invalid message selector", e))
}

fn validate(accepted: bool, source: &str) -> Result<(), BridgeError> {
    if accepted {
        Ok(())
    } else {
        Err(BridgeError::ContentValidation {
            message: format!("message from {} was rejected by the validator", source),
        })
    }
}

fn unexpected_payload(expected: &str, source: &DestinationName, payload: &Payload) -> BridgeError {
    BridgeError::automation(format!(
        "Expected a {} message from {} but received a {} message",
        expected,
        source,
        payload.kind_name()
    ))
}

fn expect_text(message: ReceivedMessage) -> Result<String, BridgeError> {
    match message.payload {
        Payload::Text(text) => Ok(text),
        other => Err(unexpected_payload("text", &message.destination, &other)),
    }
}

fn expect_binary(message: ReceivedMessage) -> Result<Bytes, BridgeError> {
    match message.payload {
        Payload::Binary(bytes) => Ok(bytes),
        other => Err(unexpected_payload("binary", &message.destination, &other)),
    }
}

fn expect_object<T: DeserializeOwned>(message: ReceivedMessage) -> Result<T, BridgeError> {
    match message.payload {
        Payload::Object(value) => serde_json::from_value(value).map_err(|e| {
            BridgeError::automation_caused_by(
                format!(
                    "Object message from {} does not have the expected type",
                    message.destination
                ),
                e,
            )
        }),
        other => Err(unexpected_payload("object", &message.destination, &other)),
    }
}

/// Map a `file:` URI or a plain path to a filesystem path
fn file_path(file_uri: &str) -> PathBuf {
    match url::Url::parse(file_uri) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .unwrap_or_else(|_| PathBuf::from(url.path())),
        _ => PathBuf::from(file_uri),
    }
}
