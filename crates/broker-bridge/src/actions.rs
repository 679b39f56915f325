//! Action-word helpers over a [`MessageBridge`].
//!
//! Each helper holds a reference to the bridge plus the identity of what it
//! acts on (a queue, or a named subscription), so test steps can be written as
//!
//! ```no_run
//! # use broker_bridge::{MessageBridge, ReceiveTimeout};
//! # use broker_bridge::actions::{QueueReceiver, QueueSender};
//! # async fn step(bridge: &MessageBridge) -> Result<(), broker_bridge::BridgeError> {
//! QueueSender::new(bridge, "dynamicQueues/orders")
//!     .with_property("region", "EU")
//!     .text("hello")
//!     .await?;
//!
//! let text = QueueReceiver::new(bridge, "dynamicQueues/orders", ReceiveTimeout::from_millis(1000))
//!     .with_selector("region = 'EU'")
//!     .text()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::bridge::MessageBridge;
use crate::error::BridgeError;
use crate::message::{MessageEnvelope, MessageId, Payload, PropertyMap, PropertyValue, ReceiveTimeout};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
#[path = "actions_tests.rs"]
mod tests;

// ============================================================================
// QueueSender
// ============================================================================

/// Sends to one destination, optionally attaching the same properties to every message
pub struct QueueSender<'a> {
    bridge: &'a MessageBridge,
    destination: String,
    properties: PropertyMap,
}

impl<'a> QueueSender<'a> {
    pub fn new(bridge: &'a MessageBridge, destination: impl Into<String>) -> Self {
        Self {
            bridge,
            destination: destination.into(),
            properties: PropertyMap::new(),
        }
    }

    /// Add a property to every message sent by this sender
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub async fn text(&self, text: &str) -> Result<MessageId, BridgeError> {
        if self.properties.is_empty() {
            self.bridge.send_text(text, &self.destination).await
        } else {
            self.send(Payload::Text(text.to_string())).await
        }
    }

    pub async fn object<T: Serialize + ?Sized>(&self, value: &T) -> Result<MessageId, BridgeError> {
        if self.properties.is_empty() {
            return self.bridge.send_object(value, &self.destination).await;
        }

        let value = serde_json::to_value(value).map_err(|e| {
            BridgeError::automation_caused_by("Object could not be serialized", e)
        })?;
        self.send(Payload::Object(value)).await
    }

    pub async fn binary(&self, bytes: impl Into<Bytes>) -> Result<MessageId, BridgeError> {
        if self.properties.is_empty() {
            self.bridge.send_binary(bytes, &self.destination).await
        } else {
            self.send(Payload::Binary(bytes.into())).await
        }
    }

    /// Send a file as text; returns the content sent
    pub async fn file_as_text(&self, file_uri: &str) -> Result<String, BridgeError> {
        self.bridge
            .send_file_with_properties(file_uri, self.properties.clone(), &self.destination)
            .await
    }

    /// Send a file as binary; returns the content sent, base64-encoded.
    ///
    /// Sender properties are not attached to binary file messages.
    pub async fn file_as_binary(&self, file_uri: &str) -> Result<String, BridgeError> {
        self.bridge
            .send_file_as_binary(file_uri, &self.destination)
            .await
    }

    async fn send(&self, payload: Payload) -> Result<MessageId, BridgeError> {
        let envelope = MessageEnvelope {
            payload,
            properties: self.properties.clone(),
        };
        self.bridge
            .send_with_properties(envelope, &self.destination)
            .await
    }
}

// ============================================================================
// QueueReceiver
// ============================================================================

/// Receives from one queue; every receive requires a message
pub struct QueueReceiver<'a> {
    bridge: &'a MessageBridge,
    destination: String,
    selector: Option<String>,
    timeout: ReceiveTimeout,
}

impl<'a> QueueReceiver<'a> {
    pub fn new(
        bridge: &'a MessageBridge,
        destination: impl Into<String>,
        timeout: ReceiveTimeout,
    ) -> Self {
        Self {
            bridge,
            destination: destination.into(),
            selector: None,
            timeout,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub async fn text(&self) -> Result<String, BridgeError> {
        self.bridge
            .receive_text_from_queue(&self.destination, self.selector.as_deref(), self.timeout)
            .await
    }

    pub async fn object<T: DeserializeOwned>(&self) -> Result<T, BridgeError> {
        self.bridge
            .receive_object_from_queue(&self.destination, self.selector.as_deref(), self.timeout)
            .await
    }

    pub async fn binary(&self) -> Result<Bytes, BridgeError> {
        self.bridge
            .receive_binary_from_queue(&self.destination, self.selector.as_deref(), self.timeout)
            .await
    }

    pub async fn text_matching<F>(&self, validator: F) -> Result<String, BridgeError>
    where
        F: FnOnce(&str) -> bool,
    {
        self.bridge
            .receive_text_from_queue_and_validate(
                &self.destination,
                self.selector.as_deref(),
                self.timeout,
                validator,
            )
            .await
    }

    pub async fn object_matching<T, F>(&self, validator: F) -> Result<T, BridgeError>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> bool,
    {
        self.bridge
            .receive_object_from_queue_and_validate(
                &self.destination,
                self.selector.as_deref(),
                self.timeout,
                validator,
            )
            .await
    }
}

// ============================================================================
// TopicSubscriber
// ============================================================================

/// Manages and reads one named topic subscription
pub struct TopicSubscriber<'a> {
    bridge: &'a MessageBridge,
    subscription: String,
    destination: String,
    selector: Option<String>,
    durable: bool,
}

impl<'a> TopicSubscriber<'a> {
    pub fn new(
        bridge: &'a MessageBridge,
        subscription: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            bridge,
            subscription: subscription.into(),
            destination: destination.into(),
            selector: None,
            durable: false,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub async fn start(&self) -> Result<(), BridgeError> {
        self.bridge
            .start_subscriber(
                &self.subscription,
                &self.destination,
                self.selector.as_deref(),
                self.durable,
            )
            .await
    }

    pub async fn stop(&self) -> Result<(), BridgeError> {
        self.bridge.stop_subscriber(&self.subscription).await
    }

    pub async fn unsubscribe(&self) -> Result<(), BridgeError> {
        self.bridge.unsubscribe(&self.subscription).await
    }

    pub async fn text(
        &self,
        timeout: ReceiveTimeout,
        required: bool,
    ) -> Result<Option<String>, BridgeError> {
        self.bridge
            .receive_text_from_topic(&self.subscription, None, timeout, required)
            .await
    }

    pub async fn object<T: DeserializeOwned>(
        &self,
        timeout: ReceiveTimeout,
        required: bool,
    ) -> Result<Option<T>, BridgeError> {
        self.bridge
            .receive_object_from_topic(&self.subscription, None, timeout, required)
            .await
    }

    pub async fn binary(
        &self,
        timeout: ReceiveTimeout,
        required: bool,
    ) -> Result<Option<Bytes>, BridgeError> {
        self.bridge
            .receive_binary_from_topic(&self.subscription, None, timeout, required)
            .await
    }

    pub async fn text_matching<F>(
        &self,
        timeout: ReceiveTimeout,
        required: bool,
        validator: F,
    ) -> Result<Option<String>, BridgeError>
    where
        F: FnOnce(Option<&str>) -> bool,
    {
        self.bridge
            .receive_text_from_topic_and_validate(
                &self.subscription,
                None,
                timeout,
                required,
                validator,
            )
            .await
    }

    pub async fn object_matching<T, F>(
        &self,
        timeout: ReceiveTimeout,
        required: bool,
        validator: F,
    ) -> Result<Option<T>, BridgeError>
    where
        T: DeserializeOwned,
        F: FnOnce(Option<&T>) -> bool,
    {
        self.bridge
            .receive_object_from_topic_and_validate(
                &self.subscription,
                None,
                timeout,
                required,
                validator,
            )
            .await
    }
}
