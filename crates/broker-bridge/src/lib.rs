//! # Broker Bridge
//!
//! Stateful message-broker client facade for test automation.
//!
//! This library provides:
//! - Send of text, object, binary and file-sourced messages to queues and topics
//! - Timeout-bounded queue receives where a missing message is a failure
//! - Named topic subscriptions, durable or not, each on its own connection
//! - Selector-based filtering on user-defined message properties
//! - A five-kind error taxonomy separating "no message" from "bad message"
//!   from "broken setup"
//! - An in-process broker for tests and local development
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for bridge and broker-client operations
//! - [`message`] - Identifiers, payloads, envelopes and timeouts
//! - [`selector`] - Message selector parsing and evaluation
//! - [`client`] - Broker client traits
//! - [`providers`] - Broker client implementations
//! - [`connection`] - Default and dedicated connection management
//! - [`subscriptions`] - Topic subscription registry
//! - [`bridge`] - The [`MessageBridge`] facade
//! - [`actions`] - Action-word helpers over the facade
//! - [`config`] / [`logging`] - Configuration and tracing setup

// Module declarations
pub mod actions;
pub mod bridge;
pub mod client;
pub mod closer;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod memo;
pub mod message;
pub mod providers;
pub mod selector;
pub mod subscriptions;

// Re-export commonly used types at crate root for convenience
pub use bridge::MessageBridge;
pub use client::{
    BrokerConnection, BrokerSession, ConnectionFactory, Credentials, Destination,
    DestinationKind, DirectoryResolver, MessageConsumer, MessageProducer,
};
pub use config::{BridgeConfig, DirectoryFactoryKind};
pub use error::{BridgeError, BrokerError, ConfigurationError, ErrorKind, SelectorError};
pub use logging::{init_tracing, LogFormat, LoggingConfig};
pub use memo::Attachment;
pub use message::{
    ClientId, DestinationName, MessageEnvelope, MessageId, Payload, PropertyMap, PropertyValue,
    ReceiveTimeout, ReceivedMessage, SubscriptionName, Timestamp,
};
pub use providers::InMemoryBroker;
pub use selector::Selector;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
