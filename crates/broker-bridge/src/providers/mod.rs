//! Broker client implementations.
//!
//! This module contains concrete implementations of the broker client traits
//! in [`crate::client`].

pub mod memory;

pub use memory::{
    InMemoryBroker, InMemoryConnection, InMemoryConsumer, InMemoryProducer, InMemorySession,
    DEFAULT_CONNECTION_FACTORY, DYNAMIC_QUEUE_PREFIX, DYNAMIC_TOPIC_PREFIX,
};
