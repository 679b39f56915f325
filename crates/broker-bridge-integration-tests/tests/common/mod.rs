//! Common test utilities for broker-bridge integration tests
//!
//! Every test gets its own `vm://` broker so tests can run in parallel without
//! seeing each other's queues or subscriptions.

use broker_bridge::{BridgeConfig, InMemoryBroker, MessageBridge, ReceiveTimeout};
use serde::{Deserialize, Serialize};

/// Configuration for a fresh, uniquely named in-memory broker
pub fn unique_config() -> BridgeConfig {
    BridgeConfig {
        provider_url: format!("vm://it-{}", uuid::Uuid::new_v4()),
        principal: Some("integration".to_string()),
        credential: Some("secret".to_string()),
        ..BridgeConfig::default()
    }
}

/// Open a bridge on the broker named by `config`
pub async fn bridge(config: &BridgeConfig) -> MessageBridge {
    MessageBridge::from_config(config)
        .await
        .expect("Failed to create bridge")
}

/// The broker behind `config`, for inspecting its state
#[allow(dead_code)]
pub fn broker(config: &BridgeConfig) -> InMemoryBroker {
    InMemoryBroker::for_url(&config.provider_url).expect("Failed to resolve broker")
}

#[allow(dead_code)]
pub fn millis(ms: i64) -> ReceiveTimeout {
    ReceiveTimeout::from_millis(ms)
}

/// Object payload shared by the tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(dead_code)]
pub struct Shipment {
    pub id: String,
    pub weight_kg: f64,
}
