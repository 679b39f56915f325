//! Integration tests for configuration loading and bridge construction

mod common;

use broker_bridge::{
    BridgeConfig, BridgeError, ConfigurationError, LogFormat, MessageBridge,
};
use std::io::Write;

/// Verify that the defaults point at the local in-memory broker
#[test]
fn test_default_config() {
    let config = BridgeConfig::default();

    assert_eq!(config.provider_url, "vm://localhost");
    assert_eq!(config.connection_factory_name, "ConnectionFactory");
    assert!(config.validate().is_ok());
    assert!(config.credentials().is_none());
}

/// Verify that a bridge can be built from a configuration file
#[tokio::test]
async fn test_bridge_from_config_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("Failed to create config file");
    writeln!(
        file,
        "provider_url = \"vm://it-config-file\"\nprincipal = \"reader\"\n\n[logging]\nformat = \"json\""
    )
    .expect("Failed to write config file");

    let config = BridgeConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.credentials().map(|c| c.principal().to_string()), Some("reader".to_string()));

    let bridge = MessageBridge::from_config(&config).await.unwrap();
    bridge.send_text("configured", "dynamicQueues/cfg").await.unwrap();
    bridge.close().await;
}

/// Verify that an unknown connection factory name is a configuration error
#[tokio::test]
async fn test_unknown_connection_factory() {
    let config = BridgeConfig {
        connection_factory_name: "Nope".to_string(),
        ..common::unique_config()
    };

    let result = MessageBridge::from_config(&config).await;

    assert!(matches!(
        result,
        Err(BridgeError::Configuration(
            ConfigurationError::ConnectionFactoryNotFound { .. }
        ))
    ));
}
