//! Tests for error types.

use super::*;
use std::time::Duration;

#[test]
fn test_error_kinds() {
    assert_eq!(
        BridgeError::technical(
            "no broker",
            BrokerError::ConnectionFailed {
                message: "refused".to_string()
            }
        )
        .kind(),
        ErrorKind::Technical
    );
    assert_eq!(
        BridgeError::from(ConfigurationError::Missing {
            key: "provider_url".to_string()
        })
        .kind(),
        ErrorKind::Technical
    );
    assert_eq!(
        BridgeError::automation("empty subscription name").kind(),
        ErrorKind::Automation
    );
    assert_eq!(
        BridgeError::access(
            "file access failed",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone")
        )
        .kind(),
        ErrorKind::Access
    );
    assert_eq!(
        BridgeError::RequiredDelivery {
            source_name: "Q".to_string(),
            timeout: ReceiveTimeout::Bounded(Duration::from_millis(50)),
        }
        .kind(),
        ErrorKind::RequiredDelivery
    );
    assert_eq!(
        BridgeError::ContentValidation {
            message: "bad".to_string()
        }
        .kind(),
        ErrorKind::ContentValidation
    );
}

#[test]
fn test_only_access_failures_are_transient() {
    assert!(BridgeError::access(
        "could not send",
        BrokerError::Closed {
            resource: "producer".to_string()
        }
    )
    .is_transient());
    assert!(!BridgeError::automation("misuse").is_transient());
    assert!(!BridgeError::RequiredDelivery {
        source_name: "Q".to_string(),
        timeout: ReceiveTimeout::Indefinite,
    }
    .is_transient());
}

#[test]
fn test_required_delivery_message_names_source_and_timeout() {
    let error = BridgeError::RequiredDelivery {
        source_name: "Destination Q".to_string(),
        timeout: ReceiveTimeout::Bounded(Duration::from_millis(50)),
    };

    assert!(error.is_required_delivery());
    assert!(!error.is_content_validation());
    assert_eq!(
        error.to_string(),
        "Destination Q did not deliver a message within the timeout of 50 ms"
    );
}

#[test]
fn test_automation_error_keeps_source() {
    use std::error::Error as _;

    let error = BridgeError::automation_caused_by(
        "Could not lookup destination Q",
        BrokerError::NotFound {
            name: "Q".to_string(),
        },
    );

    let source = error.source().expect("source should be kept");
    assert_eq!(source.to_string(), "Name not found in directory: Q");
}

#[test]
fn test_broker_not_found_detection() {
    assert!(BrokerError::NotFound {
        name: "x".to_string()
    }
    .is_not_found());
    assert!(!BrokerError::IllegalState {
        message: "x".to_string()
    }
    .is_not_found());
}
