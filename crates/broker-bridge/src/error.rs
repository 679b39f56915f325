//! Error types for bridge and broker-client operations.
//!
//! Two layers are kept apart:
//! - [`BrokerError`] is what the broker client traits in [`crate::client`] report.
//! - [`BridgeError`] is what the [`MessageBridge`](crate::MessageBridge) facade
//!   surfaces to callers, classified into the five [`ErrorKind`]s test frameworks
//!   rely on to tell "no message" from "bad message" from "broken setup".

use crate::message::ReceiveTimeout;
use thiserror::Error;

/// Boxed error source for failures that originate outside the broker client
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a [`BridgeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Broker unreachable, bad credentials, bad configuration. Fatal.
    Technical,
    /// Misuse of the bridge by the calling code.
    Automation,
    /// I/O-level failure during send, receive or resource read.
    Access,
    /// A receive that required a message did not get one in time.
    RequiredDelivery,
    /// A message arrived but failed the caller's validation.
    ContentValidation,
}

/// Error type for all [`MessageBridge`](crate::MessageBridge) operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Technical error: {message}")]
    Technical {
        message: String,
        #[source]
        source: Option<BrokerError>,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Automation error: {message}")]
    Automation {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Access failure: {message}")]
    Access {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("{source_name} did not deliver a message within {timeout}")]
    RequiredDelivery {
        source_name: String,
        timeout: ReceiveTimeout,
    },

    #[error("Message invalid: {message}")]
    ContentValidation { message: String },
}

impl BridgeError {
    pub(crate) fn technical(message: impl Into<String>, source: BrokerError) -> Self {
        Self::Technical {
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn automation(message: impl Into<String>) -> Self {
        Self::Automation {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn automation_caused_by(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Automation {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub(crate) fn access(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Access {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Get the classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Technical { .. } => ErrorKind::Technical,
            Self::Configuration(_) => ErrorKind::Technical,
            Self::Automation { .. } => ErrorKind::Automation,
            Self::Access { .. } => ErrorKind::Access,
            Self::RequiredDelivery { .. } => ErrorKind::RequiredDelivery,
            Self::ContentValidation { .. } => ErrorKind::ContentValidation,
        }
    }

    /// Check if the failure is plausibly transient.
    ///
    /// The bridge never retries on its own; this is a hint for callers.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Access)
    }

    /// Check if this is a timed-out required receive
    pub fn is_required_delivery(&self) -> bool {
        matches!(self, Self::RequiredDelivery { .. })
    }

    /// Check if this is a rejected message payload
    pub fn is_content_validation(&self) -> bool {
        matches!(self, Self::ContentValidation { .. })
    }
}

/// Errors reported by broker client implementations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Name not found in directory: {name}")]
    NotFound { name: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed for principal '{principal}'")]
    AuthenticationFailed { principal: String },

    #[error("Client id '{client_id}' rejected: {message}")]
    InvalidClientId { client_id: String, message: String },

    #[error("Invalid destination '{name}': {message}")]
    InvalidDestination { name: String, message: String },

    #[error("Invalid selector: {0}")]
    InvalidSelector(#[from] SelectorError),

    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    #[error("{resource} is closed")]
    Closed { resource: String },
}

impl BrokerError {
    /// Check if the error means a directory lookup found nothing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },

    #[error("Unsupported directory factory '{identifier}'")]
    UnsupportedDirectory { identifier: String },

    #[error("Connection factory '{name}' could not be found")]
    ConnectionFactoryNotFound { name: String },
}

/// Errors raised while parsing a message selector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },

    #[error("unterminated string literal starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("invalid numeric literal '{literal}'")]
    InvalidNumber { literal: String },

    #[error("expected {expected} but found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("invalid LIKE pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
