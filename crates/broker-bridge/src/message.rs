//! Message types for bridge operations including core domain identifiers.

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Logical name of a queue or topic as known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DestinationName(String);

impl DestinationName {
    /// Create a destination name; surrounding whitespace is not significant
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    /// Get destination name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DestinationName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Caller-chosen key of a topic subscription.
///
/// Always non-empty; also part of the durable identity of the subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionName(String);

impl SubscriptionName {
    /// Create a subscription name, rejecting empty or blank names
    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return None;
        }
        Some(Self(name))
    }

    /// Get subscription name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier a connection presents to the broker.
///
/// Durable subscriptions are keyed by client id and subscription name, so the
/// id of a subscription connection must be reproducible across processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Deterministic id for the dedicated connection of one subscription
    pub fn for_subscription(principal: &str, component: &str, seed: &str) -> Self {
        Self(format!("{}@{}[{}]", principal, component, seed))
    }

    /// Process-unique id for a shared default connection
    pub fn unique(principal: &str, component: &str) -> Self {
        Self(format!(
            "{}@{}#{}",
            principal,
            component,
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Get client id as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier assigned to a message when it is sent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(format!("ID:{}", uuid::Uuid::new_v4()))
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Receive Timeout
// ============================================================================

/// Upper bound on how long a receive may wait for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveTimeout {
    /// Wait until a message arrives
    Indefinite,
    /// Wait at most this long
    Bounded(Duration),
}

impl ReceiveTimeout {
    /// Convert a millisecond count where `0` and negative values mean "no timeout"
    pub fn from_millis(millis: i64) -> Self {
        if millis <= 0 {
            Self::Indefinite
        } else {
            Self::Bounded(Duration::from_millis(millis as u64))
        }
    }

    /// Get the bound, if any
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Indefinite => None,
            Self::Bounded(duration) => Some(*duration),
        }
    }
}

impl From<Duration> for ReceiveTimeout {
    fn from(duration: Duration) -> Self {
        Self::Bounded(duration)
    }
}

impl fmt::Display for ReceiveTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indefinite => write!(f, "an unbounded wait"),
            Self::Bounded(duration) => write!(f, "the timeout of {} ms", duration.as_millis()),
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

/// Typed value of a user-defined message property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Long(value) => write!(f, "{}", value),
            Self::Double(value) => write!(f, "{}", value),
            Self::String(value) => write!(f, "{}", value),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Long(value.into())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// String-keyed message properties used for selector filtering
pub type PropertyMap = BTreeMap<String, PropertyValue>;

// ============================================================================
// Payloads
// ============================================================================

/// Body of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Text(String),
    #[serde(with = "bytes_serde")]
    Binary(Bytes),
    /// Opaque serialized object
    Object(serde_json::Value),
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Payload {
    /// Short name of the payload variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Object(_) => "object",
        }
    }

    /// Safe textual representation: text verbatim, binary as base64, objects as JSON
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Binary(bytes) => general_purpose::STANDARD.encode(bytes),
            Self::Object(value) => value.to_string(),
        }
    }
}

/// A message to be sent: payload plus selector-visible properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub payload: Payload,
    pub properties: PropertyMap,
}

impl MessageEnvelope {
    /// Create envelope with payload and no properties
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            properties: PropertyMap::new(),
        }
    }

    /// Create text envelope
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Payload::Text(text.into()))
    }

    /// Create binary envelope
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Self::new(Payload::Binary(bytes.into()))
    }

    /// Create object envelope from an already serialized value
    pub fn object(value: serde_json::Value) -> Self {
        Self::new(Payload::Object(value))
    }

    /// Add a property (builder pattern)
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add a property in place
    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }
}

/// A message delivered by a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub destination: DestinationName,
    pub payload: Payload,
    pub properties: PropertyMap,
    pub sent_at: Timestamp,
}

impl ReceivedMessage {
    /// Look up a property by name
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Convert back to an envelope, e.g. for forwarding
    pub fn envelope(&self) -> MessageEnvelope {
        MessageEnvelope {
            payload: self.payload.clone(),
            properties: self.properties.clone(),
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
