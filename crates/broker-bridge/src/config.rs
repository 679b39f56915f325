//! Bridge configuration.
//!
//! Configuration is layered with the `config` crate: an optional file (format
//! taken from its extension) overridden by `BRIDGE__*` environment variables,
//! e.g. `BRIDGE__PROVIDER_URL` or `BRIDGE__LOGGING__LEVEL`.

use crate::client::Credentials;
use crate::error::ConfigurationError;
use crate::logging::LoggingConfig;
use crate::providers::DEFAULT_CONNECTION_FACTORY;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix of environment variables read by [`BridgeConfig::load`]
pub const ENV_PREFIX: &str = "BRIDGE";

/// Kind of directory the bridge resolves destinations with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryFactoryKind {
    /// The in-process broker, addressed by `vm://` provider URLs
    InMemory,
}

impl FromStr for DirectoryFactoryKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in-memory" | "inmemory" | "memory" => Ok(Self::InMemory),
            _ => Err(ConfigurationError::UnsupportedDirectory {
                identifier: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for DirectoryFactoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => write!(f, "in-memory"),
        }
    }
}

/// Configuration consumed when constructing a [`MessageBridge`](crate::MessageBridge)
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directory factory identifier, e.g. `in-memory`
    pub directory_factory: String,
    /// Broker location, e.g. `vm://localhost`
    pub provider_url: String,
    /// Logical name of the connection factory in the directory
    pub connection_factory_name: String,
    pub principal: Option<String>,
    pub credential: Option<String>,
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            directory_factory: DirectoryFactoryKind::InMemory.to_string(),
            provider_url: "vm://localhost".to_string(),
            connection_factory_name: DEFAULT_CONNECTION_FACTORY.to_string(),
            principal: None,
            credential: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("directory_factory", &self.directory_factory)
            .field("provider_url", &self.provider_url)
            .field("connection_factory_name", &self.connection_factory_name)
            .field("principal", &self.principal)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("logging", &self.logging)
            .finish()
    }
}

impl BridgeConfig {
    /// Load configuration from an optional file and the environment, then validate it
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Check required fields and the principal/credential pairing
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (key, value) in [
            ("directory_factory", &self.directory_factory),
            ("provider_url", &self.provider_url),
            ("connection_factory_name", &self.connection_factory_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigurationError::Missing {
                    key: key.to_string(),
                });
            }
        }

        if self.credential.is_some() && self.principal.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigurationError::Invalid {
                message: "a credential requires a principal".to_string(),
            });
        }

        self.directory_kind()?;
        Ok(())
    }

    /// Parsed directory factory identifier
    pub fn directory_kind(&self) -> Result<DirectoryFactoryKind, ConfigurationError> {
        self.directory_factory.parse()
    }

    /// Credentials for broker connections; `None` when no principal is configured
    pub fn credentials(&self) -> Option<Credentials> {
        self.principal
            .as_ref()
            .filter(|principal| !principal.is_empty())
            .map(|principal| {
                Credentials::new(principal.clone(), self.credential.clone().unwrap_or_default())
            })
    }
}
