//! Connection management for the bridge.
//!
//! The [`ConnectionManager`] owns the default connection and session shared by
//! all queue operations of one bridge, and opens the dedicated connections used
//! by topic subscriptions.
//!
//! The default session is not safe for concurrent use by two logical
//! operations, so queue operations go through [`ConnectionManager::lease`],
//! which holds a per-bridge serialization lock for the duration of the
//! operation.

use crate::client::{BrokerConnection, BrokerSession, ConnectionFactory, Credentials};
use crate::closer;
use crate::error::BridgeError;
use crate::message::ClientId;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;

/// Component name embedded in every client id
pub const COMPONENT_NAME: &str = "MessageBridge";

/// Principal used in client ids when no credentials are configured
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

/// Owns the default connection/session pair and creates dedicated connections
pub struct ConnectionManager {
    factory: Arc<dyn ConnectionFactory>,
    credentials: Option<Credentials>,
    default_connection: RwLock<Option<Arc<dyn BrokerConnection>>>,
    default_session: RwLock<Option<Arc<dyn BrokerSession>>>,
    operation_lock: Mutex<()>,
}

impl ConnectionManager {
    /// Create a manager; no connection is opened until first use
    pub fn new(factory: Arc<dyn ConnectionFactory>, credentials: Option<Credentials>) -> Self {
        Self {
            factory,
            credentials,
            default_connection: RwLock::new(None),
            default_session: RwLock::new(None),
            operation_lock: Mutex::new(()),
        }
    }

    /// Principal embedded in client ids
    pub fn principal(&self) -> &str {
        self.credentials
            .as_ref()
            .map(Credentials::principal)
            .unwrap_or(ANONYMOUS_PRINCIPAL)
    }

    /// Get the default connection, creating it on first use.
    ///
    /// At most one default connection is created even under concurrent first use.
    pub async fn get_or_create_default_connection(
        &self,
    ) -> Result<Arc<dyn BrokerConnection>, BridgeError> {
        // First check with read lock
        {
            let connection = self.default_connection.read().await;
            if let Some(connection) = connection.as_ref() {
                return Ok(Arc::clone(connection));
            }
        }

        let mut slot = self.default_connection.write().await;

        // Double-check: another task might have created it
        if let Some(connection) = slot.as_ref() {
            return Ok(Arc::clone(connection));
        }

        let client_id = ClientId::unique(self.principal(), COMPONENT_NAME);
        let connection = self.open(&client_id).await?;
        info!(client_id = %client_id, "Default connection created");
        *slot = Some(Arc::clone(&connection));

        Ok(connection)
    }

    /// Get the session bound to the default connection, creating it on first use
    pub async fn get_or_create_default_session(
        &self,
    ) -> Result<Arc<dyn BrokerSession>, BridgeError> {
        {
            let session = self.default_session.read().await;
            if let Some(session) = session.as_ref() {
                return Ok(Arc::clone(session));
            }
        }

        let mut slot = self.default_session.write().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }

        let connection = self.get_or_create_default_connection().await?;
        let session = connection
            .create_session()
            .await
            .map_err(|e| BridgeError::access("Could not create session", e))?;
        *slot = Some(Arc::clone(&session));

        Ok(session)
    }

    /// Open a fresh connection whose client id is derived from `seed`.
    ///
    /// The id is `principal@MessageBridge[seed]`, so the same seed always
    /// yields the same broker-side identity.
    pub async fn create_dedicated_connection(
        &self,
        seed: &str,
    ) -> Result<Arc<dyn BrokerConnection>, BridgeError> {
        let client_id = ClientId::for_subscription(self.principal(), COMPONENT_NAME, seed);
        let connection = self.open(&client_id).await?;
        debug!(client_id = %client_id, "Dedicated connection created");
        Ok(connection)
    }

    /// Resume delivery on the default connection
    pub async fn start(&self) -> Result<(), BridgeError> {
        let connection = self.get_or_create_default_connection().await?;
        start_connection(connection.as_ref()).await
    }

    /// Pause delivery on the default connection
    pub async fn stop(&self) -> Result<(), BridgeError> {
        let connection = self.get_or_create_default_connection().await?;
        stop_connection(connection.as_ref()).await
    }

    /// Take exclusive use of the default session for one queue operation
    pub async fn lease(&self) -> Result<DefaultLease<'_>, BridgeError> {
        let guard = self.operation_lock.lock().await;
        let session = self.get_or_create_default_session().await?;
        let connection = self.get_or_create_default_connection().await?;

        Ok(DefaultLease {
            _guard: guard,
            connection,
            session,
        })
    }

    /// Check whether the default connection has been created
    pub async fn has_default_connection(&self) -> bool {
        self.default_connection.read().await.is_some()
    }

    /// Close the default session and connection.
    ///
    /// Does not wait for a queue operation holding the lease; that operation
    /// fails once its connection is gone. Failures are logged and ignored. A
    /// later operation opens a new default connection.
    pub async fn close(&self) {
        if let Some(session) = self.default_session.write().await.take() {
            closer::close_session(session.as_ref()).await;
        }
        if let Some(connection) = self.default_connection.write().await.take() {
            closer::close_connection(connection.as_ref()).await;
            info!(client_id = %connection.client_id(), "Default connection closed");
        }
    }

    async fn open(&self, client_id: &ClientId) -> Result<Arc<dyn BrokerConnection>, BridgeError> {
        self.factory
            .create_connection(client_id, self.credentials.as_ref())
            .await
            .map_err(|e| {
                BridgeError::technical(
                    format!("Could not create connection for client '{}'", client_id),
                    e,
                )
            })
    }
}

/// Exclusive use of the default connection and session
pub struct DefaultLease<'a> {
    _guard: MutexGuard<'a, ()>,
    connection: Arc<dyn BrokerConnection>,
    session: Arc<dyn BrokerSession>,
}

impl DefaultLease<'_> {
    pub fn session(&self) -> &dyn BrokerSession {
        self.session.as_ref()
    }

    /// Resume delivery on the default connection
    pub async fn start(&self) -> Result<(), BridgeError> {
        start_connection(self.connection.as_ref()).await
    }

    /// Pause delivery on the default connection
    pub async fn stop(&self) -> Result<(), BridgeError> {
        stop_connection(self.connection.as_ref()).await
    }
}

pub(crate) async fn start_connection(connection: &dyn BrokerConnection) -> Result<(), BridgeError> {
    connection.start().await.map_err(|e| {
        BridgeError::automation_caused_by(
            format!("Could not start connection '{}'", connection.client_id()),
            e,
        )
    })
}

pub(crate) async fn stop_connection(connection: &dyn BrokerConnection) -> Result<(), BridgeError> {
    connection.stop().await.map_err(|e| {
        BridgeError::automation_caused_by(
            format!("Could not stop connection '{}'", connection.client_id()),
            e,
        )
    })
}
