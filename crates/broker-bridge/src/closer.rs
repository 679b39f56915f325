//! Best-effort teardown of broker resources.
//!
//! Close failures are logged at debug level and otherwise ignored; the result
//! of the operation that owned the resource is what the caller sees.

use crate::client::{BrokerConnection, BrokerSession, MessageConsumer, MessageProducer};
use tracing::debug;

/// Close a producer, ignoring failures
pub async fn close_producer(producer: &dyn MessageProducer) {
    if let Err(e) = producer.close().await {
        debug!(error = %e, "Ignoring failure while closing producer");
    }
}

/// Close a consumer, ignoring failures
pub async fn close_consumer(consumer: &dyn MessageConsumer) {
    if let Err(e) = consumer.close().await {
        debug!(error = %e, "Ignoring failure while closing consumer");
    }
}

/// Close a session, ignoring failures
pub async fn close_session(session: &dyn BrokerSession) {
    if let Err(e) = session.close().await {
        debug!(error = %e, "Ignoring failure while closing session");
    }
}

/// Stop and close a connection, ignoring failures
pub async fn close_connection(connection: &dyn BrokerConnection) {
    if let Err(e) = connection.stop().await {
        debug!(client_id = %connection.client_id(), error = %e, "Ignoring failure while stopping connection");
    }
    if let Err(e) = connection.close().await {
        debug!(client_id = %connection.client_id(), error = %e, "Ignoring failure while closing connection");
    }
}
