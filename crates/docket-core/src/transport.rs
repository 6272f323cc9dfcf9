//! Transport seam.
//!
//! The pipeline talks to the notification server through these traits only.
//! `docket-infrastructure` provides the concrete connectors.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::event::RawEvent;

/// Parameters of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Base URL joined with the namespace path.
    pub url: String,
    /// The connection is scoped to this user (server-side room membership).
    pub user_id: String,
}

/// A freshly established connection: the outbound side plus the ordered
/// stream of inbound events. The stream ends when the connection drops.
pub struct ConnectionParts {
    pub connection: Arc<dyn Connection>,
    pub inbound: mpsc::UnboundedReceiver<RawEvent>,
}

/// One live duplex connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Current transport state. Callers must not cache it.
    fn is_connected(&self) -> bool;

    /// Sends one event. Fails if the connection is down.
    async fn send(&self, event: RawEvent) -> Result<()>;

    /// Closes the connection. Safe to call more than once.
    async fn close(&self);
}

/// Establishes connections to the notification server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> Result<ConnectionParts>;
}
