//! In-process loopback transport.
//!
//! `LoopbackServer` plays the notification server: it accepts connections
//! from a [`LoopbackConnector`], pushes events to connected users, records
//! everything the clients emit and can simulate drops and refusals. The
//! replay tool runs on it, and the application tests use it as their
//! transport fake.

use async_trait::async_trait;
use docket_core::event::RawEvent;
use docket_core::transport::{ConnectRequest, Connection, ConnectionParts, Connector};
use docket_core::{DocketError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// An event a client sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub connection_id: u64,
    pub user_id: String,
    pub event: RawEvent,
}

struct Link {
    user_id: String,
    connected: Arc<AtomicBool>,
    inbound: mpsc::UnboundedSender<RawEvent>,
}

#[derive(Default)]
struct ServerState {
    links: HashMap<u64, Link>,
    emitted: Vec<Emitted>,
    refusing: bool,
    connect_delay: Option<Duration>,
    /// Sends that fail even on a live connection.
    failing_sends: usize,
}

struct ServerInner {
    state: Mutex<ServerState>,
    next_id: AtomicU64,
    connect_attempts: AtomicUsize,
}

impl ServerInner {
    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unlink(&self, id: u64) {
        if let Some(link) = self.lock().links.remove(&id) {
            link.connected.store(false, Ordering::Release);
        }
    }
}

/// Simulated notification server.
#[derive(Clone)]
pub struct LoopbackServer {
    inner: Arc<ServerInner>,
}

impl LoopbackServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                state: Mutex::new(ServerState::default()),
                next_id: AtomicU64::new(1),
                connect_attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// A connector whose connections terminate at this server.
    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector {
            server: self.clone(),
        }
    }

    /// Delivers `event` to every live connection of `user_id`.
    /// Returns how many connections received it.
    pub fn push(&self, user_id: &str, event: RawEvent) -> usize {
        let state = self.inner.lock();
        let mut delivered = 0;
        for link in state.links.values().filter(|link| link.user_id == user_id) {
            if link.inbound.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(
            "[Loopback] Pushed '{}' to {} connection(s) of {}",
            event.name, delivered, user_id
        );
        delivered
    }

    /// Delivers `event` to every live connection.
    pub fn broadcast(&self, event: RawEvent) -> usize {
        let state = self.inner.lock();
        state
            .links
            .values()
            .filter(|link| link.inbound.send(event.clone()).is_ok())
            .count()
    }

    /// Drops every live connection, as a network failure would.
    /// Returns how many were dropped.
    pub fn drop_connections(&self) -> usize {
        let links: Vec<Link> = self.inner.lock().links.drain().map(|(_, l)| l).collect();
        for link in &links {
            link.connected.store(false, Ordering::Release);
        }
        if !links.is_empty() {
            info!("[Loopback] Dropped {} connection(s)", links.len());
        }
        links.len()
    }

    /// While set, connection attempts fail with a transport error.
    pub fn set_refusing(&self, refusing: bool) {
        self.inner.lock().refusing = refusing;
    }

    /// Makes every connection attempt wait `delay` before completing.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.inner.lock().connect_delay = delay;
    }

    /// Makes the next `count` sends fail even on a live connection.
    pub fn fail_next_sends(&self, count: usize) {
        self.inner.lock().failing_sends = count;
    }

    pub fn live_connections(&self) -> usize {
        self.inner.lock().links.len()
    }

    pub fn live_connections_for(&self, user_id: &str) -> usize {
        self.inner
            .lock()
            .links
            .values()
            .filter(|link| link.user_id == user_id)
            .count()
    }

    /// Connection attempts so far, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::Acquire)
    }

    /// Everything clients have sent, in order.
    pub fn emitted(&self) -> Vec<Emitted> {
        self.inner.lock().emitted.clone()
    }

    /// Sent events with the given name.
    pub fn emitted_named(&self, name: &str) -> Vec<Emitted> {
        self.inner
            .lock()
            .emitted
            .iter()
            .filter(|emitted| emitted.event.name == name)
            .cloned()
            .collect()
    }

    pub fn clear_emitted(&self) {
        self.inner.lock().emitted.clear();
    }

    async fn accept(&self, request: &ConnectRequest) -> Result<ConnectionParts> {
        self.inner.connect_attempts.fetch_add(1, Ordering::AcqRel);

        let delay = self.inner.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock();
        if state.refusing {
            return Err(DocketError::transport(format!(
                "connection to {} refused",
                request.url
            )));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        let connected = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();
        state.links.insert(
            id,
            Link {
                user_id: request.user_id.clone(),
                connected: connected.clone(),
                inbound: tx,
            },
        );
        drop(state);

        info!(
            "[Loopback] Accepted connection #{} for {} ({})",
            id, request.user_id, request.url
        );
        Ok(ConnectionParts {
            connection: Arc::new(LoopbackConnection {
                id,
                user_id: request.user_id.clone(),
                connected,
                server: self.inner.clone(),
            }),
            inbound: rx,
        })
    }
}

impl Default for LoopbackServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Connects to a [`LoopbackServer`].
#[derive(Clone)]
pub struct LoopbackConnector {
    server: LoopbackServer,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<ConnectionParts> {
        self.server.accept(request).await
    }
}

struct LoopbackConnection {
    id: u64,
    user_id: String,
    connected: Arc<AtomicBool>,
    server: Arc<ServerInner>,
}

#[async_trait]
impl Connection for LoopbackConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send(&self, event: RawEvent) -> Result<()> {
        let mut state = self.server.lock();
        if !self.is_connected() {
            return Err(DocketError::NotConnected);
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(DocketError::transport(format!(
                "send of '{}' failed",
                event.name
            )));
        }
        state.emitted.push(Emitted {
            connection_id: self.id,
            user_id: self.user_id.clone(),
            event,
        });
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.server.unlink(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(user_id: &str) -> ConnectRequest {
        ConnectRequest {
            url: "loopback://test/chat".to_string(),
            user_id: user_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_push_reaches_only_that_user() {
        let server = LoopbackServer::new();
        let connector = server.connector();
        let mut alice = connector.connect(&request("alice")).await.unwrap();
        let mut bob = connector.connect(&request("bob")).await.unwrap();

        let event = RawEvent::new("email_count_update", json!({ "unread_count": 2 }));
        assert_eq!(server.push("alice", event.clone()), 1);

        assert_eq!(alice.inbound.recv().await, Some(event));
        assert!(bob.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_records_and_close_unlinks() {
        let server = LoopbackServer::new();
        let parts = server.connector().connect(&request("alice")).await.unwrap();
        assert_eq!(server.live_connections(), 1);

        let event = RawEvent::new("request_email_count", json!({ "user_id": "alice" }));
        parts.connection.send(event.clone()).await.unwrap();
        assert_eq!(server.emitted_named("request_email_count").len(), 1);

        parts.connection.close().await;
        assert!(!parts.connection.is_connected());
        assert_eq!(server.live_connections(), 0);
        assert_eq!(
            parts.connection.send(event).await,
            Err(DocketError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_drop_ends_inbound_stream() {
        let server = LoopbackServer::new();
        let mut parts = server.connector().connect(&request("alice")).await.unwrap();

        assert_eq!(server.drop_connections(), 1);
        assert!(!parts.connection.is_connected());
        assert_eq!(parts.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_refusing_server() {
        let server = LoopbackServer::new();
        server.set_refusing(true);

        let err = server.connector().connect(&request("alice")).await.err().unwrap();
        assert!(err.is_transport());
        assert_eq!(server.connect_attempts(), 1);
        assert_eq!(server.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_failing_sends() {
        let server = LoopbackServer::new();
        let parts = server.connector().connect(&request("alice")).await.unwrap();
        server.fail_next_sends(1);

        let event = RawEvent::new("mark_email_read", json!({ "email_id": "1" }));
        assert!(parts.connection.send(event.clone()).await.is_err());
        assert!(parts.connection.send(event).await.is_ok());
        assert_eq!(server.emitted().len(), 1);
    }
}
