use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docket_core::event::{OutboundAction, RawEvent};
use docket_core::transport::{ConnectRequest, Connection, Connector};
use docket_core::{DocketError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::outbound::{EmitState, EmitStep, PendingEmit};
use super::router::EventRouter;
use crate::health::ConnectivityProbe;

struct LiveLink {
    generation: u64,
    connection: Arc<dyn Connection>,
    reader: JoinHandle<()>,
}

#[derive(Default)]
struct AdapterState {
    user_id: Option<String>,
    link: Option<LiveLink>,
}

/// Owns the single live connection of a user.
///
/// Lifecycle operations (`open`, `close`, `reconnect`) are serialized.
/// Connectivity is always read from the connection itself. Inbound events of
/// one connection are dispatched by a single reader task, in delivery order.
pub struct TransportAdapter {
    connector: Arc<dyn Connector>,
    url: String,
    connect_timeout: Duration,
    router: Arc<EventRouter>,
    state: tokio::sync::Mutex<AdapterState>,
    /// Mirror of the current connection for lock-free reads and sends.
    current: RwLock<Option<Arc<dyn Connection>>>,
    last_seen: Arc<Mutex<Option<DateTime<Utc>>>>,
    generation: AtomicU64,
}

impl TransportAdapter {
    pub fn new(connector: Arc<dyn Connector>, url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            url: url.into(),
            connect_timeout,
            router: Arc::new(EventRouter::new()),
            state: tokio::sync::Mutex::new(AdapterState::default()),
            current: RwLock::new(None),
            last_seen: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connects for `user_id`.
    ///
    /// An empty user id is logged and ignored. Any previous connection is
    /// closed first, unless it is still live for the same user, in which case
    /// nothing happens. Handlers registered for a different user are dropped.
    ///
    /// Returns whether a live connection exists afterwards.
    pub async fn open(&self, user_id: &str) -> bool {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            warn!("[Transport] {}", DocketError::MissingUserId);
            return false;
        }

        let mut state = self.state.lock().await;
        if state.user_id.as_deref() == Some(user_id) && self.is_connected() {
            debug!("[Transport] Already connected for {}", user_id);
            return true;
        }

        if state.user_id.as_deref().is_some_and(|previous| previous != user_id) {
            info!("[Transport] Switching user; dropping previous handlers");
            self.router.clear();
        }
        self.teardown(&mut state).await;
        state.user_id = Some(user_id.to_string());

        match self.establish(&mut state).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[Transport] Connection for {} failed: {}", user_id, e);
                false
            }
        }
    }

    /// Closes the connection and drops every handler. Safe without a connection.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        self.teardown(&mut state).await;
        if let Some(user_id) = state.user_id.take() {
            info!("[Transport] Closed connection for {}", user_id);
        }
        self.router.clear();
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Current connectivity, read from the transport.
    pub fn is_connected(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|connection| connection.is_connected())
    }

    /// Attempts a new connection if, and only if, currently disconnected.
    ///
    /// Returns `true` when a new connection was established.
    pub async fn reconnect(&self) -> bool {
        let mut state = self.state.lock().await;
        if self.is_connected() {
            debug!("[Transport] reconnect() while connected; ignoring");
            return false;
        }
        let Some(user_id) = state.user_id.clone() else {
            debug!("[Transport] reconnect() without an open session; ignoring");
            return false;
        };

        self.teardown(&mut state).await;
        match self.establish(&mut state).await {
            Ok(()) => {
                info!("[Transport] Reconnected for {}", user_id);
                true
            }
            Err(e) => {
                warn!("[Transport] Reconnect for {} failed: {}", user_id, e);
                false
            }
        }
    }

    /// Sends a user action.
    ///
    /// If the connection is down (or the send fails), one reconnect is
    /// attempted and the send retried exactly once. A second failure is
    /// returned as [`DocketError::ActionFailed`].
    pub async fn emit(&self, action: &OutboundAction) -> Result<()> {
        let user_id = self
            .user_id()
            .await
            .ok_or_else(|| DocketError::action_failed(action.event_name(), "no open session"))?;
        self.emit_raw(action.to_event(&user_id)).await
    }

    /// [`emit`](Self::emit) for an arbitrary event.
    pub async fn emit_raw(&self, event: RawEvent) -> Result<()> {
        let mut pending = PendingEmit::new(event);
        pending.advance(EmitStep::Start);

        loop {
            match pending.state {
                EmitState::Sending | EmitState::RetrySending => {
                    match self.send_now(pending.event.clone()).await {
                        Ok(()) => pending.advance(EmitStep::Sent),
                        Err(e) => {
                            debug!("[Transport] Send of '{}' failed: {}", pending.event.name, e);
                            pending.fail_step(EmitStep::SendFailed, e)
                        }
                    };
                }
                EmitState::Reconnecting => {
                    match self.ensure_connected().await {
                        Ok(()) => pending.advance(EmitStep::Reconnected),
                        Err(e) => pending.fail_step(EmitStep::ReconnectFailed, e),
                    };
                }
                EmitState::Succeeded => {
                    debug!("[Transport] Emitted '{}'", pending.event.name);
                    return Ok(());
                }
                EmitState::Failed => {
                    let message = pending
                        .last_error
                        .unwrap_or_else(|| "unknown error".to_string());
                    error!("[Transport] '{}' failed: {}", pending.event.name, message);
                    return Err(DocketError::action_failed(pending.event.name, message));
                }
                EmitState::Idle => {
                    pending.advance(EmitStep::Start);
                }
            }
        }
    }

    /// Registers an inbound handler. See [`EventRouter::on`].
    pub fn on<F>(&self, event: &str, handler: F) -> Result<()>
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        self.router.on(event, handler)
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub async fn user_id(&self) -> Option<String> {
        self.state.lock().await.user_id.clone()
    }

    /// Arrival time of the last inbound event on the current connection.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send_now(&self, event: RawEvent) -> Result<()> {
        let connection = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|connection| connection.is_connected())
            .ok_or(DocketError::NotConnected)?;
        connection.send(event).await
    }

    /// Reconnect step of the retry path: a live connection counts as success.
    async fn ensure_connected(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        if state.user_id.is_none() {
            return Err(DocketError::NotConnected);
        }
        self.teardown(&mut state).await;
        self.establish(&mut state).await
    }

    async fn establish(&self, state: &mut AdapterState) -> Result<()> {
        let user_id = state.user_id.clone().ok_or(DocketError::MissingUserId)?;
        let request = ConnectRequest {
            url: self.url.clone(),
            user_id,
        };

        let parts = tokio::time::timeout(self.connect_timeout, self.connector.connect(&request))
            .await
            .map_err(|_| DocketError::ConnectTimeout {
                after_secs: self.connect_timeout.as_secs(),
            })??;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let reader = self.spawn_reader(generation, parts.inbound);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Some(parts.connection.clone());
        state.link = Some(LiveLink {
            generation,
            connection: parts.connection,
            reader,
        });

        info!(
            "[Transport] Connected #{} to {} for {}",
            generation, request.url, request.user_id
        );
        Ok(())
    }

    fn spawn_reader(&self, generation: u64, mut inbound: mpsc::UnboundedReceiver<RawEvent>) -> JoinHandle<()> {
        let router = self.router.clone();
        let last_seen = self.last_seen.clone();

        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                *last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
                debug!("[Transport] #{} <- '{}'", generation, event.name);
                router.dispatch(&event);
            }
            debug!("[Transport] Inbound stream of #{} ended", generation);
        })
    }

    async fn teardown(&self, state: &mut AdapterState) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        if let Some(link) = state.link.take() {
            link.reader.abort();
            link.connection.close().await;
            debug!("[Transport] Tore down connection #{}", link.generation);
        }
    }
}

impl Drop for TransportAdapter {
    fn drop(&mut self) {
        if let Some(link) = self.state.get_mut().link.take() {
            link.reader.abort();
        }
    }
}

#[async_trait]
impl ConnectivityProbe for TransportAdapter {
    fn is_connected(&self) -> bool {
        TransportAdapter::is_connected(self)
    }

    async fn reconnect(&self) -> bool {
        TransportAdapter::reconnect(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_infrastructure::LoopbackServer;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn adapter(server: &LoopbackServer) -> TransportAdapter {
        TransportAdapter::new(
            Arc::new(server.connector()),
            "loopback://test/chat",
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_open_requires_user() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);

        assert!(!adapter.open("").await);
        assert!(!adapter.open("   ").await);
        assert_eq!(server.connect_attempts(), 0);
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn test_open_twice_keeps_one_connection() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);

        assert!(adapter.open("7").await);
        assert!(adapter.open("7").await);
        assert_eq!(server.connect_attempts(), 1);
        assert_eq!(server.live_connections_for("7"), 1);
    }

    #[tokio::test]
    async fn test_open_for_other_user_replaces_connection() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);
        adapter.open("7").await;
        adapter.on("chat_notification", |_| {}).unwrap();

        assert!(adapter.open("8").await);
        assert_eq!(server.live_connections_for("7"), 0);
        assert_eq!(server.live_connections_for("8"), 1);
        assert_eq!(adapter.router().handler_count("chat_notification"), 0);
    }

    #[tokio::test]
    async fn test_close_is_safe_without_connection() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);
        adapter.close().await;

        adapter.open("7").await;
        adapter.close().await;
        adapter.close().await;
        assert!(!adapter.is_connected());
        assert_eq!(server.live_connections(), 0);
        assert_eq!(adapter.user_id().await, None);
    }

    #[tokio::test]
    async fn test_inbound_events_dispatch_in_order() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);
        let (tx, mut rx) = mpsc::unbounded_channel();
        adapter
            .on("email_status_update", move |event| {
                let _ = tx.send(event.payload["email_id"].clone());
            })
            .unwrap();
        adapter.open("7").await;

        for id in 0..5 {
            server.push("7", RawEvent::new("email_status_update", json!({ "email_id": id })));
        }
        for id in 0..5 {
            assert_eq!(rx.recv().await, Some(json!(id)));
        }
        assert!(adapter.last_seen().is_some());
    }

    #[tokio::test]
    async fn test_reconnect_only_when_disconnected() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);
        adapter.open("7").await;

        assert!(!adapter.reconnect().await);
        assert_eq!(server.connect_attempts(), 1);

        server.drop_connections();
        assert!(!adapter.is_connected());
        assert!(adapter.reconnect().await);
        assert!(adapter.is_connected());
        assert_eq!(server.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_handlers_survive_reconnect() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        adapter
            .on("chat_notification", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        adapter.open("7").await;
        server.drop_connections();
        adapter.reconnect().await;

        server.push("7", RawEvent::new("chat_notification", json!({})));
        for _ in 0..50 {
            if hits.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emit_when_connected() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);
        adapter.open("7").await;

        adapter
            .emit(&OutboundAction::MarkEmailRead {
                email_id: "42".to_string(),
            })
            .await
            .unwrap();

        let sent = server.emitted_named("mark_email_read");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event.payload, json!({ "user_id": "7", "email_id": "42" }));
    }

    #[tokio::test]
    async fn test_emit_reconnects_and_retries_once() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);
        adapter.open("7").await;
        server.drop_connections();

        adapter.emit(&OutboundAction::RequestEmailCount).await.unwrap();
        assert!(adapter.is_connected());
        assert_eq!(server.connect_attempts(), 2);
        assert_eq!(server.emitted_named("request_email_count").len(), 1);
    }

    #[tokio::test]
    async fn test_emit_fails_when_reconnect_fails() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);
        adapter.open("7").await;
        server.drop_connections();
        server.set_refusing(true);

        let err = adapter
            .emit(&OutboundAction::DeleteEmail {
                email_id: "9".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_action_failed());
        assert_eq!(server.connect_attempts(), 2);
        assert!(server.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_emit_fails_when_retry_fails() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);
        adapter.open("7").await;
        server.fail_next_sends(2);

        let err = adapter
            .emit(&OutboundAction::ArchiveEmail {
                email_id: "9".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DocketError::action_failed("archive_email", "Transport error: send of 'archive_email' failed")
        );
        // Connection was still live, so no new connection was made
        assert_eq!(server.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_emit_without_session() {
        let server = LoopbackServer::new();
        let adapter = adapter(&server);
        let err = adapter.emit(&OutboundAction::RequestEmailCount).await.unwrap_err();
        assert!(err.is_action_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let server = LoopbackServer::new();
        server.set_connect_delay(Some(Duration::from_secs(30)));
        let adapter = adapter(&server);

        assert!(!adapter.open("7").await);
        assert!(!adapter.is_connected());
    }
}
