use docket_core::chat::ChatCountSource;
use docket_core::config::NotificationConfig;
use docket_core::event::{InboundEvent, OutboundAction, RawEvent};
use docket_core::notification::{
    Category, CorrelationKey, EmailCountUpdatePayload, EmailStatusUpdatePayload,
    NotificationRecord, parse,
};
use docket_core::toast::{DismissReason, Toast, ToastConfig, ToastEvent};
use docket_core::transport::Connector;
use docket_core::unread::{PriorityLevel, UnreadCounts};
use docket_core::{DocketError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::SessionContext;
use crate::health::{HealthMonitor, HealthOptions};
use crate::transport::TransportAdapter;

const ACTIVATION_CHANNEL_CAPACITY: usize = 32;

/// Everything an inbound handler needs. Holds the adapter weakly: the adapter
/// owns the handlers.
#[derive(Clone)]
struct Wiring {
    context: Arc<SessionContext>,
    adapter: Weak<TransportAdapter>,
    chat: Option<Arc<dyn ChatCountSource>>,
    activations: broadcast::Sender<NotificationRecord>,
    shutdown_token: CancellationToken,
}

impl Wiring {
    /// Runs `work` in the background until it finishes or the session closes.
    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = work => {}
            }
        });
    }

    fn present(&self, record: NotificationRecord) {
        let activations = self.activations.clone();
        let result = self.context.toasts().present(record, move |toast: &Toast| {
            if let Some(record) = toast.record() {
                let _ = activations.send(record.clone());
            }
        });
        if let Err(e) = result {
            debug!("[Session] Toast not shown: {}", e);
        }
    }

    fn on_email_batch(&self, event: &RawEvent) {
        if let Some(record) = self.context.normalizer().normalize(event) {
            self.present(record);
        }
    }

    fn on_email_count(&self, event: &RawEvent) {
        match parse::<EmailCountUpdatePayload>(event) {
            Ok(payload) => {
                self.context
                    .unread()
                    .apply_server_update(Category::Email, payload.unread_count);
            }
            Err(e) => warn!("[Session] Discarding count update: {}", e),
        }
    }

    fn on_email_status(&self, event: &RawEvent) {
        match parse::<EmailStatusUpdatePayload>(event) {
            Ok(payload) => debug!(
                "[Session] Email {} is now {}",
                payload.email_id,
                payload.status_label()
            ),
            Err(e) => {
                warn!("[Session] Discarding status update: {}", e);
                return;
            }
        }
        self.request_email_count();
    }

    fn on_chat(&self, event: &RawEvent) {
        if let Some(record) = self.context.normalizer().normalize(event) {
            self.present(record);
            self.refresh_chat_count();
        }
    }

    fn request_email_count(&self) {
        let adapter = self.adapter.clone();
        self.spawn(async move {
            let Some(adapter) = adapter.upgrade() else {
                return;
            };
            if let Err(e) = adapter.emit(&OutboundAction::RequestEmailCount).await {
                warn!("[Session] Count refresh failed: {}", e);
            }
        });
    }

    fn refresh_chat_count(&self) {
        let Some(chat) = self.chat.clone() else {
            return;
        };
        let context = self.context.clone();
        self.spawn(async move {
            match chat.unread_count(context.user_id()).await {
                Ok(count) => {
                    context.unread().apply_server_update(Category::Chat, count);
                }
                Err(e) => warn!("[Session] Chat count refresh failed: {}", e),
            }
        });
    }
}

/// One live notification session: transport, health monitor and the
/// session-scoped state, for a single user.
///
/// Obtained from [`NotificationSessionManager`](super::NotificationSessionManager).
pub struct NotificationSession {
    wiring: Wiring,
    adapter: Arc<TransportAdapter>,
    health: HealthMonitor,
    closed: AtomicBool,
}

impl NotificationSession {
    /// Builds the session, registers its handlers and connects.
    ///
    /// A failed connection is not an error: the session starts disconnected
    /// and the health monitor's reconnect can bring it up later.
    pub async fn start(
        user_id: &str,
        config: &NotificationConfig,
        connector: Arc<dyn Connector>,
        chat: Option<Arc<dyn ChatCountSource>>,
    ) -> Result<Arc<Self>> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(DocketError::MissingUserId);
        }

        let context = Arc::new(SessionContext::new(
            user_id,
            ToastConfig::from(&config.toast),
        ));
        let adapter = Arc::new(TransportAdapter::new(
            connector,
            config.endpoint.url(),
            config.transport.connect_timeout(),
        ));
        let (activations, _) = broadcast::channel(ACTIVATION_CHANNEL_CAPACITY);
        let wiring = Wiring {
            context,
            adapter: Arc::downgrade(&adapter),
            chat,
            activations,
            shutdown_token: CancellationToken::new(),
        };

        Self::register_handlers(&adapter, &wiring, config.transport.refresh_on_status_update)?;

        if !adapter.open(user_id).await {
            warn!("[Session] {} starts disconnected", user_id);
        }
        let health = HealthMonitor::start(adapter.clone(), HealthOptions::from(&config.health));

        // Initial authoritative pull
        wiring.request_email_count();
        wiring.refresh_chat_count();

        info!("[Session] Opened for {}", user_id);
        Ok(Arc::new(Self {
            wiring,
            adapter,
            health,
            closed: AtomicBool::new(false),
        }))
    }

    fn register_handlers(
        adapter: &TransportAdapter,
        wiring: &Wiring,
        refresh_on_status_update: bool,
    ) -> Result<()> {
        let w = wiring.clone();
        adapter.on(InboundEvent::NewEmailBatch.as_str(), move |event| {
            w.on_email_batch(event)
        })?;

        let w = wiring.clone();
        adapter.on(InboundEvent::EmailCountUpdate.as_str(), move |event| {
            w.on_email_count(event)
        })?;

        if refresh_on_status_update {
            let w = wiring.clone();
            adapter.on(InboundEvent::EmailStatusUpdate.as_str(), move |event| {
                w.on_email_status(event)
            })?;
        }

        let w = wiring.clone();
        adapter.on(InboundEvent::ChatMessage.as_str(), move |event| w.on_chat(event))?;
        Ok(())
    }

    pub fn user_id(&self) -> &str {
        self.wiring.context.user_id()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.wiring.context
    }

    pub fn adapter(&self) -> &Arc<TransportAdapter> {
        &self.adapter
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Queries and streams
    // ------------------------------------------------------------------

    pub fn unread_count(&self, category: Category) -> u32 {
        self.wiring.context.unread().get_count(category)
    }

    pub fn priority_level(&self, category: Category) -> PriorityLevel {
        self.wiring.context.unread().priority_level(category)
    }

    pub fn visible_toasts(&self) -> Vec<Toast> {
        self.wiring.context.toasts().visible()
    }

    pub fn subscribe_unread(&self) -> watch::Receiver<UnreadCounts> {
        self.wiring.context.unread().subscribe()
    }

    pub fn subscribe_toasts(&self) -> broadcast::Receiver<ToastEvent> {
        self.wiring.context.toasts().subscribe()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<bool> {
        self.health.subscribe()
    }

    /// Records of notification toasts the user clicked through.
    pub fn subscribe_activations(&self) -> broadcast::Receiver<NotificationRecord> {
        self.wiring.activations.subscribe()
    }

    // ------------------------------------------------------------------
    // Toast interaction
    // ------------------------------------------------------------------

    pub fn dismiss_toast(&self, key: &CorrelationKey) -> bool {
        self.wiring.context.toasts().dismiss(key)
    }

    pub fn activate_toast(&self, key: &CorrelationKey) -> bool {
        self.wiring.context.toasts().activate(key)
    }

    pub fn dismiss_all_toasts(&self) -> usize {
        self.wiring.context.toasts().dismiss_all()
    }

    pub async fn force_reconnect(&self) -> bool {
        self.health.force_reconnect().await
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    /// Optimistically decrements the email counter, drops toasts listing the
    /// email and tells the server.
    pub async fn mark_email_read(&self, email_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.wiring.context.unread().mark_read_locally(Category::Email);
        self.dismiss_toasts_for(email_id);
        self.perform(OutboundAction::MarkEmailRead {
            email_id: email_id.to_string(),
        })
        .await
    }

    pub async fn mark_email_unread(&self, email_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.wiring
            .context
            .unread()
            .mark_unread_locally(Category::Email);
        self.perform(OutboundAction::MarkEmailUnread {
            email_id: email_id.to_string(),
        })
        .await
    }

    pub async fn delete_email(&self, email_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.dismiss_toasts_for(email_id);
        self.perform(OutboundAction::DeleteEmail {
            email_id: email_id.to_string(),
        })
        .await
    }

    pub async fn archive_email(&self, email_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.dismiss_toasts_for(email_id);
        self.perform(OutboundAction::ArchiveEmail {
            email_id: email_id.to_string(),
        })
        .await
    }

    pub async fn join_room(&self, room: &str) -> Result<()> {
        self.ensure_open()?;
        self.perform(OutboundAction::JoinRoom {
            room: room.to_string(),
        })
        .await
    }

    pub async fn leave_room(&self, room: &str) -> Result<()> {
        self.ensure_open()?;
        self.perform(OutboundAction::LeaveRoom {
            room: room.to_string(),
        })
        .await
    }

    /// Asks the server for an authoritative email count.
    pub async fn request_email_count(&self) -> Result<()> {
        self.ensure_open()?;
        self.perform(OutboundAction::RequestEmailCount).await
    }

    /// Fetches the authoritative chat count and applies it.
    pub async fn refresh_chat_count(&self) -> Result<u32> {
        self.ensure_open()?;
        let chat = self.chat_source()?;
        let count = chat.unread_count(self.user_id()).await?;
        self.wiring
            .context
            .unread()
            .apply_server_update(Category::Chat, count);
        Ok(count)
    }

    /// Marks a conversation read: optimistic decrement, API call, refresh.
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<()> {
        self.ensure_open()?;
        let chat = self.chat_source()?;
        self.wiring.context.unread().mark_read_locally(Category::Chat);
        chat.mark_conversation_read(self.user_id(), conversation_id)
            .await?;
        self.refresh_chat_count().await.map(|_| ())
    }

    /// Tears the session down: stops polling, cancels background work, zeroes
    /// and seals the session state, closes the connection. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.wiring.shutdown_token.cancel();
        self.health.stop();
        self.wiring.context.teardown();
        self.adapter.close().await;
        info!("[Session] Closed for {}", self.user_id());
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DocketError::SessionClosed);
        }
        Ok(())
    }

    fn chat_source(&self) -> Result<&Arc<dyn ChatCountSource>> {
        self.wiring
            .chat
            .as_ref()
            .ok_or_else(|| DocketError::config("no chat API configured"))
    }

    fn dismiss_toasts_for(&self, email_id: &str) {
        let removed = self.wiring.context.toasts().dismiss_where(
            |toast| toast.record().is_some_and(|record| record.mentions_email(email_id)),
            DismissReason::ItemActedOn,
        );
        if removed > 0 {
            debug!("[Session] Dropped {} toast(s) for email {}", removed, email_id);
        }
    }

    /// Emits `action`; a final failure becomes an error toast as well as the
    /// returned error.
    async fn perform(&self, action: OutboundAction) -> Result<()> {
        let result = self.adapter.emit(&action).await;
        if let Err(ref e) = result {
            error!("[Session] {} failed: {}", action.event_name(), e);
            let key = CorrelationKey::for_failure(action.event_name(), action.subject());
            let message = match e {
                DocketError::ActionFailed { message, .. } => message.clone(),
                other => other.to_string(),
            };
            if let Err(e) = self
                .wiring
                .context
                .toasts()
                .present_failure(key, action.event_name(), message)
            {
                debug!("[Session] Failure alert not shown: {}", e);
            }
        }
        result
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        self.wiring.shutdown_token.cancel();
    }
}
