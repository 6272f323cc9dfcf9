use docket_core::chat::ChatCountSource;
use docket_core::config::NotificationConfig;
use docket_core::transport::Connector;
use docket_core::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::notification_session::NotificationSession;

/// Owns the single active notification session.
///
/// `NotificationSessionManager` is responsible for:
/// - Opening a session when a user identity becomes available
/// - Tearing down the previous session before a new one connects
/// - Closing the session on logout
pub struct NotificationSessionManager {
    config: NotificationConfig,
    connector: Arc<dyn Connector>,
    chat: Option<Arc<dyn ChatCountSource>>,
    active: Mutex<Option<Arc<NotificationSession>>>,
}

impl NotificationSessionManager {
    /// Creates a manager connecting through `connector`.
    pub fn new(config: NotificationConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            chat: None,
            active: Mutex::new(None),
        }
    }

    /// Uses `chat` for the chat unread counter.
    pub fn with_chat_source(mut self, chat: Arc<dyn ChatCountSource>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Opens a session for `user_id`.
    ///
    /// If a connected session for the same user is already active it is
    /// returned unchanged. Any other active session is closed, and its state
    /// cleared, before the new one connects.
    ///
    /// # Errors
    ///
    /// Returns `MissingUserId` if `user_id` is empty. Connection failures are
    /// not errors; the session starts disconnected.
    pub async fn open(&self, user_id: &str) -> Result<Arc<NotificationSession>> {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref()
            && current.user_id() == user_id.trim()
            && current.is_connected()
        {
            debug!("[Session] {} already open", current.user_id());
            return Ok(current.clone());
        }

        if let Some(previous) = active.take() {
            info!("[Session] Closing {} before opening {}", previous.user_id(), user_id);
            previous.close().await;
        }

        let session = NotificationSession::start(
            user_id,
            &self.config,
            self.connector.clone(),
            self.chat.clone(),
        )
        .await?;
        *active = Some(session.clone());
        Ok(session)
    }

    /// Returns the currently active session.
    pub async fn active_session(&self) -> Option<Arc<NotificationSession>> {
        self.active.lock().await.clone()
    }

    /// Closes the active session (logout). Returns `false` if there was none.
    pub async fn close(&self) -> bool {
        let Some(session) = self.active.lock().await.take() else {
            return false;
        };
        session.close().await;
        true
    }
}
