use docket_core::notification::Normalizer;
use docket_core::toast::{ToastConfig, ToastManager};
use docket_core::unread::UnreadStore;
use std::sync::Arc;
use tracing::debug;

/// Session-scoped state shared by every consumer of one notification session.
///
/// Constructed per session and handed to the event handlers explicitly.
/// [`teardown`](Self::teardown) zeroes and seals it so nothing in flight can
/// write into it afterwards.
pub struct SessionContext {
    user_id: String,
    normalizer: Normalizer,
    unread: Arc<UnreadStore>,
    toasts: Arc<ToastManager>,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, toast_config: ToastConfig) -> Self {
        let user_id = user_id.into();
        Self {
            normalizer: Normalizer::for_user(user_id.clone()),
            user_id,
            unread: Arc::new(UnreadStore::new()),
            toasts: Arc::new(ToastManager::new(toast_config)),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn unread(&self) -> &Arc<UnreadStore> {
        &self.unread
    }

    pub fn toasts(&self) -> &Arc<ToastManager> {
        &self.toasts
    }

    /// Zeroes counters and clears toasts; the context stays usable.
    pub fn reset(&self) {
        self.unread.reset();
        self.toasts.dismiss_all();
        debug!("[Session] Context of {} reset", self.user_id);
    }

    /// Zeroes counters, clears toasts (cancelling their timers) and rejects
    /// every later update.
    pub fn teardown(&self) {
        self.unread.close();
        self.toasts.close();
        debug!("[Session] Context of {} torn down", self.user_id);
    }

    pub fn is_torn_down(&self) -> bool {
        self.unread.is_closed() && self.toasts.is_closed()
    }
}
