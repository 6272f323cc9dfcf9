//! Toast presentation: which notifications are visible, and for how long.
//!
//! Every active toast owns the `JoinHandle` of its auto-dismiss timer. The
//! handle is aborted whenever the entry leaves the active set, whatever the
//! reason, so a manual dismiss can never be followed by a late expiry.
//!
//! The manager never touches unread counters. Dismissing a toast and
//! decrementing a counter are independent reactions to the same event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ToastSettings;
use crate::error::{DocketError, Result};
use crate::notification::{CorrelationKey, NotificationRecord};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToastConfig {
    pub visibility: Duration,
    pub capacity: usize,
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self::from(&ToastSettings::default())
    }
}

impl From<&ToastSettings> for ToastConfig {
    fn from(settings: &ToastSettings) -> Self {
        Self {
            visibility: settings.visibility(),
            capacity: settings.capacity.max(1),
        }
    }
}

/// What a toast shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToastContent {
    Notification(NotificationRecord),
    /// A user action that could not be delivered; rendered as an error alert.
    ActionFailed { event: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub id: u64,
    pub key: CorrelationKey,
    pub content: ToastContent,
    pub shown_at: DateTime<Utc>,
}

impl Toast {
    pub fn is_failure(&self) -> bool {
        matches!(self.content, ToastContent::ActionFailed { .. })
    }

    pub fn record(&self) -> Option<&NotificationRecord> {
        match &self.content {
            ToastContent::Notification(record) => Some(record),
            ToastContent::ActionFailed { .. } => None,
        }
    }
}

/// Lifecycle handle returned by [`ToastManager::present`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToastHandle {
    id: u64,
    key: CorrelationKey,
}

impl ToastHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissReason {
    Manual,
    Expired,
    Activated,
    Evicted,
    /// The email the toast refers to was read, deleted or archived.
    ItemActedOn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastEvent {
    Shown(Toast),
    Dismissed {
        key: CorrelationKey,
        id: u64,
        reason: DismissReason,
    },
    Cleared {
        count: usize,
    },
}

type ActivateFn = Box<dyn FnOnce(&Toast) + Send>;

struct ToastEntry {
    toast: Toast,
    on_activate: Option<ActivateFn>,
    expiry: Option<JoinHandle<()>>,
}

impl Drop for ToastEntry {
    fn drop(&mut self) {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct ToastState {
    entries: HashMap<CorrelationKey, ToastEntry>,
    next_id: u64,
    closed: bool,
}

impl ToastState {
    fn oldest_key(&self) -> Option<CorrelationKey> {
        self.entries
            .values()
            .min_by_key(|entry| entry.toast.id)
            .map(|entry| entry.toast.key.clone())
    }
}

/// Active toast set with de-duplication, bounded size and cancellable expiry.
///
/// Timers are spawned on the ambient Tokio runtime; outside a runtime toasts
/// are still tracked but never auto-expire.
pub struct ToastManager {
    state: Arc<Mutex<ToastState>>,
    events: broadcast::Sender<ToastEvent>,
    config: ToastConfig,
}

impl ToastManager {
    pub fn new(config: ToastConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(ToastState {
                next_id: 1,
                ..ToastState::default()
            })),
            events,
            config,
        }
    }

    pub fn config(&self) -> ToastConfig {
        self.config
    }

    /// Shows `record` unless a toast with the same correlation key is already
    /// active, in which case the existing handle is returned and nothing changes.
    ///
    /// `on_activate` runs at most once, when the user clicks the toast.
    pub fn present<F>(&self, record: NotificationRecord, on_activate: F) -> Result<ToastHandle>
    where
        F: FnOnce(&Toast) + Send + 'static,
    {
        let key = record.correlation_key().clone();
        let callback: ActivateFn = Box::new(on_activate);
        self.insert(key, ToastContent::Notification(record), Some(callback))
    }

    /// Shows an error alert for a failed user action.
    pub fn present_failure(
        &self,
        key: CorrelationKey,
        event: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<ToastHandle> {
        let content = ToastContent::ActionFailed {
            event: event.into(),
            message: message.into(),
        };
        self.insert(key, content, None)
    }

    fn insert(
        &self,
        key: CorrelationKey,
        content: ToastContent,
        on_activate: Option<ActivateFn>,
    ) -> Result<ToastHandle> {
        let mut state = self.lock();
        if state.closed {
            return Err(DocketError::SessionClosed);
        }

        if let Some(existing) = state.entries.get(&key) {
            debug!("[Toast] Duplicate {} ignored", key);
            return Ok(ToastHandle {
                id: existing.toast.id,
                key,
            });
        }

        while state.entries.len() >= self.config.capacity {
            let Some(oldest) = state.oldest_key() else {
                break;
            };
            if let Some(evicted) = state.entries.remove(&oldest) {
                debug!("[Toast] Evicting {}", oldest);
                self.publish(ToastEvent::Dismissed {
                    key: oldest,
                    id: evicted.toast.id,
                    reason: DismissReason::Evicted,
                });
            }
        }

        let id = state.next_id;
        state.next_id += 1;

        let toast = Toast {
            id,
            key: key.clone(),
            content,
            shown_at: Utc::now(),
        };
        let expiry = self.schedule_expiry(key.clone(), id);
        state.entries.insert(
            key.clone(),
            ToastEntry {
                toast: toast.clone(),
                on_activate,
                expiry,
            },
        );
        debug!("[Toast] Showing {} (#{})", key, id);
        self.publish(ToastEvent::Shown(toast));
        drop(state);

        Ok(ToastHandle { id, key })
    }

    fn schedule_expiry(&self, key: CorrelationKey, id: u64) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("[Toast] No Tokio runtime; {} will not auto-expire", key);
                return None;
            }
        };

        let state: Weak<Mutex<ToastState>> = Arc::downgrade(&self.state);
        let events = self.events.clone();
        let visibility = self.config.visibility;

        Some(runtime.spawn(async move {
            tokio::time::sleep(visibility).await;
            if let Some(state) = state.upgrade() {
                expire(&state, &events, &key, id);
            }
        }))
    }

    /// Removes one toast early. Dismissing an absent key is a no-op.
    pub fn dismiss(&self, key: &CorrelationKey) -> bool {
        self.remove(key, DismissReason::Manual).is_some()
    }

    /// Click-through: removes the toast and runs its activation callback once.
    pub fn activate(&self, key: &CorrelationKey) -> bool {
        let Some(mut entry) = self.remove(key, DismissReason::Activated) else {
            return false;
        };
        if let Some(callback) = entry.on_activate.take() {
            callback(&entry.toast);
        }
        true
    }

    /// Removes every toast matching `predicate`. Returns how many were removed.
    pub fn dismiss_where<P>(&self, predicate: P, reason: DismissReason) -> usize
    where
        P: Fn(&Toast) -> bool,
    {
        let mut state = self.lock();
        let keys: Vec<CorrelationKey> = state
            .entries
            .values()
            .filter(|entry| predicate(&entry.toast))
            .map(|entry| entry.toast.key.clone())
            .collect();

        for key in &keys {
            if let Some(entry) = state.entries.remove(key) {
                self.publish(ToastEvent::Dismissed {
                    key: key.clone(),
                    id: entry.toast.id,
                    reason,
                });
            }
        }
        keys.len()
    }

    /// Clears the active set, cancelling every pending timer.
    pub fn dismiss_all(&self) -> usize {
        let mut state = self.lock();
        let count = state.entries.len();
        state.entries.clear();
        drop(state);

        if count > 0 {
            debug!("[Toast] Cleared {} toast(s)", count);
            self.publish(ToastEvent::Cleared { count });
        }
        count
    }

    /// Clears everything and refuses further toasts (session teardown).
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        let count = state.entries.len();
        state.entries.clear();
        drop(state);

        if count > 0 {
            self.publish(ToastEvent::Cleared { count });
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Active toasts, newest first (display stacking order).
    pub fn visible(&self) -> Vec<Toast> {
        let state = self.lock();
        let mut toasts: Vec<Toast> = state
            .entries
            .values()
            .map(|entry| entry.toast.clone())
            .collect();
        toasts.sort_by(|a, b| b.id.cmp(&a.id));
        toasts
    }

    /// Number of auto-dismiss timers still waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|entry| entry.expiry.as_ref().is_some_and(|h| !h.is_finished()))
            .count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToastEvent> {
        self.events.subscribe()
    }

    fn remove(&self, key: &CorrelationKey, reason: DismissReason) -> Option<ToastEntry> {
        let entry = self.lock().entries.remove(key)?;
        debug!("[Toast] Dismissed {} ({:?})", key, reason);
        self.publish(ToastEvent::Dismissed {
            key: key.clone(),
            id: entry.toast.id,
            reason,
        });
        Some(entry)
    }

    fn publish(&self, event: ToastEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, ToastState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ToastManager {
    fn default() -> Self {
        Self::new(ToastConfig::default())
    }
}

/// Timer callback. Only removes the entry it was scheduled for: a toast that
/// was dismissed and re-presented under the same key has a different id.
fn expire(
    state: &Mutex<ToastState>,
    events: &broadcast::Sender<ToastEvent>,
    key: &CorrelationKey,
    id: u64,
) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    let matches = state
        .entries
        .get(key)
        .is_some_and(|entry| entry.toast.id == id);
    if !matches {
        return;
    }
    if let Some(mut entry) = state.entries.remove(key) {
        // This task is the timer; don't abort ourselves on drop.
        entry.expiry.take();
        debug!("[Toast] Expired {}", key);
        let _ = events.send(ToastEvent::Dismissed {
            key: key.clone(),
            id,
            reason: DismissReason::Expired,
        });
    }
}
