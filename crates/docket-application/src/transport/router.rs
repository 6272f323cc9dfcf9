use docket_core::event::{InboundEvent, RawEvent};
use docket_core::{DocketError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Callback for one inbound event.
pub type Handler = Arc<dyn Fn(&RawEvent) + Send + Sync>;

/// Typed event bus between the transport and its consumers.
///
/// Exclusive channels (authoritative data) accept exactly one handler and
/// refuse a second registration. Every other channel accepts any number of
/// handlers, and all of them fire in registration order.
pub struct EventRouter {
    exclusive: HashSet<String>,
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl EventRouter {
    /// A router whose exclusive channels are the single-owner inbound events.
    pub fn new() -> Self {
        Self::with_exclusive(
            InboundEvent::ALL
                .iter()
                .filter(|event| event.is_exclusive())
                .map(|event| event.as_str()),
        )
    }

    pub fn with_exclusive<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exclusive: names.into_iter().map(Into::into).collect(),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_exclusive(&self, event: &str) -> bool {
        self.exclusive.contains(event)
    }

    /// Registers `handler` for `event`.
    pub fn on<F>(&self, event: &str, handler: F) -> Result<()>
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.lock();
        let slot = handlers.entry(event.to_string()).or_default();
        if self.is_exclusive(event) && !slot.is_empty() {
            return Err(DocketError::ChannelAlreadyOwned {
                event: event.to_string(),
            });
        }
        slot.push(Arc::new(handler));
        debug!("[Router] Handler #{} registered for '{}'", slot.len(), event);
        Ok(())
    }

    /// Runs every handler registered for `event.name`. Returns how many ran.
    pub fn dispatch(&self, event: &RawEvent) -> usize {
        // Handlers run outside the lock so they may register or clear.
        let handlers: Vec<Handler> = self
            .lock()
            .get(&event.name)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            trace!("[Router] No handler for '{}'", event.name);
        }
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    /// Drops every handler. Owners must register again.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Handler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}
