//! Unread counters per notification category.
//!
//! Server-pushed counts are authoritative and overwrite whatever is stored.
//! Local optimistic adjustments exist only for immediate UI feedback and are
//! discarded by the next authoritative update.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::debug;

use crate::notification::Category;

/// Snapshot of every counter, as published to subscribers.
pub type UnreadCounts = BTreeMap<Category, u32>;

/// Presentational severity of an unread count. Not used for business logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    None,
    Low,
    Medium,
    High,
}

impl PriorityLevel {
    /// 0 -> none, 1-4 -> low, 5-9 -> medium, 10+ -> high
    pub fn from_count(count: u32) -> Self {
        match count {
            0 => PriorityLevel::None,
            1..=4 => PriorityLevel::Low,
            5..=9 => PriorityLevel::Medium,
            _ => PriorityLevel::High,
        }
    }
}

/// Session-scoped unread counters.
///
/// Counters start at 0. Subscribers are only woken when a value actually
/// changes. Once [`close`](Self::close)d the store stays at zero and ignores
/// late updates, so events still in flight at teardown cannot resurrect counts.
pub struct UnreadStore {
    counts: watch::Sender<UnreadCounts>,
    closed: AtomicBool,
}

impl UnreadStore {
    pub fn new() -> Self {
        let initial = Category::ALL.iter().map(|category| (*category, 0)).collect();
        let (counts, _) = watch::channel(initial);
        Self {
            counts,
            closed: AtomicBool::new(false),
        }
    }

    /// Current count, 0 for a category never seen.
    pub fn get_count(&self, category: Category) -> u32 {
        self.counts.borrow().get(&category).copied().unwrap_or(0)
    }

    /// Overwrites the stored count with the server's value.
    ///
    /// Returns `true` if the visible value changed.
    pub fn apply_server_update(&self, category: Category, count: u32) -> bool {
        let changed = self.modify(|counts| {
            counts.insert(category, count);
        });
        debug!(
            "[Unread] Authoritative {} count = {} (changed: {})",
            category, count, changed
        );
        changed
    }

    /// Optimistic decrement by one, floored at zero. Returns the new count.
    pub fn mark_read_locally(&self, category: Category) -> u32 {
        self.modify(|counts| {
            let entry = counts.entry(category).or_insert(0);
            *entry = entry.saturating_sub(1);
        });
        self.get_count(category)
    }

    /// Optimistic increment by one. Returns the new count.
    pub fn mark_unread_locally(&self, category: Category) -> u32 {
        self.modify(|counts| {
            let entry = counts.entry(category).or_insert(0);
            *entry = entry.saturating_add(1);
        });
        self.get_count(category)
    }

    pub fn has_unread(&self, category: Category) -> bool {
        self.get_count(category) > 0
    }

    pub fn priority_level(&self, category: Category) -> PriorityLevel {
        PriorityLevel::from_count(self.get_count(category))
    }

    pub fn snapshot(&self) -> UnreadCounts {
        self.counts.borrow().clone()
    }

    /// Edge-triggered change notifications.
    pub fn subscribe(&self) -> watch::Receiver<UnreadCounts> {
        self.counts.subscribe()
    }

    /// Zeroes every counter. The store remains usable.
    pub fn reset(&self) {
        self.modify(|counts| {
            zero_all(counts);
        });
    }

    /// Zeroes every counter and rejects all further updates.
    pub fn close(&self) {
        self.counts.send_if_modified(|counts| {
            self.closed.store(true, Ordering::Release);
            zero_all(counts)
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn modify(&self, f: impl FnOnce(&mut UnreadCounts)) -> bool {
        // The closed check runs under the watch lock, serialized with close().
        self.counts.send_if_modified(|counts| {
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            let before = counts.clone();
            f(counts);
            *counts != before
        })
    }
}

fn zero_all(counts: &mut UnreadCounts) -> bool {
    let mut changed = false;
    for value in counts.values_mut() {
        if *value != 0 {
            *value = 0;
            changed = true;
        }
    }
    changed
}

impl Default for UnreadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero() {
        let store = UnreadStore::new();
        for category in Category::ALL {
            assert_eq!(store.get_count(category), 0);
            assert!(!store.has_unread(category));
            assert_eq!(store.priority_level(category), PriorityLevel::None);
        }
    }

    #[test]
    fn test_local_decrement_never_goes_negative() {
        let store = UnreadStore::new();
        store.apply_server_update(Category::Email, 2);

        assert_eq!(store.mark_read_locally(Category::Email), 1);
        assert_eq!(store.mark_read_locally(Category::Email), 0);
        for _ in 0..5 {
            assert_eq!(store.mark_read_locally(Category::Email), 0);
        }
        assert_eq!(store.mark_read_locally(Category::Chat), 0);
    }

    #[test]
    fn test_server_update_discards_local_adjustments() {
        let store = UnreadStore::new();
        store.apply_server_update(Category::Email, 5);
        store.mark_read_locally(Category::Email);
        store.mark_read_locally(Category::Email);
        store.mark_unread_locally(Category::Email);
        assert_eq!(store.get_count(Category::Email), 4);

        store.apply_server_update(Category::Email, 6);
        assert_eq!(store.get_count(Category::Email), 6);
    }

    #[test]
    fn test_optimistic_then_matching_server_value_is_stable() {
        let store = UnreadStore::new();
        store.apply_server_update(Category::Email, 5);
        assert_eq!(store.mark_read_locally(Category::Email), 4);

        let changed = store.apply_server_update(Category::Email, 4);
        assert!(!changed);
        assert_eq!(store.get_count(Category::Email), 4);
    }

    #[test]
    fn test_priority_tiers() {
        assert_eq!(PriorityLevel::from_count(0), PriorityLevel::None);
        assert_eq!(PriorityLevel::from_count(1), PriorityLevel::Low);
        assert_eq!(PriorityLevel::from_count(4), PriorityLevel::Low);
        assert_eq!(PriorityLevel::from_count(5), PriorityLevel::Medium);
        assert_eq!(PriorityLevel::from_count(9), PriorityLevel::Medium);
        assert_eq!(PriorityLevel::from_count(10), PriorityLevel::High);
        assert_eq!(PriorityLevel::from_count(250), PriorityLevel::High);
    }

    #[test]
    fn test_subscribers_only_see_changes() {
        let store = UnreadStore::new();
        let mut rx = store.subscribe();

        store.apply_server_update(Category::Email, 3);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().get(&Category::Email), Some(&3));

        store.apply_server_update(Category::Email, 3);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_close_zeroes_and_ignores_late_updates() {
        let store = UnreadStore::new();
        store.apply_server_update(Category::Email, 8);
        store.apply_server_update(Category::Chat, 2);

        store.close();
        assert!(store.is_closed());
        assert_eq!(store.get_count(Category::Email), 0);
        assert_eq!(store.get_count(Category::Chat), 0);

        store.apply_server_update(Category::Email, 9);
        store.mark_unread_locally(Category::Chat);
        assert_eq!(store.get_count(Category::Email), 0);
        assert_eq!(store.get_count(Category::Chat), 0);
    }

    #[test]
    fn test_reset_keeps_store_usable() {
        let store = UnreadStore::new();
        store.apply_server_update(Category::Email, 8);
        let mut rx = store.subscribe();

        store.reset();
        assert_eq!(store.get_count(Category::Email), 0);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().get(&Category::Email), Some(&0));

        store.reset();
        assert!(!rx.has_changed().unwrap());
        store.apply_server_update(Category::Email, 1);
        assert_eq!(store.get_count(Category::Email), 1);
    }
}
