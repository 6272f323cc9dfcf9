//! Notification session services.
//!
//! This module contains the session-scoped state, the live session that wires
//! transport events into it, and the manager that keeps one session active.

mod context;
mod manager;
mod notification_session;

pub use context::SessionContext;
pub use manager::NotificationSessionManager;
pub use notification_session::NotificationSession;
