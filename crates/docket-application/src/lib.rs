//! Application layer for Docket.
//!
//! Wires the domain pieces of `docket-core` into a running notification
//! session: the transport adapter and its event router, the connection
//! health monitor, and the session manager that owns one session at a time.

pub mod health;
pub mod session;
pub mod transport;

pub use health::{ConnectivityProbe, HealthMonitor, HealthOptions};
pub use session::{NotificationSession, NotificationSessionManager, SessionContext};
pub use transport::{EventRouter, TransportAdapter};
