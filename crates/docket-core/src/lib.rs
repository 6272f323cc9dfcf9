//! Domain layer of the Docket notification pipeline.
//!
//! Holds the pure pieces: event names and payloads, the normalizer, the
//! unread store, the toast manager, configuration types and the transport
//! traits implemented by `docket-infrastructure`.

pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod notification;
pub mod toast;
pub mod transport;
pub mod unread;

// Re-export common error type
pub use error::{DocketError, Result};
