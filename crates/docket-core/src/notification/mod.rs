//! Notification domain module.
//!
//! # Module Structure
//!
//! - `model`: `Category`, `CorrelationKey` and the immutable `NotificationRecord`
//! - `payload`: wire payloads of the inbound events
//! - `normalizer`: raw event to record conversion

mod model;
mod normalizer;
mod payload;

pub use model::{Category, CorrelationKey, NotificationBody, NotificationRecord};
pub use normalizer::{Normalizer, parse};
pub use payload::{
    ChatMessage, ChatNotice, ChatNotificationKind, ChatNotificationPayload, EmailCountUpdatePayload,
    EmailStatusUpdatePayload, EmailSummary, NewEmailBatchPayload,
};
