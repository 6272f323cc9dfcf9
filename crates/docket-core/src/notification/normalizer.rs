use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::model::{Category, CorrelationKey, NotificationBody, NotificationRecord};
use super::payload::{ChatNotificationPayload, NewEmailBatchPayload};
use crate::error::{DocketError, Result};
use crate::event::{InboundEvent, RawEvent};

/// Turns raw transport events into [`NotificationRecord`]s.
///
/// Count and status events carry no presentable notification and yield
/// nothing; they are consumed by the unread store instead.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    own_user_id: Option<String>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A normalizer that drops chat messages sent by `user_id` itself.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            own_user_id: Some(user_id.into()),
        }
    }

    /// Normalizes `event`, logging and discarding malformed payloads.
    pub fn normalize(&self, event: &RawEvent) -> Option<NotificationRecord> {
        match self.try_normalize(event) {
            Ok(record) => record,
            Err(e) => {
                warn!("[Normalizer] Discarding event: {}", e);
                None
            }
        }
    }

    /// Like [`normalize`](Self::normalize) but reports malformed payloads as errors.
    pub fn try_normalize(&self, event: &RawEvent) -> Result<Option<NotificationRecord>> {
        match InboundEvent::from_name(&event.name) {
            Some(InboundEvent::NewEmailBatch) => self.email_batch(event),
            Some(InboundEvent::ChatMessage) => self.chat_message(event),
            _ => Ok(None),
        }
    }

    fn email_batch(&self, event: &RawEvent) -> Result<Option<NotificationRecord>> {
        let payload: NewEmailBatchPayload = parse(event)?;

        let count = match (payload.count, payload.emails.as_ref()) {
            (Some(count), _) => count,
            (None, Some(emails)) => saturating_count(emails.len()),
            (None, None) => {
                return Err(DocketError::malformed(
                    &event.name,
                    "neither count nor emails present",
                ));
            }
        };
        let timestamp = payload
            .timestamp
            .ok_or_else(|| DocketError::malformed(&event.name, "missing timestamp"))?;

        if count == 0 {
            debug!("[Normalizer] Ignoring empty email batch at {}", timestamp);
            return Ok(None);
        }

        let key = CorrelationKey::derive(Category::Email, timestamp, None);
        debug!("[Normalizer] Email batch of {} -> {}", count, key);

        Ok(Some(NotificationRecord::new(
            Category::Email,
            count,
            NotificationBody::EmailBatch {
                emails: payload.emails.unwrap_or_default(),
            },
            timestamp,
            key,
        )))
    }

    fn chat_message(&self, event: &RawEvent) -> Result<Option<NotificationRecord>> {
        let payload: ChatNotificationPayload = parse(event)?;

        if self.own_user_id.as_deref() == Some(payload.message.sender_id.as_str()) {
            debug!("[Normalizer] Skipping chat message sent by the current user");
            return Ok(None);
        }

        let timestamp = payload
            .message
            .timestamp
            .ok_or_else(|| DocketError::malformed(&event.name, "missing message.timestamp"))?;
        let key = CorrelationKey::derive(
            Category::Chat,
            timestamp,
            Some(&payload.message.sender_id),
        );

        Ok(Some(NotificationRecord::new(
            Category::Chat,
            1,
            NotificationBody::Chat {
                chat_kind: payload.kind,
                message: payload.message,
                notice: payload.notification,
            },
            timestamp,
            key,
        )))
    }
}

/// Deserializes an event payload, mapping shape errors to `MalformedPayload`.
pub fn parse<T: DeserializeOwned>(event: &RawEvent) -> Result<T> {
    if !event.payload.is_object() {
        return Err(DocketError::malformed(&event.name, "payload is not an object"));
    }
    serde_json::from_value(event.payload.clone())
        .map_err(|e| DocketError::malformed(&event.name, e.to_string()))
}

/// List length as a count; lists longer than `u32::MAX` saturate.
fn saturating_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
