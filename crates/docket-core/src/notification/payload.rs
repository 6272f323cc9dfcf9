//! Wire payloads of the inbound notification events.
//!
//! Ids arrive as numbers from some backend paths and as strings from others;
//! they are normalized to `String` on the way in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

fn id_from_value<E: serde::de::Error>(value: Value) -> Result<String, E> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(E::custom(format!("expected a string or numeric id, got {other}"))),
    }
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    id_from_value(Value::deserialize(deserializer)?)
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => id_from_value(value).map(Some),
    }
}

/// `new_emails`: a batch of freshly received emails.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEmailBatchPayload {
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub emails: Option<Vec<EmailSummary>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One email as listed inside a batch notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSummary {
    #[serde(alias = "email_id", deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, alias = "body")]
    pub preview: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// `email_count_update`: the server's authoritative unread count.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailCountUpdatePayload {
    pub unread_count: u32,
}

/// `email_status_update`: an email changed state on the server.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailStatusUpdatePayload {
    #[serde(deserialize_with = "de_id")]
    pub email_id: String,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl EmailStatusUpdatePayload {
    pub fn status_label(&self) -> &str {
        self.operation
            .as_deref()
            .or(self.status.as_deref())
            .unwrap_or("unknown")
    }
}

/// `chat_notification`: a chat message somewhere the user participates.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatNotificationPayload {
    #[serde(rename = "type", default)]
    pub kind: ChatNotificationKind,
    pub message: ChatMessage,
    #[serde(default)]
    pub notification: Option<ChatNotice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatNotificationKind {
    PrivateMessage,
    GroupMessage,
    ProjectMessage,
    PublicMessage,
    Mention,
    SystemMessage,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(deserialize_with = "de_id")]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub project_id: Option<String>,
}

/// Presentation hints the server attaches to chat notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatNotice {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_email_summary_accepts_numeric_email_id() {
        let summary: EmailSummary = serde_json::from_value(json!({
            "email_id": 17,
            "from": "clerk@court.example",
            "subject": "Hearing moved",
            "body": "The hearing is now on Friday",
        }))
        .unwrap();
        assert_eq!(summary.id, "17");
        assert_eq!(summary.preview.as_deref(), Some("The hearing is now on Friday"));
        assert_eq!(summary.date, None);
    }

    #[test]
    fn test_count_update_rejects_negative() {
        let result: Result<EmailCountUpdatePayload, _> =
            serde_json::from_value(json!({ "unread_count": -1 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_chat_kind_maps_to_other() {
        let payload: ChatNotificationPayload = serde_json::from_value(json!({
            "type": "reaction",
            "message": { "sender_id": 3, "timestamp": "2025-03-01T10:00:00Z" },
        }))
        .unwrap();
        assert_eq!(payload.kind, ChatNotificationKind::Other);
        assert_eq!(payload.message.sender_id, "3");
        assert_eq!(payload.message.conversation_id, None);
    }

    #[test]
    fn test_status_label_prefers_operation() {
        let payload: EmailStatusUpdatePayload = serde_json::from_value(json!({
            "email_id": "9",
            "operation": "archive_email",
            "status": "archived",
        }))
        .unwrap();
        assert_eq!(payload.status_label(), "archive_email");
    }
}
