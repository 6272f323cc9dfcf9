//! Transport event names and outbound user actions.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One event as it travels over the duplex connection: a name plus a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Inbound events pushed by the notification server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InboundEvent {
    NewEmailBatch,
    EmailCountUpdate,
    EmailStatusUpdate,
    ChatMessage,
}

impl InboundEvent {
    pub const ALL: [InboundEvent; 4] = [
        InboundEvent::NewEmailBatch,
        InboundEvent::EmailCountUpdate,
        InboundEvent::EmailStatusUpdate,
        InboundEvent::ChatMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InboundEvent::NewEmailBatch => "new_emails",
            InboundEvent::EmailCountUpdate => "email_count_update",
            InboundEvent::EmailStatusUpdate => "email_status_update",
            InboundEvent::ChatMessage => "chat_notification",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == name)
    }

    /// Channels with exactly one owner. A second subscriber would double-process
    /// authoritative data, so the router refuses it.
    pub fn is_exclusive(&self) -> bool {
        matches!(
            self,
            InboundEvent::NewEmailBatch | InboundEvent::EmailCountUpdate
        )
    }
}

/// Outbound user actions. Every one of them goes through the transport adapter's `emit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundAction {
    RequestEmailCount,
    MarkEmailRead { email_id: String },
    MarkEmailUnread { email_id: String },
    DeleteEmail { email_id: String },
    ArchiveEmail { email_id: String },
    JoinRoom { room: String },
    LeaveRoom { room: String },
}

impl OutboundAction {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundAction::RequestEmailCount => "request_email_count",
            OutboundAction::MarkEmailRead { .. } => "mark_email_read",
            OutboundAction::MarkEmailUnread { .. } => "mark_email_unread",
            OutboundAction::DeleteEmail { .. } => "delete_email",
            OutboundAction::ArchiveEmail { .. } => "archive_email",
            OutboundAction::JoinRoom { .. } => "join_room",
            OutboundAction::LeaveRoom { .. } => "leave_room",
        }
    }

    /// The email this action targets, if any.
    pub fn email_id(&self) -> Option<&str> {
        match self {
            OutboundAction::MarkEmailRead { email_id }
            | OutboundAction::MarkEmailUnread { email_id }
            | OutboundAction::DeleteEmail { email_id }
            | OutboundAction::ArchiveEmail { email_id } => Some(email_id),
            _ => None,
        }
    }

    /// Short subject used in failure alerts and their correlation keys.
    pub fn subject(&self) -> Option<&str> {
        match self {
            OutboundAction::JoinRoom { room } | OutboundAction::LeaveRoom { room } => Some(room),
            other => other.email_id(),
        }
    }

    /// Builds the wire event for `user_id`.
    pub fn to_event(&self, user_id: &str) -> RawEvent {
        let payload = match self {
            OutboundAction::RequestEmailCount => json!({ "user_id": user_id }),
            OutboundAction::JoinRoom { room } | OutboundAction::LeaveRoom { room } => {
                json!({ "user_id": user_id, "room": room })
            }
            action => json!({
                "user_id": user_id,
                "email_id": action.email_id().unwrap_or_default(),
            }),
        };
        RawEvent::new(self.event_name(), payload)
    }
}
