use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::payload::{ChatMessage, ChatNotificationKind, ChatNotice, EmailSummary};

/// Notification category. Unread counters are kept per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Email,
    Chat,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Email, Category::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Email => "email",
            Category::Chat => "chat",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic identity of one server-pushed event.
///
/// A redelivered event (e.g. replayed after a reconnect) yields the same key,
/// which is what lets the toast manager treat it as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// `<category>:<timestamp millis>[:<discriminator>]`
    pub fn derive(
        category: Category,
        timestamp: DateTime<Utc>,
        discriminator: Option<&str>,
    ) -> Self {
        let millis = timestamp.timestamp_millis();
        match discriminator {
            Some(extra) => Self(format!("{category}:{millis}:{extra}")),
            None => Self(format!("{category}:{millis}")),
        }
    }

    /// Key for a failed outbound action, so repeated failures of the same
    /// action collapse into one alert.
    pub fn for_failure(event: &str, subject: Option<&str>) -> Self {
        match subject {
            Some(subject) => Self(format!("failure:{event}:{subject}")),
            None => Self(format!("failure:{event}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Category-specific content of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationBody {
    EmailBatch {
        emails: Vec<EmailSummary>,
    },
    Chat {
        chat_kind: ChatNotificationKind,
        message: ChatMessage,
        notice: Option<ChatNotice>,
    },
}

/// Uniform, immutable notification produced by the normalizer.
///
/// One record per inbound event: a batch of N emails is a single record with
/// `count() == N` carrying the itemized list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    category: Category,
    count: u32,
    body: NotificationBody,
    source_timestamp: DateTime<Utc>,
    correlation_key: CorrelationKey,
}

impl NotificationRecord {
    pub(crate) fn new(
        category: Category,
        count: u32,
        body: NotificationBody,
        source_timestamp: DateTime<Utc>,
        correlation_key: CorrelationKey,
    ) -> Self {
        Self {
            category,
            count,
            body,
            source_timestamp,
            correlation_key,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn body(&self) -> &NotificationBody {
        &self.body
    }

    pub fn source_timestamp(&self) -> DateTime<Utc> {
        self.source_timestamp
    }

    pub fn correlation_key(&self) -> &CorrelationKey {
        &self.correlation_key
    }

    pub fn emails(&self) -> &[EmailSummary] {
        match &self.body {
            NotificationBody::EmailBatch { emails } => emails,
            NotificationBody::Chat { .. } => &[],
        }
    }

    /// Whether this record lists the given email (used to drop toasts once
    /// the email is read, deleted or archived).
    pub fn mentions_email(&self, email_id: &str) -> bool {
        self.emails().iter().any(|email| email.id == email_id)
    }

    /// One-line headline for the toast.
    pub fn headline(&self) -> String {
        match &self.body {
            NotificationBody::EmailBatch { emails } => match (self.count, emails.first()) {
                (1, Some(email)) => format!("New email from {}: {}", email.from, email.subject),
                (n, _) => format!("{n} new emails"),
            },
            NotificationBody::Chat {
                message, notice, ..
            } => match notice {
                Some(notice) if !notice.title.is_empty() => notice.title.clone(),
                _ => format!(
                    "New message from {}",
                    message.sender_name.as_deref().unwrap_or("Unknown User")
                ),
            },
        }
    }
}
