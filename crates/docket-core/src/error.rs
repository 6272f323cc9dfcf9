//! Error types for the Docket notification pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the whole notification pipeline.
///
/// Transport-level variants are normally contained inside the transport
/// adapter and the health monitor; only `ActionFailed` and clearly malformed
/// application state are meant to reach user-visible messaging.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocketError {
    /// A session or connection was requested without a user identity
    #[error("A user identifier is required to open a notification session")]
    MissingUserId,

    /// Operation needs a live connection and none exists
    #[error("Not connected to the notification server")]
    NotConnected,

    /// Transport failure (connection refused, network drop, closed channel)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A connection attempt did not complete in time
    #[error("Connection attempt timed out after {after_secs}s")]
    ConnectTimeout { after_secs: u64 },

    /// An outbound user action could not be delivered, even after one reconnect
    #[error("Action '{event}' failed: {message}")]
    ActionFailed { event: String, message: String },

    /// A second subscriber tried to claim a single-owner channel
    #[error("Channel '{event}' already has an owner")]
    ChannelAlreadyOwned { event: String },

    /// Inbound payload is missing required fields or has the wrong shape
    #[error("Malformed '{event}' payload: {reason}")]
    MalformedPayload { event: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON"
        message: String,
    },

    /// HTTP API error (chat count endpoints)
    #[error("HTTP error{}: {message}", fmt_status(.status))]
    Http { status: Option<u16>, message: String },

    /// The session was torn down while the operation was pending
    #[error("Notification session is closed")]
    SessionClosed,

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocketError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates an ActionFailed error
    pub fn action_failed(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ActionFailed {
            event: event.into(),
            message: message.into(),
        }
    }

    /// Creates a MalformedPayload error
    pub fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Transport-level failures: recovered by reconnecting, never surfaced.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::NotConnected | Self::ConnectTimeout { .. }
        )
    }

    /// Check if this is a failed outbound user action
    pub fn is_action_failed(&self) -> bool {
        matches!(self, Self::ActionFailed { .. })
    }

    /// Check if this is a malformed inbound payload
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedPayload { .. })
    }

    /// Check if this is a config error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for DocketError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for DocketError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for DocketError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for DocketError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for DocketError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Conversion from anyhow::Error, used at the binary boundary
impl From<anyhow::Error> for DocketError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// A type alias for `Result<T, DocketError>`.
pub type Result<T> = std::result::Result<T, DocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_family() {
        assert!(DocketError::NotConnected.is_transport());
        assert!(DocketError::transport("refused").is_transport());
        assert!(DocketError::ConnectTimeout { after_secs: 10 }.is_transport());
        assert!(!DocketError::action_failed("mark_email_read", "down").is_transport());
    }

    #[test]
    fn test_display_messages() {
        let err = DocketError::malformed("new_emails", "missing timestamp");
        assert_eq!(
            err.to_string(),
            "Malformed 'new_emails' payload: missing timestamp"
        );

        let err = DocketError::Http {
            status: Some(503),
            message: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error (503): unavailable");

        let err = DocketError::Http {
            status: None,
            message: "dns".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error: dns");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: DocketError = json_err.into();
        assert!(matches!(err, DocketError::Serialization { ref format, .. } if format == "JSON"));
    }
}
