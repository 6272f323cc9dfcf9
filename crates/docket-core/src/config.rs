//! Configuration model for the notification pipeline.
//!
//! Every field has a default so a partial (or missing) `config.toml` still
//! yields a usable configuration. Loading and env overrides live in
//! `docket-infrastructure::ConfigService`.

use crate::error::{DocketError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct NotificationConfig {
    pub endpoint: EndpointConfig,
    pub toast: ToastSettings,
    pub health: HealthSettings,
    pub transport: TransportSettings,
    pub logging: LogSettings,
}

impl NotificationConfig {
    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.base_url.trim().is_empty() {
            return Err(DocketError::config("endpoint.base_url must not be empty"));
        }
        if self.toast.visibility_secs == 0 {
            return Err(DocketError::config("toast.visibility_secs must be > 0"));
        }
        if self.toast.capacity == 0 {
            return Err(DocketError::config("toast.capacity must be > 0"));
        }
        if self.health.poll_interval_secs == 0 {
            return Err(DocketError::config("health.poll_interval_secs must be > 0"));
        }
        if self.health.max_backoff_secs < self.health.poll_interval_secs {
            return Err(DocketError::config(
                "health.max_backoff_secs must be >= health.poll_interval_secs",
            ));
        }
        if self.transport.connect_timeout_secs == 0 {
            return Err(DocketError::config(
                "transport.connect_timeout_secs must be > 0",
            ));
        }
        Ok(())
    }
}

/// Where the notification server lives: base URL plus namespace path.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub namespace: String,
}

impl EndpointConfig {
    /// Full connection URL (`base_url` joined with `namespace`).
    pub fn url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let namespace = self.namespace.trim_start_matches('/');
        if namespace.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{namespace}")
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            namespace: "/chat".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ToastSettings {
    /// How long a toast stays visible before it expires.
    pub visibility_secs: u64,
    /// Max concurrently tracked toasts; the oldest is evicted beyond this.
    pub capacity: usize,
}

impl ToastSettings {
    pub fn visibility(&self) -> Duration {
        Duration::from_secs(self.visibility_secs)
    }
}

impl Default for ToastSettings {
    fn default() -> Self {
        Self {
            visibility_secs: 8,
            capacity: 10,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HealthSettings {
    pub poll_interval_secs: u64,
    /// Reconnect from the poller when the transport is found down.
    pub auto_reconnect: bool,
    /// Upper bound of the delay between failed automatic reconnects.
    pub max_backoff_secs: u64,
}

impl HealthSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            auto_reconnect: true,
            max_backoff_secs: 60,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransportSettings {
    pub connect_timeout_secs: u64,
    /// Pull an authoritative email count whenever the server reports a status change.
    pub refresh_on_status_update: bool,
}

impl TransportSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            refresh_on_status_update: true,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or `docket_application=debug`.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
