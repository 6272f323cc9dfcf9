//! Configuration service implementation.
//!
//! This module provides a ConfigService that loads the pipeline configuration
//! from the configuration file (~/.config/docket/config.toml), applies
//! environment overrides and caches the result.

use crate::paths::DocketPaths;
use docket_core::config::NotificationConfig;
use docket_core::{DocketError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Overrides `endpoint.base_url`.
pub const ENV_API_URL: &str = "DOCKET_API_URL";
/// Overrides `endpoint.namespace`.
pub const ENV_NAMESPACE: &str = "DOCKET_NAMESPACE";
/// Overrides `logging.level`.
pub const ENV_LOG: &str = "DOCKET_LOG";

/// Configuration service that loads and caches the pipeline configuration.
///
/// A missing file is not an error: defaults are used. A file that exists but
/// does not parse, or a configuration that fails validation, is.
#[derive(Debug, Clone)]
pub struct ConfigService {
    /// Explicit config file; `None` means the platform default.
    path: Option<PathBuf>,
    /// Replaces the process environment (tests).
    env: Option<HashMap<String, String>>,
    /// Cached configuration loaded from file.
    /// Uses RwLock for thread-safe lazy loading.
    config: Arc<RwLock<Option<NotificationConfig>>>,
}

impl ConfigService {
    /// Creates a ConfigService reading the default config file.
    ///
    /// The configuration is loaded lazily on first access.
    pub fn new() -> Self {
        Self {
            path: None,
            env: None,
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Creates a ConfigService reading `path` instead of the default file.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new()
        }
    }

    /// Uses `vars` instead of the process environment for overrides.
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    /// The config file this service reads.
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(DocketPaths::config_file()?),
        }
    }

    /// Gets the configuration, loading from file if not cached.
    pub fn get_config(&self) -> Result<NotificationConfig> {
        // Check if already cached
        {
            let read_lock = self.config.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(ref cached) = *read_lock {
                return Ok(cached.clone());
            }
        }

        let loaded = self.load()?;

        // Cache it
        {
            let mut write_lock = self.config.write().unwrap_or_else(PoisonError::into_inner);
            *write_lock = Some(loaded.clone());
        }

        Ok(loaded)
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut write_lock = self.config.write().unwrap_or_else(PoisonError::into_inner);
        *write_lock = None;
    }

    fn load(&self) -> Result<NotificationConfig> {
        let path = self.config_path()?;
        let mut config = read_config_file(&path)?;
        self.apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn var(&self, name: &str) -> Option<String> {
        let value = match &self.env {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    fn apply_env_overrides(&self, config: &mut NotificationConfig) {
        if let Some(url) = self.var(ENV_API_URL) {
            debug!("[Config] {} overrides endpoint.base_url", ENV_API_URL);
            config.endpoint.base_url = url;
        }
        if let Some(namespace) = self.var(ENV_NAMESPACE) {
            debug!("[Config] {} overrides endpoint.namespace", ENV_NAMESPACE);
            config.endpoint.namespace = namespace;
        }
        if let Some(level) = self.var(ENV_LOG) {
            config.logging.level = level;
        }
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

fn read_config_file(path: &Path) -> Result<NotificationConfig> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            info!("[Config] Loaded {}", path.display());
            toml::from_str(&content).map_err(DocketError::from)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("[Config] {} not found, using defaults", path.display());
            Ok(NotificationConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let service =
            ConfigService::with_path(temp_dir.path().join("config.toml")).with_env(no_env());

        let config = service.get_config().unwrap();
        assert_eq!(config, NotificationConfig::default());
        assert_eq!(config.endpoint.url(), "http://localhost:3001/chat");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[endpoint]
base_url = "https://api.firm.example"

[toast]
visibility_secs = 10
"#,
        )
        .unwrap();

        let config = ConfigService::with_path(&path)
            .with_env(no_env())
            .get_config()
            .unwrap();
        assert_eq!(config.endpoint.url(), "https://api.firm.example/chat");
        assert_eq!(config.toast.visibility_secs, 10);
        assert_eq!(config.toast.capacity, 10);
        assert_eq!(config.health.poll_interval_secs, 5);
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[endpoint]\nbase_url = \"http://file.example\"\n").unwrap();

        let env = HashMap::from([
            (ENV_API_URL.to_string(), "http://env.example".to_string()),
            (ENV_NAMESPACE.to_string(), "/notify".to_string()),
            (ENV_LOG.to_string(), "debug".to_string()),
        ]);
        let config = ConfigService::with_path(&path)
            .with_env(env)
            .get_config()
            .unwrap();

        assert_eq!(config.endpoint.url(), "http://env.example/notify");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        fs::write(&path, "[toast\nvisibility_secs = ").unwrap();
        let err = ConfigService::with_path(&path)
            .with_env(no_env())
            .get_config()
            .unwrap_err();
        assert!(matches!(err, DocketError::Serialization { .. }));

        fs::write(&path, "[toast]\ncapacity = 0\n").unwrap();
        let err = ConfigService::with_path(&path)
            .with_env(no_env())
            .get_config()
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_cache_until_invalidated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[health]\npoll_interval_secs = 3\n").unwrap();

        let service = ConfigService::with_path(&path).with_env(no_env());
        assert_eq!(service.get_config().unwrap().health.poll_interval_secs, 3);

        fs::write(&path, "[health]\npoll_interval_secs = 7\n").unwrap();
        assert_eq!(service.get_config().unwrap().health.poll_interval_secs, 3);

        service.invalidate_cache();
        assert_eq!(service.get_config().unwrap().health.poll_interval_secs, 7);
    }
}
