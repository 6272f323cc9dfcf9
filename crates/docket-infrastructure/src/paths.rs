//! Path management for docket configuration files.
//!
//! Paths are resolved with the `dirs` crate so they follow the platform
//! conventions (XDG on Linux, `Library/Application Support` on macOS, ...).

use docket_core::DocketError;
use std::path::PathBuf;

const APP_DIR: &str = "docket";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// The platform config directory could not be determined.
    ConfigDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::ConfigDirNotFound => write!(f, "Cannot find config directory"),
        }
    }
}

impl std::error::Error for PathError {}

impl From<PathError> for DocketError {
    fn from(err: PathError) -> Self {
        DocketError::config(err.to_string())
    }
}

/// Path management for docket.
///
/// # Directory Structure
///
/// ```text
/// ~/.config/docket/            # Config directory
/// ├── config.toml              # Pipeline configuration
/// └── logs/                    # Rolling log files written by the CLI
///     └── docket.log.YYYY-MM-DD
/// ```
pub struct DocketPaths;

impl DocketPaths {
    /// Returns the docket configuration directory (e.g. `~/.config/docket/`).
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::ConfigDirNotFound)
    }

    /// Returns the path to the main configuration file.
    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Returns the path to the logs directory.
    pub fn logs_dir() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file() {
        let Ok(config_file) = DocketPaths::config_file() else {
            // No home directory in this environment
            return;
        };
        assert!(config_file.ends_with("docket/config.toml"));
        let config_dir = DocketPaths::config_dir().unwrap();
        assert!(config_file.starts_with(&config_dir));
    }

    #[test]
    fn test_logs_dir() {
        let Ok(logs_dir) = DocketPaths::logs_dir() else {
            return;
        };
        assert!(logs_dir.ends_with("logs"));
        assert!(logs_dir.starts_with(DocketPaths::config_dir().unwrap()));
    }

    #[test]
    fn test_path_error_maps_to_config_error() {
        let err: DocketError = PathError::ConfigDirNotFound.into();
        assert!(err.is_config());
    }
}
