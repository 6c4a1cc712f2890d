// ABOUTME: Configuration loading for the procstore storage manager.
// ABOUTME: Reads store paths, retry budget, and retention windows from environment variables.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::retry::RetryPolicy;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid non-negative integer: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("PROCSTORE_MAX_RETRIES must be at least 1")]
    ZeroRetries,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub error_db_path: PathBuf,
    pub log_db_path: PathBuf,
    pub max_retries: u32,
    pub error_retention_days: u32,
    pub log_retention_hours: u32,
}

impl StoreConfig {
    pub const DEFAULT_ERROR_RETENTION_DAYS: u32 = 30;
    pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 168;

    /// Both stores in one file, with default retry and retention settings.
    pub fn at(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            error_db_path: path.clone(),
            log_db_path: path,
            max_retries: RetryPolicy::DEFAULT_MAX_RETRIES,
            error_retention_days: Self::DEFAULT_ERROR_RETENTION_DAYS,
            log_retention_hours: Self::DEFAULT_LOG_RETENTION_HOURS,
        }
    }

    /// Keep logs in a separate file from errors.
    pub fn with_log_db(mut self, path: impl AsRef<Path>) -> Self {
        self.log_db_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - PROCSTORE_HOME: data directory (default: ~/.procstore)
    /// - PROCSTORE_ERROR_DB: error store file (default: $PROCSTORE_HOME/procstore.db)
    /// - PROCSTORE_LOG_DB: log store file (default: same as the error store)
    /// - PROCSTORE_MAX_RETRIES: attempts per mutation (default: 3)
    /// - PROCSTORE_ERROR_RETENTION_DAYS: error retention (default: 30)
    /// - PROCSTORE_LOG_RETENTION_HOURS: log retention (default: 168)
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = std::env::var("PROCSTORE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".procstore")
            });

        let error_db_path = std::env::var("PROCSTORE_ERROR_DB")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("procstore.db"));

        let log_db_path = std::env::var("PROCSTORE_LOG_DB")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| error_db_path.clone());

        let max_retries = env_u32("PROCSTORE_MAX_RETRIES", RetryPolicy::DEFAULT_MAX_RETRIES)?;
        if max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }

        Ok(Self {
            error_db_path,
            log_db_path,
            max_retries,
            error_retention_days: env_u32(
                "PROCSTORE_ERROR_RETENTION_DAYS",
                Self::DEFAULT_ERROR_RETENTION_DAYS,
            )?,
            log_retention_hours: env_u32(
                "PROCSTORE_LOG_RETENTION_HOURS",
                Self::DEFAULT_LOG_RETENTION_HOURS,
            )?,
        })
    }
}

fn env_u32(var: &'static str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 6] = [
        "PROCSTORE_HOME",
        "PROCSTORE_ERROR_DB",
        "PROCSTORE_LOG_DB",
        "PROCSTORE_MAX_RETRIES",
        "PROCSTORE_ERROR_RETENTION_DAYS",
        "PROCSTORE_LOG_RETENTION_HOURS",
    ];

    fn clear_env() {
        // SAFETY: test-only code; every test touching these variables runs in this one test fn
        unsafe {
            for var in VARS {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn config_from_env() {
        clear_env();
        let config = StoreConfig::from_env().unwrap();
        assert!(config.error_db_path.to_string_lossy().contains(".procstore"));
        assert_eq!(config.log_db_path, config.error_db_path);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.error_retention_days, 30);
        assert_eq!(config.log_retention_hours, 168);

        // SAFETY: test-only code, see clear_env
        unsafe {
            std::env::set_var("PROCSTORE_HOME", "/var/lib/procstore");
            std::env::set_var("PROCSTORE_LOG_DB", "/var/lib/procstore/logs.db");
            std::env::set_var("PROCSTORE_MAX_RETRIES", "5");
        }
        let config = StoreConfig::from_env().unwrap();
        assert_eq!(config.error_db_path, PathBuf::from("/var/lib/procstore/procstore.db"));
        assert_eq!(config.log_db_path, PathBuf::from("/var/lib/procstore/logs.db"));
        assert_eq!(config.max_retries, 5);

        // SAFETY: test-only code, see clear_env
        unsafe {
            std::env::set_var("PROCSTORE_MAX_RETRIES", "0");
        }
        assert!(matches!(StoreConfig::from_env(), Err(ConfigError::ZeroRetries)));

        // SAFETY: test-only code, see clear_env
        unsafe {
            std::env::set_var("PROCSTORE_MAX_RETRIES", "lots");
        }
        let err = StoreConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("PROCSTORE_MAX_RETRIES"), "{err}");

        clear_env();
    }

    #[test]
    fn at_uses_one_file_for_both_stores() {
        let config = StoreConfig::at("/data/store.db");
        assert_eq!(config.log_db_path, PathBuf::from("/data/store.db"));
        let split = config.with_log_db("/data/logs.db");
        assert_eq!(split.error_db_path, PathBuf::from("/data/store.db"));
        assert_eq!(split.log_db_path, PathBuf::from("/data/logs.db"));
    }
}
