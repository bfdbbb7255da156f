//! Configuration file parser for ~/.config/feedstore/config.toml.
//!
//! The config file is optional: a missing or empty file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as likely typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level configuration. Any subset of keys may be given.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Relative paths are resolved against the working directory.
    pub database_path: Option<PathBuf>,

    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,

    /// Messages per transaction when applying batch files; larger batches are split.
    pub max_batch_size: usize,

    /// Physically delete read, non-important messages after `apply`.
    pub purge_read_after_apply: bool,

    /// Delete non-important messages older than this many days after `apply` (0 = never).
    pub purge_older_than_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            log_filter: "info".to_string(),
            max_batch_size: 500,
            purge_read_after_apply: false,
            purge_older_than_days: 0,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MiB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "database_path",
        "log_filter",
        "max_batch_size",
        "purge_read_after_apply",
        "purge_older_than_days",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Larger than 1 MiB → `Err(ConfigError::TooLarge)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), max_batch_size = config.max_batch_size, "Loaded configuration");
        Ok(config)
    }

    /// Batch size actually used for chunking; zero is treated as one.
    pub fn batch_size(&self) -> usize {
        self.max_batch_size.max(1)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("feedstore_config_{name}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database_path.is_none());
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.max_batch_size, 500);
        assert!(!config.purge_read_after_apply);
        assert_eq!(config.purge_older_than_days, 0);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedstore_test_nonexistent_config.toml");
        assert_eq!(Config::load(path).unwrap(), Config::default());
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "max_batch_size = 50\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.log_filter, "info");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/feedstore/feeds.db"
log_filter = "feedstore=debug"
max_batch_size = 100
purge_read_after_apply = true
purge_older_than_days = 30
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/var/lib/feedstore/feeds.db"))
        );
        assert_eq!(config.log_filter, "feedstore=debug");
        assert_eq!(config.max_batch_size, 100);
        assert!(config.purge_read_after_apply);
        assert_eq!(config.purge_older_than_days, 30);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (dir, path) = write_config("unknown", "log_filter = \"warn\"\ntotally_fake_key = 1\n");
        assert_eq!(Config::load(&path).unwrap().log_filter, "warn");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "max_batch_size = \"many\"\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let config = Config {
            max_batch_size: 0,
            ..Config::default()
        };
        assert_eq!(config.batch_size(), 1);
    }
}
