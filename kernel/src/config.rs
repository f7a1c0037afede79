// Feed Configuration
//
// Runtime settings for a file-backed feed, loaded from JSON.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Feed configuration. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// JSON Lines file holding the feed entries.
    pub data_file: PathBuf,

    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl FeedConfig {
    /// Default built-in configuration (used if no config is provided).
    pub fn default_config() -> Self {
        Self {
            data_file: PathBuf::from("feedstore.jsonl"),
            log_filter: "feedstore=info".into(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: FeedConfig =
            serde_json::from_str(r#"{ "data_file": "/var/lib/feed.jsonl" }"#).unwrap();

        assert_eq!(config.data_file, PathBuf::from("/var/lib/feed.jsonl"));
        assert_eq!(config.log_filter, "feedstore=info");
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let missing = std::env::temp_dir().join("feedstore-config-does-not-exist.json");
        assert!(matches!(FeedConfig::load(missing), Err(ConfigError::Io(_))));
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(serde_json::from_str::<FeedConfig>(r#"{ "data_file": 3 }"#).is_err());
    }
}
