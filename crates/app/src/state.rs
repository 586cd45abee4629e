use std::{fs, path::PathBuf};

use common::prelude::RebroadcastPolicy;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "dcache";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CACHE_FILE_NAME: &str = "cache.bin";

/// ACL applied to one bucket when the node starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketAcl {
    pub path: Vec<String>,
    #[serde(default)]
    pub allowed: Vec<String>,
}

impl BucketAcl {
    fn new(path: &str, allowed: &[&str]) -> Self {
        Self {
            path: vec![path.to_string()],
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebroadcastConfig {
    /// Buckets whose valid data gets re-proposed
    #[serde(default = "default_rebroadcast_buckets")]
    pub buckets: Vec<Vec<String>>,
    /// Channels to re-propose on
    #[serde(default = "default_rebroadcast_channels")]
    pub channels: Vec<String>,
    #[serde(flatten)]
    pub policy: RebroadcastPolicy,
}

fn default_rebroadcast_buckets() -> Vec<Vec<String>> {
    ["peer", "trusted", "admin", "networks", "files", "uploads"]
        .iter()
        .map(|name| vec![name.to_string()])
        .collect()
}

fn default_rebroadcast_channels() -> Vec<String> {
    vec!["stdout".to_string()]
}

impl Default for RebroadcastConfig {
    fn default() -> Self {
        Self {
            buckets: default_rebroadcast_buckets(),
            channels: default_rebroadcast_channels(),
            policy: RebroadcastPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default tracing level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds between passes dropping expired windows
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Seconds between writes of the local cache
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Seconds between rebroadcast rounds
    #[serde(default = "default_rebroadcast_interval_secs")]
    pub rebroadcast_interval_secs: u64,
    #[serde(default)]
    pub rebroadcast: RebroadcastConfig,
    /// Bucket ACLs applied at startup
    #[serde(default = "default_buckets")]
    pub buckets: Vec<BucketAcl>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_rebroadcast_interval_secs() -> u64 {
    10
}

fn default_buckets() -> Vec<BucketAcl> {
    vec![
        BucketAcl::new("peer", &["peer"]),
        BucketAcl::new("trusted", &["admin"]),
        BucketAcl::new("admin", &[]),
        BucketAcl::new("summary", &[]),
        BucketAcl::new("networks", &["admin"]),
        BucketAcl::new("files", &[]),
        BucketAcl::new("uploads", &["trusted"]),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            rebroadcast_interval_secs: default_rebroadcast_interval_secs(),
            rebroadcast: RebroadcastConfig::default(),
            buckets: default_buckets(),
        }
    }
}

impl AppConfig {
    /// Configured level, `info` if it does not parse
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the dcache directory (~/.dcache)
    pub dcache_dir: PathBuf,
    /// Path to the local cache
    pub cache_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the dcache directory path (custom or default ~/.dcache)
    pub fn dcache_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new dcache state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let dcache_dir = Self::dcache_dir(custom_path)?;

        if dcache_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&dcache_dir)?;

        let config = config.unwrap_or_default();
        let config_path = dcache_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        // The cache itself is created by the node on first sync
        let cache_path = dcache_dir.join(CACHE_FILE_NAME);

        Ok(Self {
            dcache_dir,
            cache_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the dcache directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let dcache_dir = Self::dcache_dir(custom_path)?;

        if !dcache_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let cache_path = dcache_dir.join(CACHE_FILE_NAME);
        let config_path = dcache_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            dcache_dir,
            cache_path,
            config_path,
            config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("dcache directory not initialized. Run 'dcache init' first")]
    NotInitialized,

    #[error("dcache directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_load() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("node");

        let state = AppState::init(Some(dir.clone()), None).unwrap();
        assert_eq!(state.cache_path, dir.join(CACHE_FILE_NAME));

        let loaded = AppState::load(Some(dir.clone())).unwrap();
        assert_eq!(loaded.config, AppConfig::default());

        assert!(matches!(
            AppState::init(Some(dir), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_uninitialized() {
        let temp = TempDir::new().unwrap();
        let result = AppState::load(Some(temp.path().join("missing")));
        assert!(matches!(result, Err(StateError::NotInitialized)));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            log_level = "debug"

            [rebroadcast]
            channels = ["lan", "wan"]
            max_n = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        assert_eq!(config.rebroadcast.channels, vec!["lan", "wan"]);
        assert_eq!(config.rebroadcast.policy.max_n, 4);
        assert_eq!(config.rebroadcast.policy.min_delta, 30);
        assert_eq!(config.buckets.len(), 7);
        assert_eq!(config.sync_interval_secs, 30);
    }

    #[test]
    fn test_bad_level_falls_back() {
        let config = AppConfig {
            log_level: "loud".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }
}
