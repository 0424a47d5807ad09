//! Configuration loading for ragops.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/ragops/config.toml`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::TypesError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB run-state directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Base URL of the queue service HTTP API
    #[serde(default = "default_queue_url")]
    pub queue_url: String,

    /// Base URL of the vector backend HTTP API
    #[serde(default = "default_vector_url")]
    pub vector_url: String,

    /// Directory documents are discovered from
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,

    /// Embedding dimension
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,

    /// Prefix for collection and alias names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Topic carrying build and replay messages
    #[serde(default = "default_build_topic")]
    pub build_topic: String,

    /// Topic carrying rollback messages
    #[serde(default = "default_control_topic")]
    pub control_topic: String,

    /// Consumer group shared by worker instances
    #[serde(default = "default_worker_group")]
    pub worker_group: String,

    /// Lease duration requested when consuming
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    /// First reconnect delay after a transport failure
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Reconnect delay ceiling
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Consecutive transport failures before a consumer loop gives up (0 = never)
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Points per upsert request
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "ragops")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data/db"))
        .to_string_lossy()
        .to_string()
}

fn default_queue_url() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_docs_dir() -> String {
    "./data/docs".to_string()
}

fn default_embed_dim() -> usize {
    16
}

fn default_name_prefix() -> String {
    "demo".to_string()
}

fn default_build_topic() -> String {
    "demo.rag.build".to_string()
}

fn default_control_topic() -> String {
    "demo.rag.control".to_string()
}

fn default_worker_group() -> String {
    "demo-rag-worker".to_string()
}

fn default_lease_ms() -> u64 {
    30_000
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    15_000
}

fn default_max_consecutive_failures() -> u32 {
    10
}

fn default_upsert_batch_size() -> usize {
    128
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            queue_url: default_queue_url(),
            vector_url: default_vector_url(),
            docs_dir: default_docs_dir(),
            embed_dim: default_embed_dim(),
            name_prefix: default_name_prefix(),
            build_topic: default_build_topic(),
            control_topic: default_control_topic(),
            worker_group: default_worker_group(),
            lease_ms: default_lease_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            upsert_batch_size: default_upsert_batch_size(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/ragops/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (RAGOPS_*, e.g. RAGOPS_DB_PATH)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, TypesError> {
        let config_dir = ProjectDirs::from("", "", "ragops")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("RAGOPS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| TypesError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| TypesError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.embed_dim == 0 {
            return Err(TypesError::Config("embed_dim must be > 0".to_string()));
        }
        if self.upsert_batch_size == 0 {
            return Err(TypesError::Config("upsert_batch_size must be > 0".to_string()));
        }
        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            return Err(TypesError::Config(format!(
                "backoff must satisfy 0 < initial <= max, got {} / {}",
                self.backoff_initial_ms, self.backoff_max_ms
            )));
        }
        if self.build_topic == self.control_topic {
            return Err(TypesError::Config(
                "build_topic and control_topic must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand ~ in docs_dir to the home directory
    pub fn expanded_docs_dir(&self) -> PathBuf {
        expand_home(&self.docs_dir)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
