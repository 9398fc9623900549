//! Configuration management for vecbase

use crate::constants::{
    APPROX_SEARCH_THRESHOLD, CACHE_MAX_ENTRIES, CACHE_MEMORY_LIMIT, CACHE_TTL_SECS,
    DEFAULT_CANDIDATE_FACTOR, DEFAULT_K,
};
use crate::error::{Result, VecBaseError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the durable store file.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = get_default_data_dir()
            .map(|d| d.join("vecbase.db"))
            .unwrap_or_else(|| PathBuf::from("vecbase.db"));

        Self { path }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding provider; overridden per call by a
    /// non-empty `proxy_url`.
    pub base_url: String,

    /// Default model for new collections.
    pub default_model: String,

    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            default_model: "nomic-embed-text".to_string(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of collections held in the cache.
    pub max_entries: usize,

    /// Aggregate memory ceiling in bytes.
    pub max_bytes: u64,

    /// Entry time-to-live in seconds.
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: CACHE_MAX_ENTRIES,
            max_bytes: CACHE_MEMORY_LIMIT,
            ttl_seconds: CACHE_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results to return.
    pub default_top_k: usize,

    /// Corpus size at which the centroid index takes over from exact scan.
    pub approximate_threshold: usize,

    /// Cluster over-probing multiplier for approximate search.
    pub candidate_factor: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_K,
            approximate_threshold: APPROX_SEARCH_THRESHOLD,
            candidate_factor: DEFAULT_CANDIDATE_FACTOR,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| VecBaseError::Config(format!("Failed to read config file: {e}")))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| VecBaseError::Config(format!("Failed to parse config file: {e}")))?;

        Ok(config)
    }

    /// Load configuration with the following precedence:
    /// 1. Provided config file path
    /// 2. Default config location (~/.config/vecbase/config.toml)
    /// 3. Built-in defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::from_file(&path);
        }

        if let Some(default_path) = get_default_config_path() {
            if default_path.exists() {
                return Self::from_file(&default_path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VecBaseError::Config(format!("Failed to create config directory: {e}"))
            })?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| VecBaseError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents)
            .map_err(|e| VecBaseError::Config(format!("Failed to write config file: {e}")))?;

        Ok(())
    }
}

/// Get the default configuration directory path
pub fn get_default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "vecbase", "vecbase").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Get the default data directory path
pub fn get_default_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("io", "vecbase", "vecbase").map(|dirs| dirs.data_dir().to_path_buf())
}
