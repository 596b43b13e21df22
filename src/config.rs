//! TOML configuration parsing and validation.
//!
//! The host reads a single TOML file (default `./config/reply.toml`):
//!
//! ```toml
//! [db]
//! path = "./data/reply.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:7341"
//!
//! [storage]
//! backend = "sqlite"          # or "memory" for session-only state
//!
//! [cache]
//! capacity = 10
//!
//! [coordinator]
//! active_context = "host-active"  # or "requester"
//! purge_on_start = true
//!
//! [generation]
//! provider = "gemini"          # or "disabled"
//! model = "gemini-2.0-flash"
//! api_key_env = "GEMINI_API_KEY"
//!
//! [generation.pricing]
//! input_per_million = 0.10
//! output_per_million = 0.40
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use reply_companion_core::artifact_cache::DEFAULT_CAPACITY;

use crate::coordinator::ActiveContextPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub active_context: ActiveContextPolicy,
    /// Forget every context's post when the host starts. Context ids from
    /// a previous browser session do not refer to live tabs.
    #[serde(default = "default_true")]
    pub purge_on_start: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            active_context: ActiveContextPolicy::default(),
            purge_on_start: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub pricing: PricingConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            pricing: PricingConfig::default(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

/// USD per million tokens.
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct PricingConfig {
    #[serde(default)]
    pub input_per_million: f64,
    #[serde(default)]
    pub output_per_million: f64,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    if config.cache.capacity == 0 {
        anyhow::bail!("cache.capacity must be > 0");
    }

    let pricing = &config.generation.pricing;
    if pricing.input_per_million < 0.0 || pricing.output_per_million < 0.0 {
        anyhow::bail!("generation.pricing values must be >= 0");
    }

    match config.generation.provider.as_str() {
        "disabled" => {}
        "gemini" => {
            if config.generation.model.is_none() {
                anyhow::bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    Ok(config)
}
