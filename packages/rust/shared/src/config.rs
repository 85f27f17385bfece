//! Application configuration for Specter.
//!
//! User config lives at `~/.specter/specter.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecterError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "specter.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".specter";

// ---------------------------------------------------------------------------
// Config structs (matching specter.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Search collaborator settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Context-fetch collaborator settings.
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Generation collaborator settings.
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the libSQL database backing the enrichment cache.
    #[serde(default = "default_cache_db")]
    pub cache_db: String,

    /// Model used when `[generation]` does not name one.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            cache_db: default_cache_db(),
            model: default_model(),
        }
    }
}

impl DefaultsConfig {
    /// The cache database path with a leading `~` expanded.
    pub fn cache_db_path(&self) -> PathBuf {
        expand_home(&self.cache_db)
    }
}

fn default_cache_db() -> String {
    "~/.specter/cache.db".into()
}
fn default_model() -> String {
    "webai-llm".into()
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_search_engine")]
    pub engine: String,

    /// Number of organic results kept per query.
    #[serde(default = "default_num_results")]
    pub num_results: usize,

    /// Query used when no facts are available.
    #[serde(default = "default_query")]
    pub default_query: String,

    /// Drop results that do not mention class-action terms.
    #[serde(default)]
    pub require_class_action_terms: bool,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            endpoint: default_search_endpoint(),
            engine: default_search_engine(),
            num_results: default_num_results(),
            default_query: default_query(),
            require_class_action_terms: false,
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_search_key_env() -> String {
    "SERPAPI_API_KEY".into()
}
fn default_search_endpoint() -> String {
    "https://serpapi.com/search.json".into()
}
fn default_search_engine() -> String {
    "google".into()
}
fn default_num_results() -> usize {
    5
}
fn default_query() -> String {
    "class action lawsuit settlement".into()
}
fn default_search_timeout() -> u64 {
    20
}

/// `[scrape]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_scrape_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_scrape_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_scrape_timeout")]
    pub timeout_secs: u64,

    /// Milliseconds the collaborator waits for the page to settle.
    #[serde(default = "default_wait_for")]
    pub wait_for_ms: u64,

    /// Upper bound on concurrent fetches. Unset means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_scrape_key_env(),
            endpoint: default_scrape_endpoint(),
            timeout_secs: default_scrape_timeout(),
            wait_for_ms: default_wait_for(),
            max_concurrency: None,
        }
    }
}

fn default_scrape_key_env() -> String {
    "FIRECRAWL_API_KEY".into()
}
fn default_scrape_endpoint() -> String {
    "https://api.firecrawl.dev/v1/scrape".into()
}
fn default_scrape_timeout() -> u64 {
    60
}
fn default_wait_for() -> u64 {
    5000
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model id. Falls back to `[defaults] model` when empty.
    #[serde(default)]
    pub model: String,

    /// Name of the env var holding an optional API key.
    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: String::new(),
            api_key_env: default_generation_key_env(),
            temperature: None,
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080/v1".into()
}
fn default_generation_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_generation_timeout() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Runtime options (derived from config, overridable by CLI flags)
// ---------------------------------------------------------------------------

/// Runtime search options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub engine: String,
    pub num_results: usize,
    pub default_query: String,
    pub require_class_action_terms: bool,
    pub timeout: Duration,
}

impl From<&AppConfig> for SearchOptions {
    fn from(config: &AppConfig) -> Self {
        let search = &config.search;
        Self {
            endpoint: search.endpoint.clone(),
            api_key: resolve_api_key(&search.api_key_env),
            engine: search.engine.clone(),
            num_results: search.num_results,
            default_query: search.default_query.clone(),
            require_class_action_terms: search.require_class_action_terms,
            timeout: Duration::from_secs(search.timeout_secs),
        }
    }
}

/// Runtime context-fetch options.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub wait_for_ms: u64,
    pub max_concurrency: Option<usize>,
}

impl From<&AppConfig> for ScrapeOptions {
    fn from(config: &AppConfig) -> Self {
        let scrape = &config.scrape;
        Self {
            endpoint: scrape.endpoint.clone(),
            api_key: resolve_api_key(&scrape.api_key_env),
            timeout: Duration::from_secs(scrape.timeout_secs),
            wait_for_ms: scrape.wait_for_ms,
            max_concurrency: scrape.max_concurrency.filter(|n| *n > 0),
        }
    }
}

/// Runtime generation options.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl From<&AppConfig> for GenerationOptions {
    fn from(config: &AppConfig) -> Self {
        let generation = &config.generation;
        let model = if generation.model.trim().is_empty() {
            config.defaults.model.clone()
        } else {
            generation.model.clone()
        };
        Self {
            base_url: generation.base_url.trim_end_matches('/').to_string(),
            model,
            api_key: resolve_api_key(&generation.api_key_env),
            temperature: generation.temperature,
            timeout: Duration::from_secs(generation.timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.specter/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SpecterError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.specter/specter.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SpecterError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SpecterError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SpecterError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SpecterError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SpecterError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read an API key from the named env var. Empty values count as unset.
pub fn resolve_api_key(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Check that the named API key env var is set and non-empty.
pub fn validate_api_key(var_name: &str) -> Result<String> {
    resolve_api_key(var_name).ok_or_else(|| {
        SpecterError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))
    })
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
