//! Application configuration for DeepResearch.
//!
//! User config lives at `~/.deepresearch/deepresearch.toml`.
//! CLI flags override config file values, which override defaults.
//! API keys are never stored in the file, only the names of the env vars holding them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeepResearchError, Result};
use crate::types::SearchDepth;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "deepresearch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".deepresearch";

// ---------------------------------------------------------------------------
// Config structs (matching deepresearch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Web search settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Page extraction settings.
    #[serde(default)]
    pub extract: ExtractConfig,

    /// OpenRouter / LLM settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retry policy for collaborator network calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Async runner and progress streaming.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// HTTP server.
    #[serde(default)]
    pub server: ServerConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the research history database.
    #[serde(default = "default_history_db")]
    pub history_db: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            history_db: default_history_db(),
        }
    }
}

fn default_history_db() -> String {
    "~/.deepresearch/history.db".into()
}

impl DefaultsConfig {
    /// Resolve `history_db`, expanding a leading `~/`.
    pub fn history_db_path(&self) -> Result<PathBuf> {
        expand_home(&self.history_db)
    }
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the Tavily API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Search API base URL.
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Results requested per query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Search depth passed to the provider.
    #[serde(default)]
    pub depth: SearchDepth,

    /// Number of search queries generated per question.
    #[serde(default = "default_queries_per_question")]
    pub queries_per_question: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            base_url: default_search_base_url(),
            max_results: default_max_results(),
            depth: SearchDepth::default(),
            queries_per_question: default_queries_per_question(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_search_key_env() -> String {
    "TAVILY_API_KEY".into()
}
fn default_search_base_url() -> String {
    "https://api.tavily.com".into()
}
fn default_max_results() -> usize {
    5
}
fn default_queries_per_question() -> usize {
    3
}
fn default_search_timeout() -> u64 {
    20
}

/// `[extract]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Maximum number of distinct URLs extracted per question.
    #[serde(default = "default_max_urls")]
    pub max_urls: usize,

    /// Page fetch timeout in seconds.
    #[serde(default = "default_extract_timeout")]
    pub timeout_secs: u64,

    /// Extracted text is truncated to this many characters.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_urls: default_max_urls(),
            timeout_secs: default_extract_timeout(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_max_urls() -> usize {
    5
}
fn default_extract_timeout() -> u64 {
    10
}
fn default_max_content_chars() -> usize {
    10_000
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model used for every generation step.
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature for summarization and fact checking.
    #[serde(default = "default_research_temperature")]
    pub research_temperature: f32,

    /// Temperature for drafting and finalizing.
    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,

    /// Per-source excerpt length fed into prompts.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_base_url(),
            model: default_model(),
            research_temperature: default_research_temperature(),
            answer_temperature: default_answer_temperature(),
            excerpt_chars: default_excerpt_chars(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "google/gemini-2.5-pro".into()
}
fn default_research_temperature() -> f32 {
    0.1
}
fn default_answer_temperature() -> f32 {
    0.2
}
fn default_excerpt_chars() -> usize {
    5_000
}
fn default_llm_timeout() -> u64 {
    120
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay between attempts.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    4_000
}

/// `[runner]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Pipelines executing at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Submitted tasks allowed to wait for a worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Idle time after which the stream emits a heartbeat.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// How long a finished, never-consumed task stays registered.
    #[serde(default = "default_task_retention")]
    pub task_retention_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_capacity: default_queue_capacity(),
            heartbeat_ms: default_heartbeat_ms(),
            task_retention_secs: default_task_retention(),
        }
    }
}

/// Accepted range for `[runner].heartbeat_ms`.
pub const HEARTBEAT_MS_RANGE: std::ops::Range<u64> = 10..1000;

impl RunnerConfig {
    /// Heartbeat interval, clamped into [`HEARTBEAT_MS_RANGE`].
    pub fn heartbeat_interval(&self) -> Duration {
        let ms = self
            .heartbeat_ms
            .clamp(HEARTBEAT_MS_RANGE.start, HEARTBEAT_MS_RANGE.end - 1);
        Duration::from_millis(ms)
    }

    /// Reject settings the runner cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !HEARTBEAT_MS_RANGE.contains(&self.heartbeat_ms) {
            return Err(DeepResearchError::config(format!(
                "runner.heartbeat_ms must be in {}..{} ms, got {}",
                HEARTBEAT_MS_RANGE.start, HEARTBEAT_MS_RANGE.end, self.heartbeat_ms
            )));
        }
        Ok(())
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }
}

fn default_max_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    16
}
fn default_heartbeat_ms() -> u64 {
    500
}
fn default_task_retention() -> u64 {
    300
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    5000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.deepresearch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DeepResearchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.deepresearch/deepresearch.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| DeepResearchError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        DeepResearchError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.runner.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DeepResearchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DeepResearchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DeepResearchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a non-empty API key from the env var named `var_name`.
pub fn read_api_key(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(DeepResearchError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| DeepResearchError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("history_db"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("TAVILY_API_KEY"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[runner]
max_workers = 2

[search]
depth = "advanced"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.runner.max_workers, 2);
        assert_eq!(config.runner.queue_capacity, 16);
        assert_eq!(config.runner.heartbeat_interval(), Duration::from_millis(500));
        assert_eq!(config.search.depth, SearchDepth::Advanced);
        assert_eq!(config.search.queries_per_question, 3);
        assert_eq!(config.extract.max_urls, 5);
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn heartbeat_outside_range_is_rejected() {
        for ms in [0, 1000, 60_000] {
            let runner = RunnerConfig {
                heartbeat_ms: ms,
                ..RunnerConfig::default()
            };
            assert!(runner.validate().is_err(), "{ms}");
        }
        for ms in [10, 500, 999] {
            let runner = RunnerConfig {
                heartbeat_ms: ms,
                ..RunnerConfig::default()
            };
            assert!(runner.validate().is_ok(), "{ms}");
        }
    }

    #[test]
    fn heartbeat_interval_is_clamped() {
        let idle = |ms| {
            RunnerConfig {
                heartbeat_ms: ms,
                ..RunnerConfig::default()
            }
            .heartbeat_interval()
        };
        assert_eq!(idle(0), Duration::from_millis(10));
        assert_eq!(idle(60_000), Duration::from_millis(999));
        assert_eq!(idle(250), Duration::from_millis(250));
    }

    #[test]
    fn loading_zero_heartbeat_fails() {
        let path = std::env::temp_dir().join(format!(
            "dr_config_{}.toml",
            uuid::Uuid::now_v7()
        ));
        std::fs::write(&path, "[runner]\nheartbeat_ms = 0\n").unwrap();
        let result = load_config_from(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(DeepResearchError::Config { .. })));
    }

    #[test]
    fn api_key_lookup() {
        // Use a unique env var name to avoid interfering with other tests
        let result = read_api_key("DR_TEST_NONEXISTENT_KEY_12345");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn history_path_expands_home() {
        let defaults = DefaultsConfig {
            history_db: "/tmp/history.db".into(),
        };
        assert_eq!(
            defaults.history_db_path().unwrap(),
            PathBuf::from("/tmp/history.db")
        );

        let home_relative = DefaultsConfig::default().history_db_path().unwrap();
        assert!(home_relative.ends_with(".deepresearch/history.db"));
    }
}
