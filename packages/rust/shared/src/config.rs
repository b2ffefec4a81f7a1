//! Application configuration for repoctx.
//!
//! User config lives at `~/.repoctx/repoctx.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RepoCtxError, Result};
use crate::types::Tier;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "repoctx.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".repoctx";

// ---------------------------------------------------------------------------
// Config structs (matching repoctx.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub batch: BatchSection,

    #[serde(default)]
    pub generation: GenerationSection,

    #[serde(default)]
    pub filters: FiltersSection,

    #[serde(default)]
    pub textgen: TextGenSection,
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSection {
    /// Repositories processed at once.
    #[serde(default = "default_repo_concurrency")]
    pub repo_concurrency: usize,

    /// Artifacts rendered at once within one repository.
    #[serde(default = "default_artifact_concurrency")]
    pub artifact_concurrency: usize,

    /// Where per-repository artifact directories and the run report go.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Seconds in-flight jobs may keep running after cancellation.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Failure rate (0.0 - 1.0) above which the run exits non-zero.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            repo_concurrency: default_repo_concurrency(),
            artifact_concurrency: default_artifact_concurrency(),
            output_dir: default_output_dir(),
            grace_period_secs: default_grace_period(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_repo_concurrency() -> usize {
    4
}
fn default_artifact_concurrency() -> usize {
    8
}
fn default_output_dir() -> String {
    "repoctx-out".into()
}
fn default_grace_period() -> u64 {
    10
}
fn default_failure_threshold() -> f64 {
    0.1
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSection {
    /// Lowest-priority tier to generate. Critical artifacts are always attempted.
    #[serde(default = "default_max_tier")]
    pub max_tier: Tier,

    #[serde(default = "default_artifact_timeout")]
    pub artifact_timeout_secs: u64,

    /// Retries after a failed or timed-out attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Constant delay between attempts.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Whole-repository deadline; 0 disables it.
    #[serde(default)]
    pub repo_timeout_secs: u64,

    #[serde(default = "default_key_module_count")]
    pub key_module_count: usize,

    #[serde(default = "default_max_cycle_warnings")]
    pub max_cycle_warnings: usize,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            max_tier: default_max_tier(),
            artifact_timeout_secs: default_artifact_timeout(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff(),
            repo_timeout_secs: 0,
            key_module_count: default_key_module_count(),
            max_cycle_warnings: default_max_cycle_warnings(),
        }
    }
}

fn default_max_tier() -> Tier {
    Tier::High
}
fn default_artifact_timeout() -> u64 {
    300
}
fn default_retries() -> u32 {
    1
}
fn default_retry_backoff() -> u64 {
    250
}
fn default_key_module_count() -> usize {
    10
}
fn default_max_cycle_warnings() -> usize {
    25
}

/// `[filters]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersSection {
    /// Repository include patterns (glob, or substring of the repo name).
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Repository exclude patterns.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Source files larger than this are skipped during collection.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for FiltersSection {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

/// `[textgen]` section: the optional narrative collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextGenSection {
    #[serde(default)]
    pub enabled: bool,

    /// OpenAI-compatible API base (chat completions are posted below it).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_textgen_timeout")]
    pub timeout_secs: u64,

    /// Concurrent requests across the whole batch.
    #[serde(default = "default_textgen_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for TextGenSection {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            timeout_secs: default_textgen_timeout(),
            max_concurrent: default_textgen_max_concurrent(),
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_textgen_timeout() -> u64 {
    60
}
fn default_textgen_max_concurrent() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Batch config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime batch configuration. One immutable value shared by every worker.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub repo_concurrency: usize,
    pub artifact_concurrency: usize,
    pub max_tier: Tier,
    pub artifact_timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
    pub repo_timeout: Option<Duration>,
    pub grace_period: Duration,
    pub key_module_count: usize,
    pub max_cycle_warnings: usize,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_file_bytes: u64,
    pub output_dir: PathBuf,
    pub failure_threshold: f64,
    /// Skip repositories the ledger already records as `Done`.
    pub resume: bool,
    /// Re-run repositories even when `resume` would skip them.
    pub force: bool,
    /// Persist each repository's graph as `graph.json`.
    pub emit_graph: bool,
    pub textgen: TextGenSection,
}

impl From<&AppConfig> for BatchConfig {
    fn from(config: &AppConfig) -> Self {
        let generation = &config.generation;
        Self {
            repo_concurrency: config.batch.repo_concurrency,
            artifact_concurrency: config.batch.artifact_concurrency,
            max_tier: generation.max_tier,
            artifact_timeout: Duration::from_secs(generation.artifact_timeout_secs),
            retries: generation.retries,
            retry_backoff: Duration::from_millis(generation.retry_backoff_ms),
            repo_timeout: (generation.repo_timeout_secs > 0)
                .then(|| Duration::from_secs(generation.repo_timeout_secs)),
            grace_period: Duration::from_secs(config.batch.grace_period_secs),
            key_module_count: generation.key_module_count,
            max_cycle_warnings: generation.max_cycle_warnings,
            include_patterns: config.filters.include_patterns.clone(),
            exclude_patterns: config.filters.exclude_patterns.clone(),
            max_file_bytes: config.filters.max_file_bytes,
            output_dir: PathBuf::from(&config.batch.output_dir),
            failure_threshold: config.batch.failure_threshold,
            resume: false,
            force: false,
            emit_graph: false,
            textgen: config.textgen.clone(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl BatchConfig {
    /// Reject settings no job could run under. Called once, before scheduling.
    pub fn validate(&self) -> Result<()> {
        if self.repo_concurrency == 0 {
            return Err(RepoCtxError::config("repo_concurrency must be at least 1"));
        }
        if self.artifact_concurrency == 0 {
            return Err(RepoCtxError::config(
                "artifact_concurrency must be at least 1",
            ));
        }
        if self.artifact_timeout.is_zero() {
            return Err(RepoCtxError::config(
                "artifact_timeout_secs must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(RepoCtxError::config(format!(
                "failure_threshold must be between 0.0 and 1.0, got {}",
                self.failure_threshold
            )));
        }
        if self.textgen.enabled {
            url::Url::parse(&self.textgen.base_url).map_err(|e| {
                RepoCtxError::config(format!(
                    "invalid textgen base_url '{}': {e}",
                    self.textgen.base_url
                ))
            })?;
            if self.textgen.max_concurrent == 0 {
                return Err(RepoCtxError::config(
                    "textgen.max_concurrent must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.repoctx/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RepoCtxError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.repoctx/repoctx.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| RepoCtxError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RepoCtxError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RepoCtxError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RepoCtxError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RepoCtxError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the text-generation API key from the configured env var.
pub fn textgen_api_key(settings: &TextGenSection) -> Result<String> {
    let var_name = &settings.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(RepoCtxError::config(format!(
            "text generation is enabled but {var_name} is not set"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("repo_concurrency"));
        assert!(toml_str.contains("max_tier = \"high\""));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.batch.repo_concurrency, 4);
        assert_eq!(parsed.generation.retries, 1);
        assert_eq!(parsed.textgen.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let toml_str = r#"
[batch]
repo_concurrency = 16
artifact_concurrency = 12

[generation]
max_tier = "enhancement"
repo_timeout_secs = 600

[filters]
exclude_patterns = ["archive/**"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let batch = BatchConfig::from(&config);
        assert_eq!(batch.repo_concurrency, 16);
        assert_eq!(batch.artifact_concurrency, 12);
        assert_eq!(batch.max_tier, Tier::Enhancement);
        assert_eq!(batch.repo_timeout, Some(Duration::from_secs(600)));
        assert_eq!(batch.artifact_timeout, Duration::from_secs(300));
        assert_eq!(batch.exclude_patterns, vec!["archive/**".to_string()]);
    }

    #[test]
    fn invalid_tier_is_a_parse_error() {
        let result: std::result::Result<AppConfig, _> =
            toml::from_str("[generation]\nmax_tier = \"optional\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let mut config = BatchConfig::default();
        assert!(config.validate().is_ok());

        config.repo_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = BatchConfig::default();
        config.failure_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));

        let mut config = BatchConfig::default();
        config.textgen.enabled = true;
        config.textgen.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_lookup() {
        let settings = TextGenSection {
            // unique name so parallel tests don't interfere
            api_key_env: "REPOCTX_TEST_NONEXISTENT_KEY_12345".into(),
            ..Default::default()
        };
        let result = textgen_api_key(&settings);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("is not set"));
    }
}
