//! Application configuration for Sundew.
//!
//! Config lives at `./sundew.toml` or `~/.sundew/sundew.toml`; `--config`
//! overrides both. A path ending in `.json` is read as JSON with the same
//! structure. Every loaded config is validated before the core runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SundewError};
use crate::types::AccountGroup;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sundew.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sundew";

/// Account handles as the provider accepts them, optional leading `@`.
const HANDLE_PATTERN: &str = r"^@?[A-Za-z0-9_]{1,15}$";

/// Upper bound for `transformer.spacing_ms`; the spacing sleep ignores stop requests.
const MAX_SPACING_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Config structs (matching sundew.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Seconds between the end of one poll cycle and the start of the next.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,

    /// Account groups, polled in this order.
    #[serde(default)]
    pub groups: Vec<AccountGroup>,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub transformer: TransformerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub checkpoints: CheckpointConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
            groups: vec![AccountGroup {
                name: "tech_news".into(),
                accounts: vec!["@rustlang".into()],
                instruction: "Summarize this post in one sentence.".into(),
            }],
            output: OutputConfig::default(),
            source: SourceConfig::default(),
            transformer: TransformerConfig::default(),
            retry: RetryConfig::default(),
            checkpoints: CheckpointConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

fn default_update_interval() -> u64 {
    300
}

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Csv,
    Text,
}

impl OutputFormat {
    /// Label used in transformation report lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::Csv => "CSV",
            Self::Text => "text",
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_format")]
    pub format: OutputFormat,

    /// Output file; report and error log are written beside it.
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_output_format(),
            destination: default_destination(),
        }
    }
}

fn default_output_format() -> OutputFormat {
    OutputFormat::Json
}
fn default_destination() -> PathBuf {
    PathBuf::from("output/transformed_data.json")
}

/// `[source]` section: the X API v2 content source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_base_url")]
    pub base_url: String,

    /// Name of the env var holding the bearer token (never store the token itself).
    #[serde(default = "default_bearer_token_env")]
    pub bearer_token_env: String,

    /// Items requested per page (the API accepts 5..=100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Upper bound on items gathered per fetch across all pages.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Cooldown applied on a rate-limit response without a reset header.
    #[serde(default = "default_rate_limit_cooldown")]
    pub rate_limit_cooldown_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            bearer_token_env: default_bearer_token_env(),
            page_size: default_page_size(),
            max_items: default_max_items(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl SourceConfig {
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_source_base_url() -> String {
    "https://api.twitter.com/2".into()
}
fn default_bearer_token_env() -> String {
    "TWITTER_BEARER_TOKEN".into()
}
fn default_page_size() -> u32 {
    100
}
fn default_max_items() -> usize {
    1000
}
fn default_rate_limit_cooldown() -> u64 {
    900
}
fn default_request_timeout() -> u64 {
    30
}

/// What to do when a single item fails to transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the cycle and stop the daemon.
    Halt,
    /// Drop the failed item and keep transforming the rest of the batch.
    SkipItem,
}

/// `[transformer]` section: OpenAI-compatible chat completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerConfig {
    #[serde(default = "default_transformer_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Minimum spacing between consecutive transform calls.
    #[serde(default = "default_spacing_ms")]
    pub spacing_ms: u64,

    #[serde(default = "default_failure_policy")]
    pub on_failure: FailurePolicy,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            base_url: default_transformer_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            spacing_ms: default_spacing_ms(),
            on_failure: default_failure_policy(),
        }
    }
}

impl TransformerConfig {
    pub fn spacing(&self) -> Duration {
        Duration::from_millis(self.spacing_ms)
    }
}

fn default_transformer_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4".into()
}
fn default_spacing_ms() -> u64 {
    1000
}
fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::Halt
}

/// `[retry]` section: backoff for transient fetch failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fetch re-issues allowed after rate-limit cooldowns, per account per cycle.
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_max_rate_limit_retries() -> u32 {
    1
}

/// `[checkpoints]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// libSQL database file; checkpoints stay in memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// `[batch]` section: the fetched-batch archive replayed by manual mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_dir")]
    pub dir: PathBuf,

    /// Write every fetched batch to `dir` so it can be replayed later.
    #[serde(default = "default_true")]
    pub archive: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            dir: default_batch_dir(),
            archive: true,
        }
    }
}

fn default_batch_dir() -> PathBuf {
    PathBuf::from("temp_posts")
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Poll interval as a duration.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }

    /// Look up a group by name.
    pub fn group(&self, name: &str) -> Option<&AccountGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Check every structural rule the core relies on.
    pub fn validate(&self) -> Result<()> {
        if self.update_interval == 0 {
            return Err(SundewError::config("update_interval must be greater than 0"));
        }
        if self.groups.is_empty() {
            return Err(SundewError::config("at least one [[groups]] entry is required"));
        }

        let handle = Regex::new(HANDLE_PATTERN)
            .map_err(|e| SundewError::config(format!("invalid handle pattern: {e}")))?;
        let mut group_names = HashSet::new();
        for group in &self.groups {
            if group.name.trim().is_empty() {
                return Err(SundewError::config("groups.name must not be empty"));
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(SundewError::config(format!(
                    "duplicate group name '{}'",
                    group.name
                )));
            }
            if group.instruction.trim().is_empty() {
                return Err(SundewError::config(format!(
                    "groups.{}.instruction must not be empty",
                    group.name
                )));
            }
            if group.accounts.is_empty() {
                return Err(SundewError::config(format!(
                    "groups.{}.accounts must list at least one account",
                    group.name
                )));
            }
            let mut seen = HashSet::new();
            for account in &group.accounts {
                if !handle.is_match(account) {
                    return Err(SundewError::config(format!(
                        "groups.{}.accounts: '{account}' is not a valid account handle",
                        group.name
                    )));
                }
                if !seen.insert(account.trim_start_matches('@').to_ascii_lowercase()) {
                    return Err(SundewError::config(format!(
                        "groups.{}.accounts: '{account}' is listed twice",
                        group.name
                    )));
                }
            }
        }

        if self.output.destination.as_os_str().is_empty() {
            return Err(SundewError::config("output.destination must not be empty"));
        }

        Url::parse(&self.source.base_url).map_err(|e| {
            SundewError::config(format!("source.base_url '{}': {e}", self.source.base_url))
        })?;
        if !(5..=100).contains(&self.source.page_size) {
            return Err(SundewError::config("source.page_size must be between 5 and 100"));
        }
        if self.source.max_items == 0 {
            return Err(SundewError::config("source.max_items must be greater than 0"));
        }

        Url::parse(&self.transformer.base_url).map_err(|e| {
            SundewError::config(format!(
                "transformer.base_url '{}': {e}",
                self.transformer.base_url
            ))
        })?;
        if self.transformer.model.trim().is_empty() {
            return Err(SundewError::config("transformer.model must not be empty"));
        }
        if self.transformer.spacing_ms > MAX_SPACING_MS {
            return Err(SundewError::config(format!(
                "transformer.spacing_ms must be at most {MAX_SPACING_MS}"
            )));
        }

        if self.retry.initial_delay_ms == 0 {
            return Err(SundewError::config("retry.initial_delay_ms must be greater than 0"));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(SundewError::config(
                "retry.max_delay_ms must be at least retry.initial_delay_ms",
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sundew/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SundewError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Resolve the config file: `./sundew.toml` if present, else `~/.sundew/sundew.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(local);
    }
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load and validate the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };
    let config = load_config_from(&path)?;
    config.validate()?;
    tracing::debug!(?path, groups = config.groups.len(), "configuration loaded");
    Ok(config)
}

/// Parse the config file at `path` without validating it.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SundewError::io(path, e))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content).map_err(|e| {
            SundewError::config(format!("failed to parse {}: {e}", path.display()))
        })
    } else {
        toml::from_str(&content).map_err(|e| {
            SundewError::config(format!("failed to parse {}: {e}", path.display()))
        })
    }
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SundewError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| SundewError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SundewError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that both collaborator credentials are present in the environment.
pub fn validate_credentials(config: &AppConfig) -> Result<()> {
    for (var_name, what) in [
        (&config.source.bearer_token_env, "X API bearer token"),
        (&config.transformer.api_key_env, "transformer API key"),
    ] {
        match std::env::var(var_name) {
            Ok(val) if !val.trim().is_empty() => {}
            _ => {
                return Err(SundewError::Authentication(format!(
                    "{what} not found. Set the {var_name} environment variable."
                )));
            }
        }
    }
    Ok(())
}
