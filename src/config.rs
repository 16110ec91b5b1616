//! Configuration Module
//!
//! Handles loading and validating action configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

const DEFAULT_MODEL: &str = "gpt-4";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_CACHE_DIR: &str = ".infra-lens-cache";
const DEFAULT_DIFF_FILE: &str = "cdk-diff.json";

// == AI Config ==
/// Remote summarization settings.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Bearer token for the chat-completions endpoint
    pub api_key: String,
    /// Model identifier sent with every request
    pub model: String,
    /// Maximum output length in tokens
    pub max_tokens: u32,
    /// Sampling temperature, 0.0..=2.0
    pub temperature: f32,
    /// Total attempts per logical call, including the first
    pub max_retries: u32,
    /// Per-request HTTP timeout
    pub timeout: Duration,
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 500,
            temperature: 0.7,
            max_retries: 3,
            timeout: Duration::from_secs(30),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

// == Cache Config ==
/// Persistent cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false the cache is bypassed and every request recomputes
    pub enabled: bool,
    /// Directory holding the index and payload files
    pub dir: PathBuf,
    /// Maximum entry age
    pub ttl: Duration,
    /// Ceiling on the summed payload size
    pub max_size_bytes: u64,
    /// Interval of the background sweep, None = only sweep after writes
    pub sweep_interval: Option<Duration>,
}

impl CacheConfig {
    /// Creates an enabled cache config rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, max_size_bytes: u64) -> Self {
        Self {
            enabled: true,
            dir: dir.into(),
            ttl,
            max_size_bytes,
            sweep_interval: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_CACHE_DIR,
            Duration::from_secs(24 * 3600),
            100 * 1024 * 1024,
        )
    }
}

// == GitHub Config ==
/// Settings for publishing the summary to a pull request or issue.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub token: String,
    /// `owner/name`
    pub repository: String,
    /// Path of the JSON event payload that triggered the workflow
    pub event_path: PathBuf,
    pub api_url: String,
    /// Open an issue when the event has no pull request
    pub create_issue_if_no_pr: bool,
}

// == Config ==
/// Top-level action configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub ai: AiConfig,
    pub cache: CacheConfig,
    pub github: Option<GithubConfig>,
    /// Diff document to summarize
    pub diff_file: PathBuf,
    /// File that receives action outputs (`GITHUB_OUTPUT`)
    pub output_path: Option<PathBuf>,
    /// Default log level when `RUST_LOG` is unset
    pub log_level: Option<String>,
    /// Skip posting to GitHub
    pub dry_run: bool,
    /// Budget for the whole retry loop, None = unbounded
    pub total_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ai: AiConfig::default(),
            cache: CacheConfig::default(),
            github: None,
            diff_file: PathBuf::from(DEFAULT_DIFF_FILE),
            output_path: None,
            log_level: None,
            dry_run: false,
            total_timeout: None,
        }
    }
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `OPENAI_API_KEY`, `AI_MODEL`, `AI_MAX_TOKENS`, `AI_TEMPERATURE`,
    ///   `AI_MAX_RETRIES`, `AI_TIMEOUT`, `AI_BASE_URL`, `AI_TOTAL_TIMEOUT`
    /// - `CACHE_ENABLED`, `CACHE_DIR`, `CACHE_TTL_HOURS`, `CACHE_MAX_SIZE_MB`,
    ///   `CACHE_SWEEP_INTERVAL`
    /// - `CDK_DIFF_FILE`, `LOG_LEVEL`, `DRY_RUN`
    /// - `GITHUB_TOKEN`, `GITHUB_REPOSITORY`, `GITHUB_EVENT_PATH`,
    ///   `GITHUB_API_URL`, `GITHUB_OUTPUT`, `CREATE_ISSUE_IF_NO_PR`
    ///
    /// Unparsable numbers fall back to their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a Config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let parsed = |name: &str, default| parse_or(&lookup, name, default);

        let ai = AiConfig {
            api_key: lookup("OPENAI_API_KEY").unwrap_or_default(),
            model: lookup("AI_MODEL").unwrap_or(defaults.ai.model),
            max_tokens: parse_or(&lookup, "AI_MAX_TOKENS", defaults.ai.max_tokens),
            temperature: parse_or(&lookup, "AI_TEMPERATURE", defaults.ai.temperature),
            max_retries: parse_or(&lookup, "AI_MAX_RETRIES", defaults.ai.max_retries),
            timeout: Duration::from_secs(parsed("AI_TIMEOUT", 30)),
            base_url: lookup("AI_BASE_URL").unwrap_or(defaults.ai.base_url),
        };

        let ttl_hours: u64 = parsed("CACHE_TTL_HOURS", 24);
        let max_size_mb: u64 = parsed("CACHE_MAX_SIZE_MB", 100);
        let sweep_secs: u64 = parsed("CACHE_SWEEP_INTERVAL", 0);
        let cache = CacheConfig {
            enabled: flag(&lookup, "CACHE_ENABLED", true),
            dir: lookup("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache.dir),
            ttl: Duration::from_secs(ttl_hours.saturating_mul(3600)),
            max_size_bytes: max_size_mb.saturating_mul(1024 * 1024),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        };

        let github = match (
            lookup("GITHUB_TOKEN"),
            lookup("GITHUB_REPOSITORY"),
            lookup("GITHUB_EVENT_PATH"),
        ) {
            (Some(token), Some(repository), Some(event_path)) => Some(GithubConfig {
                token,
                repository,
                event_path: PathBuf::from(event_path),
                api_url: lookup("GITHUB_API_URL")
                    .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
                create_issue_if_no_pr: flag(&lookup, "CREATE_ISSUE_IF_NO_PR", false),
            }),
            _ => None,
        };

        let total_timeout_secs: u64 = parsed("AI_TOTAL_TIMEOUT", 0);

        Self {
            ai,
            cache,
            github,
            diff_file: lookup("CDK_DIFF_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.diff_file),
            output_path: lookup("GITHUB_OUTPUT").map(PathBuf::from),
            log_level: lookup("LOG_LEVEL"),
            dry_run: flag(&lookup, "DRY_RUN", false),
            total_timeout: (total_timeout_secs > 0)
                .then(|| Duration::from_secs(total_timeout_secs)),
        }
    }

    // == Validate ==
    /// Checks ranges and required settings.
    ///
    /// The API key is only required when a summary will actually be generated,
    /// so cache maintenance commands skip that check.
    pub fn validate(&self, require_api_key: bool) -> Result<(), ConfigError> {
        if require_api_key && self.ai.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("OPENAI_API_KEY"));
        }
        if self.ai.max_tokens == 0 {
            return Err(invalid("AI_MAX_TOKENS", "must be positive"));
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(invalid("AI_TEMPERATURE", "must be between 0 and 2"));
        }
        if self.ai.max_retries == 0 {
            return Err(invalid("AI_MAX_RETRIES", "must be at least 1"));
        }
        if self.cache.ttl.is_zero() {
            return Err(invalid("CACHE_TTL_HOURS", "must be positive"));
        }
        if self.cache.max_size_bytes == 0 {
            return Err(invalid("CACHE_MAX_SIZE_MB", "must be positive"));
        }
        Ok(())
    }

    /// Retry policy derived from the AI settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.ai.max_retries)
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
