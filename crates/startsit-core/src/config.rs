// Configuration loading and parsing (pipeline.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::model::MAX_WEEK;

/// Slack given to an adapter on top of its own timeout before the pipeline
/// abandons the attempt.
pub const ATTEMPT_GRACE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub season: SeasonConfig,
    pub scoring: ScoringWeights,
    pub stats: StatsConfig,
    pub grading: GradingConfig,
    pub credentials: CredentialsConfig,
    pub db_path: String,
}

impl Config {
    /// Longest a healthy claim holder can run: every stats and grading
    /// attempt timing out, with backoff in between, plus scoring slack.
    pub fn claim_hold_budget(&self) -> Duration {
        let stats = self.retry.worst_case(self.stats.timeout().saturating_add(ATTEMPT_GRACE));
        let grading = match self.grading.provider {
            GradingProvider::Disabled => Duration::ZERO,
            _ => self
                .retry
                .worst_case(self.grading.timeout().saturating_add(ATTEMPT_GRACE)),
        };
        stats.saturating_add(grading).saturating_add(ATTEMPT_GRACE)
    }
}

// ---------------------------------------------------------------------------
// pipeline.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire pipeline.toml file.
#[derive(Debug, Clone, Deserialize)]
struct PipelineFile {
    pipeline: PipelineConfig,
    retry: RetryConfig,
    cache: CacheConfig,
    season: SeasonConfig,
    scoring: ScoringWeights,
    stats: StatsConfig,
    grading: GradingConfig,
    database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

/// Worker pool and claim settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of players analyzed concurrently, independent of roster size.
    pub workers: usize,
    /// Capacity of the bounded work queue between dispatcher and workers.
    pub queue_capacity: usize,
    /// How long a task waits on another task's in-flight claim.
    pub claim_wait_timeout_secs: u64,
    /// How long a claim may stay in flight before it is considered orphaned.
    pub claim_lease_secs: u64,
}

impl PipelineConfig {
    pub fn claim_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_wait_timeout_secs)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            workers: 4,
            queue_capacity: 64,
            claim_wait_timeout_secs: 90,
            claim_lease_secs: 120,
        }
    }
}

/// Retry policy for upstream calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Backoff slept after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay_ms as f64) as u64)
    }

    /// Elapsed time of a call whose every attempt runs into `attempt_timeout`.
    pub fn worst_case(&self, attempt_timeout: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        (1..attempts)
            .map(|a| self.delay_after(a))
            .fold(attempt_timeout.saturating_mul(attempts), Duration::saturating_add)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Freshness window for results of the current (or a future) week.
    pub current_week_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            current_week_ttl_secs: 3_600,
        }
    }
}

/// The league's current position in the calendar. Results for earlier weeks
/// never expire.
#[derive(Debug, Clone, Deserialize)]
pub struct SeasonConfig {
    pub current_season: u16,
    pub current_week: u8,
}

impl Default for SeasonConfig {
    fn default() -> Self {
        SeasonConfig {
            current_season: 2024,
            current_week: 1,
        }
    }
}

/// Relative weights of the three sub-scores in the blended score. Weights
/// are renormalized over the sub-scores that are actually available.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScoringWeights {
    pub matchup_weight: f64,
    pub weather_weight: f64,
    pub advanced_weight: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        ScoringWeights {
            matchup_weight: 0.5,
            weather_weight: 0.2,
            advanced_weight: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// How long defense bundles are reused before being fetched again.
    pub defense_cache_ttl_secs: u64,
}

impl StatsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            base_url: "http://127.0.0.1:8080/v1".to_string(),
            timeout_secs: 10,
            defense_cache_ttl_secs: 900,
        }
    }
}

/// Which language-model backend grades players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradingProvider {
    Claude,
    OpenAi,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradingConfig {
    pub provider: GradingProvider,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Override for the provider's API endpoint (used against mock servers).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl GradingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GradingConfig {
    fn default() -> Self {
        GradingConfig {
            provider: GradingProvider::Disabled,
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 300,
            timeout_secs: 10,
            base_url: None,
        }
    }
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub stats_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/pipeline.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`.
///
/// This does not auto-copy defaults; prefer `load_config()` for that.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- pipeline.toml (required) ---
    let pipeline_path = config_dir.join("pipeline.toml");
    let pipeline_text = read_file(&pipeline_path)?;
    let file: PipelineFile =
        toml::from_str(&pipeline_text).map_err(|e| ConfigError::ParseError {
            path: pipeline_path.clone(),
            source: e,
        })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        pipeline: file.pipeline,
        retry: file.retry,
        cache: file.cache,
        season: file.season,
        scoring: file.scoring,
        stats: file.stats,
        grading: file.grading,
        credentials,
        db_path: file.database.path,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let p = &config.pipeline;
    let positive: &[(&str, u64)] = &[
        ("pipeline.workers", p.workers as u64),
        ("pipeline.queue_capacity", p.queue_capacity as u64),
        ("pipeline.claim_wait_timeout_secs", p.claim_wait_timeout_secs),
        ("pipeline.claim_lease_secs", p.claim_lease_secs),
        ("retry.max_attempts", config.retry.max_attempts as u64),
        ("stats.timeout_secs", config.stats.timeout_secs),
        ("grading.timeout_secs", config.grading.timeout_secs),
        ("grading.max_tokens", config.grading.max_tokens as u64),
    ];
    for (name, val) in positive {
        if *val == 0 {
            return Err(invalid(name, "must be > 0"));
        }
    }

    if p.claim_lease_secs < p.claim_wait_timeout_secs {
        return Err(invalid(
            "pipeline.claim_lease_secs",
            format!(
                "must be >= claim_wait_timeout_secs ({}), got {}",
                p.claim_wait_timeout_secs, p.claim_lease_secs
            ),
        ));
    }

    // A waiter must outlast a holder that is slow but healthy, and the lease
    // must not expire under it.
    let budget = config.claim_hold_budget();
    let budget_secs = budget.as_secs_f64().ceil() as u64;
    if p.claim_wait_timeout() < budget {
        return Err(invalid(
            "pipeline.claim_wait_timeout_secs",
            format!(
                "must be >= the worst-case claim hold time ({budget_secs}s), got {}",
                p.claim_wait_timeout_secs
            ),
        ));
    }

    let r = &config.retry;
    if r.backoff_multiplier < 1.0 {
        return Err(invalid(
            "retry.backoff_multiplier",
            format!("must be >= 1.0, got {}", r.backoff_multiplier),
        ));
    }
    if r.max_delay_ms < r.initial_delay_ms {
        return Err(invalid(
            "retry.max_delay_ms",
            format!(
                "must be >= initial_delay_ms ({}), got {}",
                r.initial_delay_ms, r.max_delay_ms
            ),
        ));
    }

    let week = config.season.current_week;
    if week == 0 || week > MAX_WEEK {
        return Err(invalid(
            "season.current_week",
            format!("must be between 1 and {MAX_WEEK}, got {week}"),
        ));
    }

    let w = &config.scoring;
    let weight_fields: &[(&str, f64)] = &[
        ("scoring.matchup_weight", w.matchup_weight),
        ("scoring.weather_weight", w.weather_weight),
        ("scoring.advanced_weight", w.advanced_weight),
    ];
    for (name, val) in weight_fields {
        if !val.is_finite() || *val < 0.0 {
            return Err(invalid(name, format!("must be a finite value >= 0, got {val}")));
        }
    }
    // Matchup and weather scores always exist, so their weights alone must
    // be able to carry the blend when advanced stats are missing.
    if w.matchup_weight + w.weather_weight <= 0.0 {
        return Err(invalid(
            "scoring.matchup_weight",
            "matchup_weight + weather_weight must be > 0",
        ));
    }

    if config.stats.base_url.trim().is_empty() {
        return Err(invalid("stats.base_url", "must not be empty"));
    }

    if config.grading.provider != GradingProvider::Disabled
        && config.grading.model.trim().is_empty()
    {
        return Err(invalid("grading.model", "must not be empty"));
    }

    if config.db_path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
