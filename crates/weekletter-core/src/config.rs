use chrono::NaiveTime;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_EXECUTION_WINDOW_SECS: u64 = 60;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
/// Top of every hour (cron seconds field first).
pub const DEFAULT_DOCUMENT_CHECK_CRON: &str = "0 0 * * * *";
pub const DEFAULT_RETRY_SWEEP_CRON: &str = "0 * * * * *";
pub const DEFAULT_RETRY_INTERVAL_MINUTES: u64 = 120;
pub const DEFAULT_RETRY_MAX_DURATION_MINUTES: u64 = 360;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Top-level config (weekletter.toml + WEEKLETTER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeekletterConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub source: SourceConfig,
    /// Children (or other subjects) whose week letters are tracked.
    #[serde(default)]
    pub subjects: Vec<SubjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Polling cadence of the scheduler loop.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// How long after its `next_run` a job may still start. A job found
    /// later than this is skipped until its next occurrence.
    #[serde(default = "default_execution_window_secs")]
    pub execution_window_secs: u64,
    #[serde(default = "default_document_check_cron")]
    pub document_check_cron: String,
    #[serde(default = "default_retry_sweep_cron")]
    pub retry_sweep_cron: String,
    /// Upper bound on a single Content Source fetch.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            execution_window_secs: DEFAULT_EXECUTION_WINDOW_SECS,
            document_check_cron: DEFAULT_DOCUMENT_CHECK_CRON.to_string(),
            retry_sweep_cron: DEFAULT_RETRY_SWEEP_CRON.to_string(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

/// Retry policy for failed fetches. `interval` sets how often, `max_duration`
/// sets for how long; the attempt bound is derived from both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_retry_max_duration_minutes")]
    pub max_duration_minutes: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_RETRY_INTERVAL_MINUTES,
            max_duration_minutes: DEFAULT_RETRY_MAX_DURATION_MINUTES,
        }
    }
}

impl RetryConfig {
    /// `ceil(max_duration / interval)`, never below 1.
    pub fn max_attempts(&self) -> u32 {
        let interval = self.interval_minutes.max(1);
        let attempts = self.max_duration_minutes.div_ceil(interval);
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }

    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.interval_minutes.max(1) as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Candidates scoring below this are discarded.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Time of day assigned to reminders created from extracted events.
    #[serde(default = "default_reminder_time")]
    pub reminder_time: NaiveTime,
    #[serde(default = "default_model")]
    pub model: String,
    /// Anthropic API key. Extraction is disabled at startup when absent.
    pub api_key: Option<String>,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            reminder_time: default_reminder_time(),
            model: default_model(),
            api_key: None,
            base_url: default_anthropic_base_url(),
        }
    }
}

/// Upstream week letter service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL without trailing slash. Remote fetching is disabled when unset.
    pub base_url: Option<String>,
    /// Bearer token sent with every fetch.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfig {
    /// Stable identifier used as the storage key and in source URLs.
    pub id: String,
    /// Name used in notification text. Defaults to `id`.
    pub name: Option<String>,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl SubjectConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A notification channel registered for a subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// HTTP POST of `{"content": "..."}` to an incoming-webhook URL.
    Webhook { name: String, url: String },
    /// Writes notifications to the log.
    Log { name: String },
}

impl SinkConfig {
    pub fn name(&self) -> &str {
        match self {
            SinkConfig::Webhook { name, .. } | SinkConfig::Log { name } => name,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_execution_window_secs() -> u64 {
    DEFAULT_EXECUTION_WINDOW_SECS
}
fn default_document_check_cron() -> String {
    DEFAULT_DOCUMENT_CHECK_CRON.to_string()
}
fn default_retry_sweep_cron() -> String {
    DEFAULT_RETRY_SWEEP_CRON.to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}
fn default_retry_interval_minutes() -> u64 {
    DEFAULT_RETRY_INTERVAL_MINUTES
}
fn default_retry_max_duration_minutes() -> u64 {
    DEFAULT_RETRY_MAX_DURATION_MINUTES
}
fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}
fn default_reminder_time() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default()
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.weekletter/weekletter.db", home)
}

impl WeekletterConfig {
    /// Load config from a TOML file with WEEKLETTER_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `WEEKLETTER_RETRY__INTERVAL_MINUTES=30`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::WeekletterError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("WEEKLETTER_").split("__"))
    }

    pub fn subject(&self, id: &str) -> Option<&SubjectConfig> {
        self.subjects.iter().find(|s| s.id == id)
    }
}

pub fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.weekletter/weekletter.toml", home)
}
