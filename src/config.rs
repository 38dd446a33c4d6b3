use std::str::FromStr;

use chrono_tz::Tz;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub panel: PanelConfig,
    pub telegram: TelegramConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Health/query HTTP surface; disabled when absent.
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_token_header")]
    pub token_header: String,
    #[serde(default = "default_token_prefix")]
    pub token_prefix: String,
    #[serde(default = "default_panel_timeout_secs")]
    pub timeout_secs: u64,
    /// Max concurrent per-node counter fetches.
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,
}

fn default_token_header() -> String {
    "Authorization".into()
}

fn default_token_prefix() -> String {
    "Bearer".into()
}

fn default_panel_timeout_secs() -> u64 {
    15
}

fn default_fetch_workers() -> usize {
    6
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_poll_timeout_secs() -> u64 {
    50
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    20_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

fn default_max_pool_size() -> u32 {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    pub interval_secs: u64,
    /// Rolling window for per-interval samples (feeds "last N hours").
    pub retention_hours: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            retention_hours: 720,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// IANA zone used for day/week/month boundaries.
    pub timezone: String,
    /// Daily records younger than this stay individually addressable.
    pub hot_days: u32,
    /// Daily records (hot or archived) older than this are purged.
    pub retention_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Shanghai".into(),
            hot_days: 60,
            retention_days: 400,
        }
    }
}

impl HistoryConfig {
    pub fn tz(&self) -> anyhow::Result<Tz> {
        Tz::from_str(&self.timezone)
            .map_err(|e| anyhow::anyhow!("history.timezone {:?}: {}", self.timezone, e))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportsConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Cron expressions (seconds field first), evaluated in history.timezone.
    /// When unset, an external scheduler runs the report subcommands.
    #[serde(default)]
    pub daily_schedule: Option<String>,
    #[serde(default)]
    pub weekly_schedule: Option<String>,
    #[serde(default)]
    pub monthly_schedule: Option<String>,
    #[serde(default)]
    pub archive_schedule: Option<String>,
}

fn default_top_n() -> usize {
    3
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            daily_schedule: None,
            weekly_schedule: None,
            monthly_schedule: None,
            archive_schedule: None,
        }
    }
}

/// Telegram message when a scheduled job, a poll cycle or a CLI task fails.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_alerts_enabled")]
    pub enabled: bool,
    /// At most one alert per job within this many seconds.
    #[serde(default = "default_alert_interval_secs")]
    pub min_interval_secs: u64,
}

fn default_alerts_enabled() -> bool {
    true
}

fn default_alert_interval_secs() -> u64 {
    300
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: default_alerts_enabled(),
            min_interval_secs: default_alert_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {}", path, e))?;
        let mut config: AppConfig = toml::from_str(&s)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Secrets can live in the environment instead of the config file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("PANEL_API_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.panel.api_token = Some(token);
        }
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(chat_id) = lookup("TELEGRAM_CHAT_ID").filter(|v| !v.trim().is_empty()) {
            self.telegram.chat_id = chat_id;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.panel.base_url.starts_with("http://") || self.panel.base_url.starts_with("https://"),
            "panel.base_url must be an http(s) URL, got {:?}",
            self.panel.base_url
        );
        anyhow::ensure!(
            self.panel.timeout_secs > 0,
            "panel.timeout_secs must be > 0, got {}",
            self.panel.timeout_secs
        );
        anyhow::ensure!(
            self.panel.fetch_workers > 0,
            "panel.fetch_workers must be > 0, got {}",
            self.panel.fetch_workers
        );
        anyhow::ensure!(
            !self.telegram.bot_token.trim().is_empty(),
            "telegram.bot_token must be non-empty"
        );
        anyhow::ensure!(
            !self.telegram.chat_id.trim().is_empty(),
            "telegram.chat_id must be non-empty"
        );
        anyhow::ensure!(
            self.telegram.max_attempts > 0,
            "telegram.max_attempts must be > 0, got {}",
            self.telegram.max_attempts
        );
        anyhow::ensure!(
            self.telegram.initial_backoff_ms <= self.telegram.max_backoff_ms,
            "telegram.initial_backoff_ms ({}) must not exceed telegram.max_backoff_ms ({})",
            self.telegram.initial_backoff_ms,
            self.telegram.max_backoff_ms
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.sampling.interval_secs > 0,
            "sampling.interval_secs must be > 0, got {}",
            self.sampling.interval_secs
        );
        anyhow::ensure!(
            self.sampling.retention_hours > 0,
            "sampling.retention_hours must be > 0, got {}",
            self.sampling.retention_hours
        );
        anyhow::ensure!(
            self.history.hot_days > 0,
            "history.hot_days must be > 0, got {}",
            self.history.hot_days
        );
        anyhow::ensure!(
            self.history.hot_days < self.history.retention_days,
            "history.hot_days ({}) must be less than history.retention_days ({})",
            self.history.hot_days,
            self.history.retention_days
        );
        self.history.tz()?;
        anyhow::ensure!(
            self.reports.top_n > 0,
            "reports.top_n must be > 0, got {}",
            self.reports.top_n
        );
        for (name, schedule) in [
            ("reports.daily_schedule", &self.reports.daily_schedule),
            ("reports.weekly_schedule", &self.reports.weekly_schedule),
            ("reports.monthly_schedule", &self.reports.monthly_schedule),
            ("reports.archive_schedule", &self.reports.archive_schedule),
        ] {
            if let Some(expr) = schedule {
                cron::Schedule::from_str(expr)
                    .map_err(|e| anyhow::anyhow!("{} {:?}: {}", name, expr, e))?;
            }
        }
        if let Some(server) = &self.server {
            anyhow::ensure!(
                server.port > 0,
                "server.port must be between 1 and 65535, got {}",
                server.port
            );
        }
        Ok(())
    }
}
