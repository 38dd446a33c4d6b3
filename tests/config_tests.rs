// Config loading and validation tests

use traffic_reporter::config::AppConfig;

const VALID_CONFIG: &str = r#"
[panel]
base_url = "https://panel.example.com/"
api_token = "secret"

[telegram]
bot_token = "123:abc"
chat_id = "-1001"

[database]
path = "data/traffic.db"
max_pool_size = 4

[sampling]
interval_secs = 300
retention_hours = 720

[history]
timezone = "Asia/Shanghai"
hot_days = 60
retention_days = 400

[reports]
top_n = 5
daily_schedule = "0 5 0 * * *"

[alerts]
enabled = false

[server]
port = 8081
host = "127.0.0.1"
"#;

const MINIMAL_CONFIG: &str = r#"
[panel]
base_url = "http://10.0.0.1:25774"

[telegram]
bot_token = "123:abc"
chat_id = "42"

[database]
path = "traffic.db"
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.panel.api_token.as_deref(), Some("secret"));
    assert_eq!(config.telegram.chat_id, "-1001");
    assert_eq!(config.database.max_pool_size, 4);
    assert_eq!(config.reports.top_n, 5);
    assert_eq!(config.reports.daily_schedule.as_deref(), Some("0 5 0 * * *"));
    assert!(config.reports.weekly_schedule.is_none());
    assert_eq!(config.server.as_ref().map(|s| s.port), Some(8081));
    assert_eq!(config.history.tz().unwrap(), chrono_tz::Asia::Shanghai);
    assert!(!config.alerts.enabled);
}

#[test]
fn test_config_defaults() {
    let config = AppConfig::load_from_str(MINIMAL_CONFIG).expect("load_from_str");
    assert!(config.panel.api_token.is_none());
    assert_eq!(config.panel.token_header, "Authorization");
    assert_eq!(config.panel.fetch_workers, 6);
    assert_eq!(config.telegram.max_attempts, 5);
    assert_eq!(config.sampling.interval_secs, 300);
    assert_eq!(config.sampling.retention_hours, 720);
    assert_eq!(config.history.hot_days, 60);
    assert_eq!(config.history.retention_days, 400);
    assert_eq!(config.reports.top_n, 3);
    assert!(config.alerts.enabled);
    assert_eq!(config.alerts.min_interval_secs, 300);
    assert!(config.server.is_none());
}

#[test]
fn test_env_overrides_secrets() {
    let mut config = AppConfig::load_from_str(MINIMAL_CONFIG).unwrap();
    config.apply_env_overrides(|key| match key {
        "PANEL_API_TOKEN" => Some("from-env".into()),
        "TELEGRAM_BOT_TOKEN" => Some("999:xyz".into()),
        "TELEGRAM_CHAT_ID" => Some("  ".into()),
        _ => None,
    });
    assert_eq!(config.panel.api_token.as_deref(), Some("from-env"));
    assert_eq!(config.telegram.bot_token, "999:xyz");
    // Blank values are ignored.
    assert_eq!(config.telegram.chat_id, "42");
}

#[test]
fn test_config_validation_rejects_non_http_url() {
    let bad = VALID_CONFIG.replace("https://panel.example.com/", "panel.example.com");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("panel.base_url"));
}

#[test]
fn test_config_validation_rejects_empty_chat_id() {
    let bad = VALID_CONFIG.replace("chat_id = \"-1001\"", "chat_id = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("telegram.chat_id"));
}

#[test]
fn test_config_validation_rejects_hot_days_past_retention() {
    let bad = VALID_CONFIG.replace("hot_days = 60", "hot_days = 400");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("history.hot_days"));
}

#[test]
fn test_config_validation_rejects_unknown_timezone() {
    let bad = VALID_CONFIG.replace("Asia/Shanghai", "Mars/Olympus");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("history.timezone"));
}

#[test]
fn test_config_validation_rejects_bad_cron() {
    let bad = VALID_CONFIG.replace("0 5 0 * * *", "every day");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("reports.daily_schedule"));
}

#[test]
fn test_config_validation_rejects_interval_zero() {
    let bad = VALID_CONFIG.replace("interval_secs = 300", "interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("sampling.interval_secs"));
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_top_n_zero() {
    let bad = VALID_CONFIG.replace("top_n = 5", "top_n = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("reports.top_n"));
}
