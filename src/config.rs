//! Runtime configuration assembled once at bootstrap from environment variables.
//! No CLI argument parser sits in front of this — env vars are read directly, matching
//! the out-of-scope note that CLI/env-var parsing is an external concern this crate
//! does not wrap.

use crate::error::ConfigError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMode {
    Database { conn_string: String },
    Api { base_url: String, api_key: String },
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub agent_id: i64,
    pub backend: BackendMode,
    pub health_port: u16,
    pub config_reload_interval: Duration,
    pub queue_path: std::path::PathBuf,
    pub log_level: String,
}

impl RuntimeConfig {
    /// Backend-mode selection is inferred from which required variables are
    /// present, not a separate flag: `DB_CONN_STRING` selects the database backend,
    /// `API_BASE_URL`/`API_KEY` select the HTTP API backend.
    pub fn from_env() -> Result<Self, ConfigError> {
        let agent_id = required_i64("AGENT_ID")?;

        let db_conn = std::env::var("DB_CONN_STRING").ok().filter(|s| !s.is_empty());
        let api_base = std::env::var("API_BASE_URL").ok().filter(|s| !s.is_empty());

        let backend = if let Some(conn_string) = db_conn {
            BackendMode::Database { conn_string }
        } else if let Some(base_url) = api_base {
            let api_key = std::env::var("API_KEY")
                .ok()
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::MissingEnv("API_KEY"))?;
            BackendMode::Api { base_url, api_key }
        } else {
            return Err(ConfigError::MissingEnv("DB_CONN_STRING or API_BASE_URL"));
        };

        let health_port = std::env::var("HEALTH_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(match &backend {
                BackendMode::Database { .. } => 8080,
                BackendMode::Api { .. } => 9090,
            });

        let config_reload_interval = std::env::var("CONFIG_RELOAD_INTERVAL")
            .ok()
            .and_then(|v| parse_duration(&v))
            .filter(|d| *d >= Duration::from_secs(1))
            .unwrap_or_else(|| {
                if std::env::var("CONFIG_RELOAD_INTERVAL").is_ok() {
                    tracing::warn!("invalid CONFIG_RELOAD_INTERVAL, using default 24h");
                }
                Duration::from_secs(24 * 3600)
            });

        let queue_path = std::env::var("QUEUE_PATH")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::path::PathBuf::from("./data/queue"));

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());

        Ok(Self {
            agent_id,
            backend,
            health_port,
            config_reload_interval,
            queue_path,
            log_level,
        })
    }
}

fn required_i64(name: &'static str) -> Result<i64, ConfigError> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or(ConfigError::MissingEnv(name))
}

/// Accepts Go-`time.ParseDuration`-style suffixes relevant here: `s`, `m`, `h`.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (number, unit) = raw.split_at(raw.len().saturating_sub(1));
    let value: u64 = number.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}
