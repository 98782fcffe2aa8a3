use std::time::Duration;

use serde::Deserialize;

use crate::types::{DEFAULT_MAX_RETRIES, MAX_RETRIES_LIMIT};

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string. When unset the queue runs on the
    /// in-memory store and nothing survives a restart.
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Port the HTTP API listens on (default: 3000)
    pub api_port: u16,

    /// Wait between polls of an empty queue in milliseconds (default: 1000)
    pub dispatch_poll_interval_ms: u64,

    /// Wait after an unexpected dispatch loop error in milliseconds (default: 5000)
    pub dispatch_error_backoff_ms: u64,

    /// Retry budget for messages whose producer does not set one (default: 3)
    pub default_max_retries: u32,

    /// Whether the simulated handlers inject random delivery failures (default: true)
    pub simulate_failures: bool,

    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
}

impl AppConfig {
    /// Load `.env` and report whether `LOG_FORMAT` asks for JSON lines.
    ///
    /// Runs before tracing is initialized, so it must not fail; the full
    /// configuration is loaded afterwards by [`AppConfig::from_env`].
    pub fn json_logs_requested() -> bool {
        dotenvy::dotenv().ok();
        is_json_log_format(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let default_max_retries =
            parse_default_max_retries(std::env::var("DEFAULT_MAX_RETRIES").ok())?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid port number"))?,
            dispatch_poll_interval_ms: std::env::var("DISPATCH_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_POLL_INTERVAL_MS must be a valid u64"))?,
            dispatch_error_backoff_ms: std::env::var("DISPATCH_ERROR_BACKOFF_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_ERROR_BACKOFF_MS must be a valid u64"))?,
            default_max_retries,
            simulate_failures: parse_bool(
                "SIMULATE_FAILURES",
                std::env::var("SIMULATE_FAILURES").ok(),
                true,
            )?,
            log_json: is_json_log_format(std::env::var("LOG_FORMAT").ok().as_deref()),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.dispatch_error_backoff_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            api_port: 3000,
            dispatch_poll_interval_ms: 1000,
            dispatch_error_backoff_ms: 5000,
            default_max_retries: DEFAULT_MAX_RETRIES,
            simulate_failures: true,
            log_json: false,
        }
    }
}

fn is_json_log_format(value: Option<&str>) -> bool {
    value.is_some_and(|format| format.trim().eq_ignore_ascii_case("json"))
}

fn parse_default_max_retries(value: Option<String>) -> anyhow::Result<u32> {
    let retries: u32 = match value.as_deref().map(str::trim) {
        None | Some("") => return Ok(DEFAULT_MAX_RETRIES),
        Some(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("DEFAULT_MAX_RETRIES must be a valid u32"))?,
    };
    if !(1..=MAX_RETRIES_LIMIT).contains(&retries) {
        anyhow::bail!(
            "DEFAULT_MAX_RETRIES must be between 1 and {}, got {}",
            MAX_RETRIES_LIMIT,
            retries
        );
    }
    Ok(retries)
}

fn parse_bool(name: &str, value: Option<String>, default: bool) -> anyhow::Result<bool> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
        Some(_) => Err(anyhow::anyhow!("{} must be true or false", name)),
    }
}
