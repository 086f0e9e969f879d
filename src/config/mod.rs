//! Configuration management
//!
//! This module handles loading and parsing configuration for the simplebank
//! server. Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults. The token
//! symmetric key has no usable default: an empty key fails at startup when
//! the token maker is constructed.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Token configuration
    #[serde(default)]
    pub token: TokenConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/simplebank.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Token configuration
///
/// Durations are written the way operators usually write them (`15m`,
/// `24h`, `1h30m`) and parsed by [`parse_duration`].
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Symmetric key for sealing tokens, exactly 32 bytes
    #[serde(default)]
    pub symmetric_key: String,
    /// Lifetime of access tokens
    #[serde(default = "default_access_token_duration", with = "duration_str")]
    pub access_token_duration: Duration,
    /// Lifetime of refresh tokens and their sessions
    #[serde(default = "default_refresh_token_duration", with = "duration_str")]
    pub refresh_token_duration: Duration,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("symmetric_key", &"<redacted>")
            .field("access_token_duration", &self.access_token_duration)
            .field("refresh_token_duration", &self.refresh_token_duration)
            .finish()
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            symmetric_key: String::new(),
            access_token_duration: default_access_token_duration(),
            refresh_token_duration: default_refresh_token_duration(),
        }
    }
}

fn default_access_token_duration() -> Duration {
    Duration::minutes(15)
}

fn default_refresh_token_duration() -> Duration {
    Duration::hours(24)
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - SIMPLEBANK_SERVER_HOST
    /// - SIMPLEBANK_SERVER_PORT
    /// - SIMPLEBANK_SERVER_CORS_ORIGIN
    /// - SIMPLEBANK_DATABASE_DRIVER
    /// - SIMPLEBANK_DATABASE_URL
    /// - SIMPLEBANK_TOKEN_SYMMETRIC_KEY
    /// - SIMPLEBANK_TOKEN_ACCESS_TOKEN_DURATION
    /// - SIMPLEBANK_TOKEN_REFRESH_TOKEN_DURATION
    /// - SIMPLEBANK_LOG_LEVEL
    /// - SIMPLEBANK_LOG_FORMAT
    /// - SIMPLEBANK_ENVIRONMENT
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Unknown enum values and unparsable ports are ignored; a malformed
    /// duration is an error.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("SIMPLEBANK_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SIMPLEBANK_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("SIMPLEBANK_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(driver) = std::env::var("SIMPLEBANK_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("SIMPLEBANK_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(key) = std::env::var("SIMPLEBANK_TOKEN_SYMMETRIC_KEY") {
            self.token.symmetric_key = key;
        }
        if let Ok(value) = std::env::var("SIMPLEBANK_TOKEN_ACCESS_TOKEN_DURATION") {
            self.token.access_token_duration = parse_duration(&value)?;
        }
        if let Ok(value) = std::env::var("SIMPLEBANK_TOKEN_REFRESH_TOKEN_DURATION") {
            self.token.refresh_token_duration = parse_duration(&value)?;
        }

        if let Ok(level) = std::env::var("SIMPLEBANK_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Ok(format) = std::env::var("SIMPLEBANK_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "text" => self.log.format = LogFormat::Text,
                "json" => self.log.format = LogFormat::Json,
                _ => {}
            }
        }
        if let Ok(environment) = std::env::var("SIMPLEBANK_ENVIRONMENT") {
            match environment.to_lowercase().as_str() {
                "development" => self.environment = Environment::Development,
                "production" => self.environment = Environment::Production,
                _ => {}
            }
        }

        Ok(())
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let access = self.token.access_token_duration;
        let refresh = self.token.refresh_token_duration;

        if access <= Duration::zero() {
            return Err(ConfigError::ValidationError(
                "token.access_token_duration must be positive".to_string(),
            ));
        }
        if refresh <= Duration::zero() {
            return Err(ConfigError::ValidationError(
                "token.refresh_token_duration must be positive".to_string(),
            ));
        }
        if refresh <= access {
            return Err(ConfigError::ValidationError(format!(
                "token.refresh_token_duration ({}) must be longer than token.access_token_duration ({})",
                format_duration(refresh),
                format_duration(access)
            )));
        }

        Ok(())
    }

    /// Log format actually used: text output is only honoured in development
    pub fn effective_log_format(&self) -> LogFormat {
        match (self.environment, self.log.format) {
            (Environment::Development, LogFormat::Text) => LogFormat::Text,
            _ => LogFormat::Json,
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

/// Parse a duration string such as `15m`, `1h30m`, `1.5h`, `-2s` or `250ms`.
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare
/// `0` is accepted without a unit.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let mut rest = value.trim();
    let negative = match rest.as_bytes().first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    if rest == "0" {
        return Ok(Duration::zero());
    }
    if rest.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total_nanos: i128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(invalid("expected a number"));
        }

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let unit_nanos: i128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if fraction.contains('.') {
            return Err(invalid("expected a number"));
        }
        let whole: i128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("number out of range"))?
        };

        total_nanos = whole
            .checked_mul(unit_nanos)
            .and_then(|n| total_nanos.checked_add(n))
            .ok_or_else(|| invalid("duration out of range"))?;

        // Fractional part, truncated to nanosecond precision
        let mut scale = unit_nanos;
        for digit in fraction.bytes() {
            scale /= 10;
            if scale == 0 {
                break;
            }
            total_nanos += i128::from(digit - b'0') * scale;
        }

        rest = tail;
    }

    if negative {
        total_nanos = -total_nanos;
    }

    let nanos = i64::try_from(total_nanos).map_err(|_| invalid("duration out of range"))?;
    Ok(Duration::nanoseconds(nanos))
}

/// Render a duration in the largest unit that represents it exactly
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(&str, i64); 4] = [
        ("h", 3_600_000),
        ("m", 60_000),
        ("s", 1_000),
        ("ms", 1),
    ];

    let millis = duration.num_milliseconds();
    if millis == 0 {
        return "0s".to_string();
    }
    for (suffix, size) in UNITS {
        if millis % size == 0 {
            return format!("{}{}", millis / size, suffix);
        }
    }
    format!("{}ms", millis)
}

/// Serde adapter storing durations as strings
mod duration_str {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::parse_duration(&value).map_err(serde::de::Error::custom)
    }
}

// Shared mutex for all config tests that modify environment variables.
// Both `tests` and `property_tests` modules use this to prevent race conditions.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: [&str; 11] = [
    "SIMPLEBANK_SERVER_HOST",
    "SIMPLEBANK_SERVER_PORT",
    "SIMPLEBANK_SERVER_CORS_ORIGIN",
    "SIMPLEBANK_DATABASE_DRIVER",
    "SIMPLEBANK_DATABASE_URL",
    "SIMPLEBANK_TOKEN_SYMMETRIC_KEY",
    "SIMPLEBANK_TOKEN_ACCESS_TOKEN_DURATION",
    "SIMPLEBANK_TOKEN_REFRESH_TOKEN_DURATION",
    "SIMPLEBANK_LOG_LEVEL",
    "SIMPLEBANK_LOG_FORMAT",
    "SIMPLEBANK_ENVIRONMENT",
];

#[cfg(test)]
fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}
