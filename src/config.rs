use crate::error::{AppError, Result};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Feature-query endpoint, e.g. `.../FeatureServer/0/query`.
    pub base_url: String,
    #[serde(default = "default_where_clause")]
    pub where_clause: String,
    #[serde(default = "default_record_count", deserialize_with = "deserialize_u64")]
    pub result_record_count: u64,
    #[serde(default = "default_order_by")]
    pub order_by_fields: String,
    #[serde(default = "default_timeout", deserialize_with = "deserialize_u64")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries", deserialize_with = "deserialize_u64")]
    pub max_retries: u64,
    #[serde(default = "default_retry_delay", deserialize_with = "deserialize_u64")]
    pub retry_base_delay_ms: u64,
}

fn default_where_clause() -> String {
    "1=1".to_string()
}

fn default_record_count() -> u64 {
    100
}

fn default_order_by() -> String {
    "CreationDate DESC".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u64 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval", deserialize_with = "deserialize_u64")]
    pub interval_seconds: u64,
    #[serde(default = "default_stale_after", deserialize_with = "deserialize_u64")]
    pub stale_after_seconds: u64,
    #[serde(default, deserialize_with = "deserialize_u64")]
    pub initial_delay_seconds: u64,
}

fn default_interval() -> u64 {
    60
}

fn default_stale_after() -> u64 {
    30
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            stale_after_seconds: default_stale_after(),
            initial_delay_seconds: 0,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_seconds)
    }
}

/// Custom deserializer that handles a count as both number and string
///
/// Accepts:
/// - `interval_seconds: 60` (number)
/// - `interval_seconds: "60"` (string that parses to number)
/// - `interval_seconds: ${POLL_INTERVAL}` (env var substituted to either)
fn deserialize_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CountValue {
        Number(u64),
        String(String),
    }

    match CountValue::deserialize(deserializer)? {
        CountValue::Number(n) => Ok(n),
        CountValue::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid number: '{}'", s))),
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Unexpanded environment variables
    /// - HTTPS feature-query endpoint
    /// - Positive poll interval and sane retry/record bounds
    fn validate(&self) -> Result<()> {
        let fields_to_check = [
            ("source.base_url", &self.source.base_url),
            ("source.where_clause", &self.source.where_clause),
            ("source.order_by_fields", &self.source.order_by_fields),
        ];

        for (field_name, value) in &fields_to_check {
            if value.contains("${") {
                return Err(AppError::Config(format!(
                    "{} contains an unexpanded environment variable. \
                     Please set it or create a .env file.",
                    field_name
                )));
            }
        }

        let parsed = url::Url::parse(&self.source.base_url).map_err(|e| {
            AppError::Config(format!(
                "Invalid source base_url '{}': {}",
                self.source.base_url, e
            ))
        })?;

        if parsed.scheme() != "https" {
            return Err(AppError::Config(format!(
                "Source base_url must use HTTPS, got: {}",
                parsed.scheme()
            )));
        }

        if self.source.where_clause.trim().is_empty() {
            return Err(AppError::Config(
                "source.where_clause cannot be empty (use 1=1 for all records)".to_string(),
            ));
        }

        if self.source.result_record_count == 0 || self.source.result_record_count > 2000 {
            return Err(AppError::Config(format!(
                "source.result_record_count {} must be between 1 and 2000",
                self.source.result_record_count
            )));
        }

        if self.source.timeout_seconds == 0 {
            return Err(AppError::Config(
                "source.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.source.max_retries > 10 {
            return Err(AppError::Config(format!(
                "source.max_retries {} seems too high, maximum recommended is 10",
                self.source.max_retries
            )));
        }

        if self.polling.interval_seconds == 0 {
            return Err(AppError::Config(
                "polling.interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.polling.stale_after_seconds >= self.polling.interval_seconds {
            tracing::warn!(
                "Stale threshold of {}s is not shorter than the {}s poll interval; \
                 data will never be flagged stale between polls",
                self.polling.stale_after_seconds,
                self.polling.interval_seconds
            );
        }

        if self.polling.interval_seconds < 15 {
            tracing::warn!(
                "Poll interval of {} seconds is very short, consider using at least 15 seconds",
                self.polling.interval_seconds
            );
        }

        Ok(())
    }
}

/// Replaces every `${NAME}` with the value of that environment variable.
///
/// All unset names are collected and reported together.
fn expand_env_vars(content: &str) -> Result<String> {
    let pattern = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| AppError::Config(format!("Invalid env pattern: {}", e)))?;

    let mut unset: Vec<String> = Vec::new();
    let expanded = pattern.replace_all(content, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            if !unset.iter().any(|name| name.as_str() == &caps[1]) {
                unset.push(caps[1].to_string());
            }
            caps[0].to_string()
        })
    });

    match unset.first() {
        None => Ok(expanded.into_owned()),
        Some(first) => Err(AppError::Config(format!(
            "Unset environment variable(s) referenced by config: {}. \
             Export them (e.g. `export {}=...`) or add them to .env",
            unset.join(", "),
            first
        ))),
    }
}
