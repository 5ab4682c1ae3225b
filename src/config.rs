//! Configuration management for the Volvo connector
//!
//! The host framework normally hands the connector an already parsed JSON
//! object; the standalone binary loads the same schema from a JSON or YAML
//! file. Required credentials are optional at the serde level; a missing key
//! surfaces as a [`ConnectorError::Config`] from the credential store.

use crate::error::{ConnectorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Interval below which the API quota is likely to be exhausted
pub const RECOMMENDED_MIN_INTERVAL_SECS: u64 = 60;

/// Upper bound for every period expressed in seconds
pub const MAX_PERIOD_SECS: u64 = 7 * 24 * 60 * 60;

/// Keys whose values must never appear in logs
const SECRET_KEYS: &[&str] = &[
    "vcc_api_key_primary",
    "vcc_api_key_secondary",
    "connected_vehicle_token",
    "refresh_token",
    "client_secret",
];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Identifier of this connector instance (generated when absent)
    pub connector_id: Option<String>,

    /// Connector log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub log_level: String,

    /// Log level for request/response metadata of the Volvo API
    pub api_log_level: String,

    /// Poll period in seconds
    pub interval: u64,

    /// Cache validity window in seconds; defaults to `interval - 1`
    pub max_age: Option<u64>,

    /// Primary VCC API key
    pub vcc_api_key_primary: Option<String>,

    /// Secondary VCC API key
    pub vcc_api_key_secondary: Option<String>,

    /// Connected Vehicle JWT
    pub connected_vehicle_token: Option<String>,

    /// Optional OAuth2 refresh token used to renew the access token
    pub refresh_token: Option<String>,

    /// OAuth2 token endpoint settings; without them the token is static
    pub oauth: Option<OAuthConfig>,

    /// Refresh this many seconds before the token's `exp`
    pub refresh_margin_secs: u64,

    /// Timeout applied to every outbound request
    pub request_timeout_secs: u64,

    /// Bounded retries for token refresh and 5xx responses
    pub max_retries: u32,

    /// Base backoff between retries in milliseconds
    pub retry_backoff_ms: u64,

    /// Minimum wait after the API reports too many requests
    pub rate_limit_backoff_secs: u64,

    /// Base URL of the Volvo API gateway
    pub api_base_url: String,

    /// Path of the JSON token store; in-memory when absent
    pub token_store: Option<String>,

    /// Logging output configuration
    pub logging: LoggingConfig,
}

/// OAuth2 token endpoint parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthConfig {
    /// Token endpoint URL
    pub token_url: String,

    /// OAuth client id
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Logging output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory or file path for the rolling log file; console only when absent
    pub file: Option<String>,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl ConnectorConfig {
    /// Load configuration from a JSON or YAML file (chosen by extension)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("yaml" | "yml") => Ok(serde_yaml::from_str(&contents)?),
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_json_str(&contents)
                .or_else(|_| serde_yaml::from_str(&contents).map_err(ConnectorError::from)),
        }
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "volvo_connector.yaml",
            "volvo_connector.json",
            "/data/volvo_connector.yaml",
            "/etc/volvo-connector/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Err(ConnectorError::config(format!(
            "no configuration file found (tried {})",
            default_paths.join(", ")
        )))
    }

    /// Parse configuration from a JSON document
    pub fn from_json_str(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Build configuration from a JSON value already parsed by the host
    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Save configuration to a file (JSON or YAML by extension)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let contents = if is_yaml {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(ConnectorError::validation(
                "interval",
                "Must be greater than 0",
            ));
        }

        for (field, secs) in [
            ("interval", Some(self.interval)),
            ("max_age", self.max_age),
            ("refresh_margin_secs", Some(self.refresh_margin_secs)),
            ("rate_limit_backoff_secs", Some(self.rate_limit_backoff_secs)),
            ("request_timeout_secs", Some(self.request_timeout_secs)),
        ] {
            if secs.is_some_and(|s| s > MAX_PERIOD_SECS) {
                return Err(ConnectorError::validation(
                    field.to_string(),
                    format!("Must not exceed {} seconds", MAX_PERIOD_SECS),
                ));
            }
        }

        crate::logging::parse_log_level(&self.log_level)?;
        crate::logging::parse_log_level(&self.api_log_level)?;

        if self.request_timeout_secs == 0 {
            return Err(ConnectorError::validation(
                "request_timeout_secs",
                "Must be greater than 0",
            ));
        }

        if self.max_retries > 10 {
            return Err(ConnectorError::validation(
                "max_retries",
                "Must not exceed 10",
            ));
        }

        check_secure_url("api_base_url", &self.api_base_url)?;

        if let Some(oauth) = &self.oauth {
            check_secure_url("oauth.token_url", &oauth.token_url)?;
            if oauth.client_id.trim().is_empty() {
                return Err(ConnectorError::validation(
                    "oauth.client_id",
                    "Cannot be empty",
                ));
            }
        }

        Ok(())
    }

    /// Non-fatal observations about the configuration
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.interval < RECOMMENDED_MIN_INTERVAL_SECS {
            out.push(format!(
                "interval of {}s is below the recommended minimum of {}s",
                self.interval, RECOMMENDED_MIN_INTERVAL_SECS
            ));
        }
        if self.effective_max_age_secs() > self.interval {
            out.push(format!(
                "max_age ({}s) exceeds interval ({}s); scheduled ticks may reuse stale data",
                self.effective_max_age_secs(),
                self.interval
            ));
        }
        if self.refresh_token.is_some() && self.oauth.is_none() {
            out.push("refresh_token is set but no oauth token endpoint is configured".to_string());
        }
        out
    }

    /// Cache window after defaults are applied
    pub fn effective_max_age_secs(&self) -> u64 {
        self.max_age
            .unwrap_or_else(|| self.interval.saturating_sub(1))
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn max_age_duration(&self) -> Duration {
        Duration::from_secs(self.effective_max_age_secs())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        signed_seconds(self.refresh_margin_secs)
    }

    pub fn max_age_delta(&self) -> chrono::Duration {
        signed_seconds(self.effective_max_age_secs())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Configuration as JSON with credentials masked, for logging
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        redact_in_place(&mut value);
        value
    }
}

/// Seconds as a chrono delta, saturating instead of panicking
fn signed_seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn redact_in_place(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) {
                    if !v.is_null() {
                        *v = serde_json::Value::String("***".to_string());
                    }
                } else {
                    redact_in_place(v);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact_in_place),
        _ => {}
    }
}

/// Accept `https` everywhere and plain `http` only for loopback hosts
fn check_secure_url(field: &str, raw: &str) -> Result<()> {
    let url = reqwest::Url::parse(raw).map_err(|e| {
        ConnectorError::validation(field.to_string(), format!("Invalid URL: {}", e))
    })?;
    match url.scheme() {
        "https" => Ok(()),
        "http" if matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]")) => Ok(()),
        other => Err(ConnectorError::validation(
            field.to_string(),
            format!("Insecure transport '{}' is not allowed", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectorConfig::default();
        assert_eq!(config.interval, 180);
        assert_eq!(config.effective_max_age_secs(), 179);
        assert_eq!(config.refresh_margin_secs, 60);
        assert_eq!(config.api_base_url, "https://api.volvocars.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ConnectorConfig::default();
        config.interval = 0;
        assert!(config.validate().is_err());

        config = ConnectorConfig::default();
        config.log_level = "chatty".to_string();
        assert!(config.validate().is_err());

        config = ConnectorConfig::default();
        config.api_base_url = "http://api.volvocars.com".to_string();
        assert!(config.validate().is_err());

        config = ConnectorConfig::default();
        config.api_base_url = "http://127.0.0.1:8080".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let mut config = ConnectorConfig::default();
        config.vcc_api_key_primary = Some("primary-secret".to_string());
        config.connected_vehicle_token = Some("jwt".to_string());
        let text = config.redacted().to_string();
        assert!(!text.contains("primary-secret"));
        assert!(text.contains("***"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ConnectorConfig::from_json_str(
            r#"{"interval": 300, "max_age": 300, "vcc_api_key_primary": "a"}"#,
        )
        .unwrap();
        assert_eq!(config.interval, 300);
        assert_eq!(config.effective_max_age_secs(), 300);
        assert_eq!(config.log_level, "INFO");
        assert!(config.vcc_api_key_secondary.is_none());
    }
}
