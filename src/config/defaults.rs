use super::*;

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connector_id: None,
            log_level: "INFO".to_string(),
            api_log_level: "WARN".to_string(),
            interval: 180,
            max_age: None,
            vcc_api_key_primary: None,
            vcc_api_key_secondary: None,
            connected_vehicle_token: None,
            refresh_token: None,
            oauth: None,
            refresh_margin_secs: 60,
            request_timeout_secs: 180,
            max_retries: 3,
            retry_backoff_ms: 100,
            rate_limit_backoff_secs: 900,
            api_base_url: "https://api.volvocars.com".to_string(),
            token_store: None,
            logging: LoggingConfig::default(),
        }
    }
}
