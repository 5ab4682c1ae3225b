//! Cached, authorized GET client for the Volvo API

use super::cache::{CacheKey, ResponseCache};
use super::transport::{RawResponse, Transport};
use crate::auth::{AccessToken, TokenManager};
use crate::clock::Clock;
use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};
use crate::flight::SingleFlight;
use crate::logging::{StructuredLogger, get_api_logger, get_logger};
use crate::retry::backoff_delay;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Per-request behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Skip the cache read; the response is still cached
    pub force: bool,
    /// Treat 204 or an empty body as `Null` instead of an error
    pub allow_empty: bool,
}

impl RequestOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn allow_empty() -> Self {
        Self {
            allow_empty: true,
            ..Self::default()
        }
    }
}

/// Counters for cache effectiveness and remote latency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub network_calls: u64,
    pub remote_elapsed: Duration,
}

/// Retry settings for 5xx responses
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub max_age: chrono::Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            max_age: config.max_age_delta(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        }
    }
}

pub struct CachedClient {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenManager>,
    clock: Arc<dyn Clock>,
    cache: ResponseCache,
    flight: SingleFlight<CacheKey, Arc<Value>>,
    settings: ClientSettings,
    stats: Mutex<ClientStats>,
    logger: StructuredLogger,
    api_logger: StructuredLogger,
}

impl CachedClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenManager>,
        clock: Arc<dyn Clock>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            transport,
            tokens,
            clock,
            cache: ResponseCache::new(settings.max_age),
            flight: SingleFlight::new(),
            settings,
            stats: Mutex::new(ClientStats::default()),
            logger: get_logger("http"),
            api_logger: get_api_logger("http"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.api_logger = logger.api();
        self.logger = logger;
        self
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn stats(&self) -> ClientStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record<F: FnOnce(&mut ClientStats)>(&self, f: F) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Cached GET with default options
    pub async fn get(&self, key: &CacheKey) -> Result<Arc<Value>> {
        self.get_with(key, RequestOptions::default()).await
    }

    /// Cached GET; a hit never touches the network or the token
    pub async fn get_with(&self, key: &CacheKey, options: RequestOptions) -> Result<Arc<Value>> {
        if !options.force
            && let Some(entry) = self.cache.get_fresh(key, self.clock.now())
        {
            self.record(|s| s.cache_hits += 1);
            self.api_logger.trace(&format!("Cache hit for {}", key));
            return Ok(entry.payload);
        }
        self.record(|s| s.cache_misses += 1);

        self.flight
            .run(key.clone(), || async {
                // The previous leader may have filled the cache after our check
                if !options.force
                    && let Some(entry) = self.cache.get_fresh(key, self.clock.now())
                {
                    return Ok(entry.payload);
                }
                self.fetch(key, options).await
            })
            .await
    }

    async fn send(&self, key: &CacheKey, token: &AccessToken) -> Result<RawResponse> {
        self.api_logger.debug(&format!("GET {}", key));
        self.record(|s| s.network_calls += 1);
        let resp = self
            .transport
            .get(&key.endpoint, &key.query, token.secret())
            .await
            .inspect_err(|e| self.api_logger.debug(&format!("GET {} failed: {}", key, e)))?;
        self.record(|s| s.remote_elapsed += resp.elapsed);
        self.api_logger.debug(&format!(
            "GET {} -> {} in {}ms",
            key,
            resp.status,
            resp.elapsed.as_millis()
        ));
        self.api_logger.trace(&format!("Response body: {}", resp.body));
        Ok(resp)
    }

    async fn fetch(&self, key: &CacheKey, options: RequestOptions) -> Result<Arc<Value>> {
        let mut token = self.tokens.ensure_valid_token().await?;
        let mut reauthorized = false;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let resp = self.send(key, &token).await?;
            match resp.status {
                200 | 207 => return self.store(key, &resp, options),
                204 if options.allow_empty => return Ok(Arc::new(Value::Null)),
                401 if !reauthorized => {
                    reauthorized = true;
                    token = self.tokens.force_refresh(&token).await?;
                }
                401 => {
                    return Err(ConnectorError::api(
                        401,
                        format!(
                            "could not fetch data even after re-authorization: {}",
                            resp.body
                        ),
                    ));
                }
                429 => {
                    self.logger.warn(&format!(
                        "Too many requests from this account while fetching {}",
                        key
                    ));
                    return Err(ConnectorError::api(429, resp.body));
                }
                500 if attempt <= self.settings.max_retries => {
                    let delay = backoff_delay(self.settings.retry_backoff, attempt);
                    self.logger.debug(&format!(
                        "Server error on {} (attempt {}/{}), retrying in {:?}",
                        key,
                        attempt,
                        self.settings.max_retries + 1,
                        delay
                    ));
                    tokio::time::sleep(delay).await;
                }
                status => return Err(ConnectorError::api(status, resp.body)),
            }
        }
    }

    fn store(&self, key: &CacheKey, resp: &RawResponse, options: RequestOptions) -> Result<Arc<Value>> {
        if resp.body.trim().is_empty() {
            return if options.allow_empty {
                Ok(Arc::new(Value::Null))
            } else {
                Err(ConnectorError::serialization(format!(
                    "empty response body from {}",
                    key
                )))
            };
        }
        let payload = match serde_json::from_str::<Value>(&resp.body) {
            Ok(value) => Arc::new(value),
            Err(_) if options.allow_empty => return Ok(Arc::new(Value::Null)),
            Err(e) => {
                return Err(ConnectorError::serialization(format!(
                    "invalid JSON from {}: {}",
                    key, e
                )));
            }
        };
        self.cache
            .insert(key.clone(), payload.clone(), self.clock.now());
        Ok(payload)
    }
}
