//! Test utilities
//!
//! Scripted transport and refresh strategy plus JWT and payload builders, for
//! exercising the connector without a network.

use crate::auth::{RefreshFailure, RefreshStrategy, RefreshedToken};
use crate::clock::Clock;
use crate::config::ConnectorConfig;
use crate::credentials::Credentials;
use crate::error::{ConnectorError, Result};
use crate::http::{RawResponse, Transport};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Unsigned JWT with the given expiry and optional `scope` claim
pub fn make_jwt(exp: DateTime<Utc>, scope: Option<&str>) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
    let mut claims = json!({"sub": "test-user", "exp": exp.timestamp(), "iat": exp.timestamp() - 1800});
    if let Some(scope) = scope {
        claims["scope"] = Value::String(scope.to_string());
    }
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

/// Minimal valid configuration with the given token
pub fn test_config(token: &str) -> ConnectorConfig {
    ConnectorConfig {
        connector_id: Some("volvo-test".to_string()),
        vcc_api_key_primary: Some("primary-key".to_string()),
        vcc_api_key_secondary: Some("secondary-key".to_string()),
        connected_vehicle_token: Some(token.to_string()),
        interval: 300,
        max_age: Some(300),
        retry_backoff_ms: 1,
        ..ConnectorConfig::default()
    }
}

/// `{"data": [{"vin": ...}]}`
pub fn vehicles_payload(vins: &[&str]) -> String {
    let data: Vec<Value> = vins.iter().map(|v| json!({"vin": v})).collect();
    json!({ "data": data }).to_string()
}

pub fn details_payload(vin: &str) -> String {
    json!({"data": {
        "vin": vin,
        "modelYear": 2022,
        "gearbox": "AUTOMATIC",
        "fuelType": "ELECTRIC",
        "externalColour": "Crystal White",
        "batteryCapacityKWH": 78.0,
        "descriptions": {"model": "XC40", "upholstery": "CHARCOAL", "steering": "LEFT"}
    }})
    .to_string()
}

/// `{"data": {name: {"value": v, ...}}}` for status endpoints
pub fn status_payload(fields: &[(&str, Value)]) -> String {
    let mut data = serde_json::Map::new();
    for (name, value) in fields {
        data.insert(
            (*name).to_string(),
            json!({"value": value, "timestamp": "2024-05-01T08:00:00Z"}),
        );
    }
    json!({ "data": data }).to_string()
}

#[derive(Clone)]
enum Scripted {
    Response(RawResponse),
    NetworkError(String),
}

#[derive(Default)]
struct StubState {
    queued: HashMap<String, VecDeque<Scripted>>,
    fallback: HashMap<String, Scripted>,
    calls: HashMap<String, usize>,
    bearers: Vec<String>,
}

/// Transport answering from per-path scripts
///
/// Queued responses are used first, then the path's fallback; unknown paths
/// answer 404.
#[derive(Default)]
pub struct StubTransport {
    state: Mutex<StubState>,
    total: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every request to `path` with this response
    pub fn respond(&self, path: &str, status: u16, body: impl Into<String>) {
        self.lock().fallback.insert(
            path.to_string(),
            Scripted::Response(RawResponse::new(status, body)),
        );
    }

    /// Answer the next request to `path` with this response
    pub fn push(&self, path: &str, status: u16, body: impl Into<String>) {
        self.lock()
            .queued
            .entry(path.to_string())
            .or_default()
            .push_back(Scripted::Response(RawResponse::new(status, body)));
    }

    /// Fail the next request to `path` at the transport level
    pub fn push_network_error(&self, path: &str, message: &str) {
        self.lock()
            .queued
            .entry(path.to_string())
            .or_default()
            .push_back(Scripted::NetworkError(message.to_string()));
    }

    /// Sleep this long inside every request
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn calls(&self, path: &str) -> usize {
        self.lock().calls.get(path).copied().unwrap_or(0)
    }

    /// Bearer tokens in request order
    pub fn bearers(&self) -> Vec<String> {
        self.lock().bearers.clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn get(
        &self,
        path: &str,
        _query: &[(String, String)],
        bearer: &str,
    ) -> Result<RawResponse> {
        self.total.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = {
            let mut state = self.lock();
            *state.calls.entry(path.to_string()).or_default() += 1;
            state.bearers.push(bearer.to_string());
            let queued = state.queued.get_mut(path).and_then(VecDeque::pop_front);
            queued.or_else(|| state.fallback.get(path).cloned())
        };
        match scripted {
            Some(Scripted::Response(resp)) => Ok(resp),
            Some(Scripted::NetworkError(msg)) => Err(ConnectorError::network(msg)),
            None => Ok(RawResponse::new(404, r#"{"error":"not found"}"#)),
        }
    }
}

/// Refresh strategy with scripted outcomes and a call counter
///
/// Without a scripted outcome it issues a token valid for an hour past
/// the clock's current time.
pub struct StubRefresh {
    clock: Arc<dyn Clock>,
    scope: Option<String>,
    outcomes: Mutex<VecDeque<std::result::Result<RefreshedToken, RefreshFailure>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StubRefresh {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            scope: None,
            outcomes: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, outcome: std::result::Result<RefreshedToken, RefreshFailure>) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshStrategy for StubRefresh {
    async fn refresh(
        &self,
        _credentials: &Credentials,
    ) -> std::result::Result<RefreshedToken, RefreshFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| {
            Ok(RefreshedToken {
                access_token: make_jwt(
                    self.clock.now() + chrono::Duration::hours(1),
                    self.scope.as_deref(),
                ),
                refresh_token: Some("rotated-refresh".to_string()),
            })
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
