use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use volvo_connector::ErrorClass;
use volvo_connector::auth::{TokenManager, TokenSettings};
use volvo_connector::clock::{Clock, ManualClock};
use volvo_connector::credentials::{CredentialSeed, MemoryCredentialStore};
use volvo_connector::error::ConnectorError;
use volvo_connector::http::{CacheKey, CachedClient, ClientSettings, RequestOptions};
use volvo_connector::testing::{StubRefresh, StubTransport, make_jwt, test_config};

const PATH: &str = "/connected-vehicle/v2/vehicles";

struct Harness {
    clock: ManualClock,
    transport: Arc<StubTransport>,
    refresh: Arc<StubRefresh>,
    tokens: Arc<TokenManager>,
    client: CachedClient,
}

fn harness(max_age_secs: i64) -> Harness {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
    // Refreshed stub tokens last one hour, so this one differs from them
    let token = make_jwt(clock.now() + Duration::hours(2), None);
    let store = Arc::new(MemoryCredentialStore::new(CredentialSeed::from_config(
        &test_config(&token),
    )));
    let refresh = Arc::new(StubRefresh::new(Arc::new(clock.clone())));
    let settings = TokenSettings {
        retry_backoff: std::time::Duration::from_millis(1),
        ..TokenSettings::default()
    };
    let tokens =
        Arc::new(TokenManager::new(store, refresh.clone(), Arc::new(clock.clone()), settings).unwrap());
    let transport = StubTransport::new();
    let client = CachedClient::new(
        transport.clone(),
        tokens.clone(),
        Arc::new(clock.clone()),
        ClientSettings {
            max_age: Duration::seconds(max_age_secs),
            max_retries: 3,
            retry_backoff: std::time::Duration::from_millis(1),
        },
    );
    Harness {
        clock,
        transport,
        refresh,
        tokens,
        client,
    }
}

#[tokio::test]
async fn entry_expires_exactly_at_max_age() {
    let h = harness(300);
    h.transport.respond(PATH, 200, r#"{"data": []}"#);
    let key = CacheKey::new(PATH);

    h.client.get(&key).await.unwrap();
    h.clock.advance(Duration::seconds(299));
    h.client.get(&key).await.unwrap();
    assert_eq!(h.transport.calls(PATH), 1);

    h.clock.advance(Duration::seconds(1));
    h.client.get(&key).await.unwrap();
    assert_eq!(h.transport.calls(PATH), 2);

    let stats = h.client.stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 2);
    assert_eq!(stats.network_calls, 2);
}

#[tokio::test]
async fn forced_request_bypasses_cache_but_refills_it() {
    let h = harness(300);
    h.transport.respond(PATH, 200, r#"{"data": []}"#);
    let key = CacheKey::new(PATH);

    h.client.get(&key).await.unwrap();
    h.client.get_with(&key, RequestOptions::forced()).await.unwrap();
    assert_eq!(h.transport.calls(PATH), 2);

    h.client.get(&key).await.unwrap();
    assert_eq!(h.transport.calls(PATH), 2);
}

#[tokio::test]
async fn zero_max_age_always_fetches() {
    let h = harness(0);
    h.transport.respond(PATH, 200, r#"{"data": []}"#);
    let key = CacheKey::new(PATH);

    h.client.get(&key).await.unwrap();
    h.client.get(&key).await.unwrap();
    assert_eq!(h.transport.calls(PATH), 2);
}

#[tokio::test]
async fn concurrent_identical_misses_share_one_request() {
    let h = harness(300);
    h.transport.respond(PATH, 200, r#"{"data": [{"vin": "VIN1"}]}"#);
    h.transport.set_delay(std::time::Duration::from_millis(50));
    let key = CacheKey::new(PATH);

    let (a, b, c) = tokio::join!(h.client.get(&key), h.client.get(&key), h.client.get(&key));
    assert_eq!(a.unwrap(), b.unwrap());
    assert!(c.is_ok());
    assert_eq!(h.transport.total_calls(), 1);
}

#[tokio::test]
async fn unauthorized_triggers_one_refresh_and_retry() {
    let h = harness(300);
    h.transport.push(PATH, 401, r#"{"error": "invalid token"}"#);
    h.transport.respond(PATH, 200, r#"{"data": []}"#);

    h.client.get(&CacheKey::new(PATH)).await.unwrap();

    assert_eq!(h.refresh.calls(), 1);
    let bearers = h.transport.bearers();
    assert_eq!(bearers.len(), 2);
    assert_ne!(bearers[0], bearers[1]);
}

#[tokio::test]
async fn second_unauthorized_gives_up() {
    let h = harness(300);
    h.transport.respond(PATH, 401, "");

    let err = h.client.get(&CacheKey::new(PATH)).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(err.classify(), ErrorClass::Auth);
    assert!(err.to_string().contains("even after re-authorization"));
    assert_eq!(h.refresh.calls(), 1);
    assert_eq!(h.transport.calls(PATH), 2);
}

#[tokio::test]
async fn rate_limit_is_not_retried() {
    let h = harness(300);
    h.transport.respond(PATH, 429, "slow down");

    let err = h.client.get(&CacheKey::new(PATH)).await.unwrap_err();
    assert_eq!(err.classify(), ErrorClass::RateLimited);
    assert_eq!(h.transport.calls(PATH), 1);
    assert!(h.client.cache().is_empty());
}

#[tokio::test]
async fn server_errors_are_retried_with_backoff() {
    let h = harness(300);
    h.transport.push(PATH, 500, "oops");
    h.transport.push(PATH, 500, "oops");
    h.transport.respond(PATH, 200, r#"{"data": []}"#);

    h.client.get(&CacheKey::new(PATH)).await.unwrap();
    assert_eq!(h.transport.calls(PATH), 3);
}

#[tokio::test]
async fn server_errors_beyond_retry_budget_fail() {
    let h = harness(300);
    h.transport.respond(PATH, 500, "oops");

    let err = h.client.get(&CacheKey::new(PATH)).await.unwrap_err();
    assert_eq!(err.classify(), ErrorClass::Transient);
    // Initial attempt plus three retries
    assert_eq!(h.transport.calls(PATH), 4);
}

#[tokio::test]
async fn network_failure_leaves_cache_and_token_untouched() {
    let h = harness(300);
    h.transport.respond(PATH, 200, r#"{"data": []}"#);
    let key = CacheKey::new(PATH);
    h.client.get(&key).await.unwrap();
    let expiry = h.tokens.expiry().await;

    h.clock.advance(Duration::seconds(300));
    h.transport.push_network_error(PATH, "connection reset");
    let err = h.client.get(&key).await.unwrap_err();

    assert!(matches!(err, ConnectorError::Network { .. }));
    assert_eq!(h.client.cache().len(), 1);
    assert_eq!(h.tokens.expiry().await, expiry);
    assert_eq!(h.refresh.calls(), 0);
}

#[tokio::test]
async fn empty_body_handling() {
    let h = harness(300);
    h.transport.respond(PATH, 200, "");

    let err = h.client.get(&CacheKey::new(PATH)).await.unwrap_err();
    assert_eq!(err.classify(), ErrorClass::Publish);

    let value = h
        .client
        .get_with(&CacheKey::new(PATH), RequestOptions::allow_empty())
        .await
        .unwrap();
    assert!(value.is_null());
    assert!(h.client.cache().is_empty());
}

#[tokio::test]
async fn client_errors_are_permanent() {
    let h = harness(300);

    let err = h
        .client
        .get(&CacheKey::new("/connected-vehicle/v2/vehicles/VIN1/doors"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.classify(), ErrorClass::Permanent);
}
