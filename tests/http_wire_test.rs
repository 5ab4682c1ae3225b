use serde_json::json;
use std::time::Duration;
use volvo_connector::auth::{OAuthRefreshGrant, RefreshFailure, RefreshStrategy};
use volvo_connector::config::OAuthConfig;
use volvo_connector::credentials::Credentials;
use volvo_connector::http::{ReqwestTransport, Transport};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credentials(refresh_token: Option<&str>) -> Credentials {
    Credentials {
        api_key_primary: "primary-key".to_string(),
        api_key_secondary: "secondary-key".to_string(),
        access_token: "expired-token".to_string(),
        refresh_token: refresh_token.map(str::to_string),
        expiry: None,
    }
}

fn grant(server: &MockServer) -> OAuthRefreshGrant {
    OAuthRefreshGrant::new(
        OAuthConfig {
            token_url: format!("{}/as/token.oauth2", server.uri()),
            client_id: "volvo-client".to_string(),
            client_secret: None,
        },
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn transport_sends_bearer_and_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/connected-vehicle/v2/vehicles"))
        .and(header("authorization", "Bearer access-token"))
        .and(header("vcc-api-key", "primary-key"))
        .and(header("accept", "application/json"))
        .and(query_param("locale", "en-GB"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let transport =
        ReqwestTransport::new(&server.uri(), "primary-key", Duration::from_secs(5)).unwrap();
    let resp = transport
        .get(
            "/connected-vehicle/v2/vehicles",
            &[("locale".to_string(), "en-GB".to_string())],
            "access-token",
        )
        .await
        .unwrap();

    assert_eq!(resp.status, 200);
    let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
    assert_eq!(body, json!({"data": []}));
}

#[tokio::test]
async fn transport_reports_statuses_without_following_redirects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/moved"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", "https://example.com/elsewhere"),
        )
        .mount(&server)
        .await;

    let transport =
        ReqwestTransport::new(&format!("{}/", server.uri()), "k", Duration::from_secs(5)).unwrap();

    let moved = transport.get("/moved", &[], "t").await.unwrap();
    assert_eq!(moved.status, 302);

    let missing = transport.get("/unknown", &[], "t").await.unwrap();
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn transport_failure_is_network_error() {
    // Nothing listens on the discard port
    let transport =
        ReqwestTransport::new("http://127.0.0.1:9", "k", Duration::from_secs(2)).unwrap();
    let err = transport.get("/", &[], "t").await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn refresh_grant_posts_form_and_reads_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/as/token.oauth2"))
        .and(header("vcc-api-key", "primary-key"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=stored-refresh"))
        .and(body_string_contains("client_id=volvo-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access",
            "refresh_token": "fresh-refresh",
            "token_type": "Bearer",
            "expires_in": 1799
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refreshed = grant(&server)
        .refresh(&credentials(Some("stored-refresh")))
        .await
        .unwrap();

    assert_eq!(refreshed.access_token, "fresh-access");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("fresh-refresh"));
}

#[tokio::test]
async fn refresh_grant_falls_back_to_secondary_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("vcc-api-key", "primary-key"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("vcc-api-key", "secondary-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refreshed = grant(&server)
        .refresh(&credentials(Some("stored-refresh")))
        .await
        .unwrap();

    assert_eq!(refreshed.access_token, "fresh-access");
    assert!(refreshed.refresh_token.is_none());
}

#[tokio::test]
async fn invalid_grant_is_revoked() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Refresh token has expired"
        })))
        .mount(&server)
        .await;

    let failure = grant(&server)
        .refresh(&credentials(Some("stored-refresh")))
        .await
        .unwrap_err();

    match failure {
        RefreshFailure::Revoked(reason) => assert_eq!(reason, "Refresh token has expired"),
        other => panic!("unexpected failure: {}", other),
    }
}

#[tokio::test]
async fn token_endpoint_outage_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let failure = grant(&server)
        .refresh(&credentials(Some("stored-refresh")))
        .await
        .unwrap_err();

    match failure {
        RefreshFailure::Retryable(err) => assert_eq!(err.status(), Some(503)),
        other => panic!("unexpected failure: {}", other),
    }
}

#[tokio::test]
async fn no_refresh_token_means_unsupported() {
    let server = MockServer::start().await;

    let failure = grant(&server).refresh(&credentials(None)).await.unwrap_err();

    assert!(matches!(failure, RefreshFailure::Unsupported(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}
