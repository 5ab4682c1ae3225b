//! Pluggable token refresh mechanics

use crate::config::OAuthConfig;
use crate::credentials::Credentials;
use crate::error::ConnectorError;
use crate::logging::{StructuredLogger, get_api_logger, get_logger};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::time::Duration;

/// Header carrying the VCC application key
pub const VCC_API_KEY_HEADER: &str = "vcc-api-key";

/// Token material returned by a successful refresh
#[derive(Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Rotated refresh token, when the issuer hands out a new one
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Why a refresh attempt did not produce a token
#[derive(Debug, Clone)]
pub enum RefreshFailure {
    /// The grant was definitively rejected; persisted tokens are useless
    Revoked(String),
    /// This configuration cannot refresh at all
    Unsupported(String),
    /// Worth another attempt after backing off
    Retryable(ConnectorError),
}

impl std::fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Revoked(msg) => write!(f, "refresh grant rejected: {}", msg),
            Self::Unsupported(msg) => write!(f, "{}", msg),
            Self::Retryable(err) => write!(f, "{}", err),
        }
    }
}

impl From<reqwest::Error> for RefreshFailure {
    fn from(err: reqwest::Error) -> Self {
        Self::Retryable(err.into())
    }
}

/// How the token manager turns stored credentials into a new access token
#[async_trait]
pub trait RefreshStrategy: Send + Sync {
    async fn refresh(&self, credentials: &Credentials) -> Result<RefreshedToken, RefreshFailure>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Static token: nothing can be refreshed
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRefresh;

#[async_trait]
impl RefreshStrategy for NoRefresh {
    async fn refresh(&self, _credentials: &Credentials) -> Result<RefreshedToken, RefreshFailure> {
        Err(RefreshFailure::Unsupported(
            "token expired, no refresh configured".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize, Default)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth2 refresh-token grant against a configurable token endpoint
pub struct OAuthRefreshGrant {
    client: reqwest::Client,
    config: OAuthConfig,
    logger: StructuredLogger,
    api_logger: StructuredLogger,
}

impl OAuthRefreshGrant {
    pub fn new(config: OAuthConfig, timeout: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: OAuthConfig) -> Self {
        Self {
            client,
            config,
            logger: get_logger("auth"),
            api_logger: get_api_logger("auth"),
        }
    }

    async fn post_grant(
        &self,
        refresh_token: &str,
        api_key: &str,
    ) -> Result<reqwest::Response, RefreshFailure> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        self.api_logger
            .debug(&format!("POST {} (refresh_token grant)", self.config.token_url));
        let resp = self
            .client
            .post(&self.config.token_url)
            .header(VCC_API_KEY_HEADER, api_key)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;
        self.api_logger.debug(&format!(
            "POST {} -> {}",
            self.config.token_url,
            resp.status().as_u16()
        ));
        Ok(resp)
    }
}

#[async_trait]
impl RefreshStrategy for OAuthRefreshGrant {
    async fn refresh(&self, credentials: &Credentials) -> Result<RefreshedToken, RefreshFailure> {
        let Some(refresh_token) = credentials.refresh_token.as_deref() else {
            return Err(RefreshFailure::Unsupported(
                "token expired and no refresh token is available".to_string(),
            ));
        };

        let keys = [
            ("primary", credentials.api_key_primary.as_str()),
            ("secondary", credentials.api_key_secondary.as_str()),
        ];
        for (idx, (label, key)) in keys.iter().enumerate() {
            let resp = self.post_grant(refresh_token, key).await?;
            let status = resp.status().as_u16();
            let last_key = idx + 1 == keys.len();

            match status {
                200 => {
                    let body: TokenResponse = resp.json().await?;
                    return Ok(RefreshedToken {
                        access_token: body.access_token,
                        refresh_token: body.refresh_token,
                    });
                }
                401 | 403 if !last_key => {
                    self.logger.warn(&format!(
                        "Token endpoint rejected the {} API key ({}), trying the next one",
                        label, status
                    ));
                }
                400 | 401 | 403 => {
                    let body: TokenErrorResponse = resp.json().await.unwrap_or_default();
                    let reason = body
                        .error_description
                        .or(body.error)
                        .unwrap_or_else(|| format!("status {}", status));
                    return Err(RefreshFailure::Revoked(reason));
                }
                _ => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(RefreshFailure::Retryable(ConnectorError::api(status, body)));
                }
            }
        }
        Err(RefreshFailure::Revoked("all API keys were rejected".to_string()))
    }

    fn name(&self) -> &'static str {
        "oauth_refresh_grant"
    }
}
