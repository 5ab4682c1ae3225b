//! Token manager: keeps a usable access token for the API client

use super::jwt::{TokenClaims, decode_unverified_for_expiry};
use super::refresh::{RefreshFailure, RefreshStrategy, RefreshedToken};
use crate::clock::Clock;
use crate::config::ConnectorConfig;
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{ConnectorError, Result};
use crate::flight::SingleFlight;
use crate::logging::{StructuredLogger, get_logger};
use crate::retry::backoff_delay;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Bearer token handed to the HTTP client
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// The raw bearer string
    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Refresh timing and retry knobs
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Refresh once `now + refresh_margin >= exp`
    pub refresh_margin: chrono::Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            refresh_margin: chrono::Duration::seconds(60),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl TokenSettings {
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            refresh_margin: config.refresh_margin(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        }
    }
}

struct Session {
    credentials: Credentials,
    claims: Option<TokenClaims>,
    /// Set once the grant is rejected; the store stays empty from then on
    revoked: bool,
}

pub struct TokenManager {
    session: RwLock<Option<Session>>,
    store: Arc<dyn CredentialStore>,
    strategy: Arc<dyn RefreshStrategy>,
    clock: Arc<dyn Clock>,
    settings: TokenSettings,
    flight: SingleFlight<(), AccessToken>,
    logger: StructuredLogger,
}

impl TokenManager {
    /// Load credentials from the store; fails with `Config` when keys are missing
    pub fn new(
        store: Arc<dyn CredentialStore>,
        strategy: Arc<dyn RefreshStrategy>,
        clock: Arc<dyn Clock>,
        settings: TokenSettings,
    ) -> Result<Self> {
        let logger = get_logger("auth");
        let mut credentials = store.load()?;

        let claims = match decode_unverified_for_expiry(&credentials.access_token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                logger.warn(&format!("Configured access token cannot be used: {}", e));
                None
            }
        };
        credentials.expiry = claims.as_ref().map(|c| c.exp);
        if let Some(exp) = credentials.expiry {
            logger.debug(&format!(
                "Access token expires at {} (refresh strategy: {})",
                exp,
                strategy.name()
            ));
        }

        Ok(Self {
            session: RwLock::new(Some(Session {
                credentials,
                claims,
                revoked: false,
            })),
            store,
            strategy,
            clock,
            settings,
            flight: SingleFlight::new(),
            logger,
        })
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// A token that stays valid for at least the refresh margin
    pub async fn ensure_valid_token(&self) -> Result<AccessToken> {
        if let Some(token) = self.current_if_fresh().await? {
            return Ok(token);
        }
        self.flight
            .run((), || async {
                // A refresh that finished while we queued may already cover us
                match self.current_if_fresh().await? {
                    Some(token) => Ok(token),
                    None => self.refresh_with_retry().await,
                }
            })
            .await
    }

    /// Refresh after the API rejected `rejected`, unless someone already did
    pub async fn force_refresh(&self, rejected: &AccessToken) -> Result<AccessToken> {
        self.flight
            .run((), || async {
                if let Some(token) = self.current_if_fresh().await?
                    && token.secret() != rejected.secret()
                {
                    return Ok(token);
                }
                self.logger
                    .info("Server asks for new authorization, refreshing token");
                self.refresh_with_retry().await
            })
            .await
    }

    /// Scopes granted to the current token; `None` when the token does not say
    pub async fn granted_scopes(&self) -> Option<Vec<String>> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.claims.as_ref())
            .and_then(|c| c.scopes.clone())
    }

    /// Expiry of the current token, if it could be decoded
    pub async fn expiry(&self) -> Option<DateTime<Utc>> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.credentials.expiry)
    }

    /// Write the current token state to the credential store
    pub async fn persist(&self) -> Result<()> {
        let guard = self.session.read().await;
        match guard.as_ref() {
            Some(session) if session.revoked => {
                self.logger
                    .debug("Session was revoked, leaving the token store empty");
                Ok(())
            }
            Some(session) => self.store.save(&session.credentials),
            None => Ok(()),
        }
    }

    /// Persist and then drop credentials from memory
    pub async fn close(&self) -> Result<()> {
        let persisted = self.persist().await;
        self.session.write().await.take();
        self.logger.debug("Credentials discarded from memory");
        persisted
    }

    async fn current_if_fresh(&self) -> Result<Option<AccessToken>> {
        let guard = self.session.read().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| ConnectorError::auth("token manager is closed"))?;
        let now = self.clock.now();
        let creds = &session.credentials;
        Ok(creds
            .expiry
            .filter(|exp| {
                now.checked_add_signed(self.settings.refresh_margin)
                    .is_some_and(|deadline| deadline < *exp)
            })
            .map(|exp| AccessToken::new(creds.access_token.clone(), exp)))
    }

    async fn snapshot(&self) -> Result<Credentials> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.credentials.clone())
            .ok_or_else(|| ConnectorError::auth("token manager is closed"))
    }

    async fn refresh_with_retry(&self) -> Result<AccessToken> {
        let credentials = self.snapshot().await?;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.strategy.refresh(&credentials).await {
                Ok(refreshed) => return self.install(refreshed).await,
                Err(RefreshFailure::Revoked(reason)) => {
                    self.logger
                        .error(&format!("Refresh grant was rejected: {}", reason));
                    self.revoke().await;
                    return Err(ConnectorError::auth(format!(
                        "refresh grant rejected: {}",
                        reason
                    )));
                }
                Err(RefreshFailure::Unsupported(msg)) => {
                    return Err(ConnectorError::auth(msg));
                }
                Err(RefreshFailure::Retryable(err)) => {
                    if attempt > self.settings.max_retries {
                        return Err(ConnectorError::auth(format!(
                            "token refresh failed after {} attempts: {}",
                            attempt, err
                        )));
                    }
                    let delay = backoff_delay(self.settings.retry_backoff, attempt);
                    self.logger.warn(&format!(
                        "Token refresh attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        self.settings.max_retries + 1,
                        err,
                        delay
                    ));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn install(&self, refreshed: RefreshedToken) -> Result<AccessToken> {
        let claims = decode_unverified_for_expiry(&refreshed.access_token)?;
        if claims.exp <= self.clock.now() {
            return Err(ConnectorError::auth("refreshed token is already expired"));
        }
        let token = AccessToken::new(refreshed.access_token.clone(), claims.exp);

        let saved = {
            let mut guard = self.session.write().await;
            let session = guard
                .as_mut()
                .ok_or_else(|| ConnectorError::auth("token manager is closed"))?;
            session.credentials.access_token = refreshed.access_token;
            if refreshed.refresh_token.is_some() {
                session.credentials.refresh_token = refreshed.refresh_token;
            }
            session.credentials.expiry = Some(claims.exp);
            session.claims = Some(claims);
            session.revoked = false;
            session.credentials.clone()
        };

        self.logger
            .info(&format!("Access token refreshed, valid until {}", token.expires_at()));
        if let Err(e) = self.store.save(&saved) {
            self.logger
                .warn(&format!("Failed to persist refreshed token: {}", e));
        }
        Ok(token)
    }

    async fn revoke(&self) {
        if let Some(session) = self.session.write().await.as_mut() {
            session.credentials.refresh_token = None;
            session.revoked = true;
        }
        if let Err(e) = self.store.clear() {
            self.logger
                .warn(&format!("Failed to clear persisted tokens: {}", e));
        }
    }
}
