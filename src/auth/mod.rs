//! Access token lifecycle for the Connected Vehicle API
//!
//! - `jwt`: unverified decoding of expiry and scopes
//! - `refresh`: the `RefreshStrategy` seam and its implementations
//! - `manager`: `TokenManager`, which hands out tokens and refreshes them

pub mod jwt;
pub mod manager;
pub mod refresh;

pub use jwt::{TokenClaims, decode_unverified_for_expiry};
pub use manager::{AccessToken, TokenManager, TokenSettings};
pub use refresh::{
    NoRefresh, OAuthRefreshGrant, RefreshFailure, RefreshStrategy, RefreshedToken,
    VCC_API_KEY_HEADER,
};

use crate::config::ConnectorConfig;
use crate::error::Result;
use std::sync::Arc;

/// Pick the refresh strategy the configuration asks for
pub fn strategy_from_config(config: &ConnectorConfig) -> Result<Arc<dyn RefreshStrategy>> {
    match &config.oauth {
        Some(oauth) => Ok(Arc::new(OAuthRefreshGrant::new(
            oauth.clone(),
            config.request_timeout(),
        )?)),
        None => Ok(Arc::new(NoRefresh)),
    }
}
