//! Credential store for one Volvo account
//!
//! Holds the VCC API key pair and the token material, and persists refreshed
//! tokens so a restart can continue the session. Persisted state is keyed by a
//! session identifier derived from the configured keys and initial token, so
//! configuring a new token never resurrects stale state.

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};
use crate::logging::get_logger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Service name mixed into the session identifier
pub const SERVICE_CONNECTED_VEHICLE: &str = "VolvoConnectedVehicleAPI";

/// Token material and API keys for one account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key_primary: String,
    pub api_key_secondary: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// `exp` of the last successfully decoded access token
    pub expiry: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Whether the access token may still be sent at `now`
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|exp| now < exp)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key_primary", &"***")
            .field("api_key_secondary", &"***")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Credential values as configured, before validation
#[derive(Clone, Default)]
pub struct CredentialSeed {
    pub api_key_primary: Option<String>,
    pub api_key_secondary: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl CredentialSeed {
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            api_key_primary: config.vcc_api_key_primary.clone(),
            api_key_secondary: config.vcc_api_key_secondary.clone(),
            access_token: config.connected_vehicle_token.clone(),
            refresh_token: config.refresh_token.clone(),
        }
    }

    fn required(value: &Option<String>, key: &str) -> Result<String> {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => Err(ConnectorError::config(format!(
                "{} was not found in config",
                key
            ))),
        }
    }

    /// Validate and convert into credentials
    pub fn resolve(&self) -> Result<Credentials> {
        Ok(Credentials {
            api_key_primary: Self::required(&self.api_key_primary, "vcc_api_key_primary")?,
            api_key_secondary: Self::required(&self.api_key_secondary, "vcc_api_key_secondary")?,
            access_token: Self::required(&self.access_token, "connected_vehicle_token")?,
            refresh_token: self
                .refresh_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            expiry: None,
        })
    }

    /// Identifier under which this account's tokens are persisted
    pub fn identifier(&self) -> Result<String> {
        let creds = self.resolve()?;
        Ok(session_identifier(
            SERVICE_CONNECTED_VEHICLE,
            &creds.api_key_primary,
            &creds.api_key_secondary,
            &creds.access_token,
        ))
    }
}

impl std::fmt::Debug for CredentialSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("CredentialSeed")
            .field("api_key_primary", &mask(&self.api_key_primary))
            .field("api_key_secondary", &mask(&self.api_key_secondary))
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &mask(&self.refresh_token))
            .finish()
    }
}

/// SHA-512 based identifier for a service and key/token triple
pub fn session_identifier(
    service: &str,
    api_key_primary: &str,
    api_key_secondary: &str,
    access_token: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(service.as_bytes());
    hasher.update(format!("{}:{}:{}", api_key_primary, api_key_secondary, access_token).as_bytes());
    format!("volvo-connector:{}", hex::encode(hasher.finalize()))
}

/// Load/save/clear access to an account's credentials
pub trait CredentialStore: Send + Sync {
    /// Current credentials; `Config` error when required keys are missing
    fn load(&self) -> Result<Credentials>;
    /// Persist refreshed token material
    fn save(&self, credentials: &Credentials) -> Result<()>;
    /// Forget persisted token material
    fn clear(&self) -> Result<()>;
}

/// Keeps saved credentials in memory only
pub struct MemoryCredentialStore {
    seed: CredentialSeed,
    saved: Mutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new(seed: CredentialSeed) -> Self {
        Self {
            seed,
            saved: Mutex::new(None),
        }
    }

    /// Last saved credentials, if any
    pub fn saved(&self) -> Option<Credentials> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Credentials> {
        let base = self.seed.resolve()?;
        Ok(self.saved().map_or(base, |saved| Credentials {
            api_key_primary: saved.api_key_primary,
            api_key_secondary: saved.api_key_secondary,
            ..saved
        }))
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// One persisted session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    pub saved_at: DateTime<Utc>,
}

/// Token store file: session identifier -> tokens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenStoreFile {
    #[serde(default)]
    pub sessions: BTreeMap<String, PersistedTokens>,
}

/// Persists token material to a JSON file shared by connector instances
pub struct FileCredentialStore {
    path: PathBuf,
    seed: CredentialSeed,
    logger: crate::logging::StructuredLogger,
}

impl FileCredentialStore {
    pub fn new<P: AsRef<Path>>(path: P, seed: CredentialSeed) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            seed,
            logger: get_logger("credentials"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<TokenStoreFile> {
        if !self.path.exists() {
            return Ok(TokenStoreFile::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(TokenStoreFile::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_file(&self, file: &TokenStoreFile) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Credentials> {
        let mut creds = self.seed.resolve()?;
        let identifier = self.seed.identifier()?;

        let file = match self.read_file() {
            Ok(file) => file,
            Err(e) => {
                self.logger.warn(&format!(
                    "Ignoring unreadable token store {}: {}",
                    self.path.display(),
                    e
                ));
                return Ok(creds);
            }
        };

        if let Some(persisted) = file.sessions.get(&identifier) {
            self.logger.info("Reusing tokens from previous session");
            creds.access_token = persisted.access_token.clone();
            if persisted.refresh_token.is_some() {
                creds.refresh_token = persisted.refresh_token.clone();
            }
            creds.expiry = persisted.expiry;
        }
        Ok(creds)
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        let identifier = self.seed.identifier()?;
        let mut file = self.read_file().unwrap_or_default();
        file.sessions.insert(
            identifier,
            PersistedTokens {
                access_token: credentials.access_token.clone(),
                refresh_token: credentials.refresh_token.clone(),
                expiry: credentials.expiry,
                saved_at: Utc::now(),
            },
        );
        self.write_file(&file)?;
        self.logger.debug("Saved token state to disk");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let identifier = self.seed.identifier()?;
        let mut file = self.read_file().unwrap_or_default();
        if file.sessions.remove(&identifier).is_some() {
            self.write_file(&file)?;
            self.logger.info("Cleared persisted token state");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> CredentialSeed {
        CredentialSeed {
            api_key_primary: Some("primary".into()),
            api_key_secondary: Some("secondary".into()),
            access_token: Some("token".into()),
            refresh_token: None,
        }
    }

    #[test]
    fn missing_primary_key_is_config_error() {
        let mut s = seed();
        s.api_key_primary = None;
        let err = s.resolve().unwrap_err();
        assert!(matches!(err, ConnectorError::Config { .. }));
        assert!(err.to_string().contains("vcc_api_key_primary"));

        s = seed();
        s.access_token = Some("   ".into());
        assert!(matches!(
            s.resolve().unwrap_err(),
            ConnectorError::Config { .. }
        ));
    }

    #[test]
    fn identifier_depends_on_token() {
        let a = seed().identifier().unwrap();
        let mut other = seed();
        other.access_token = Some("token2".into());
        let b = other.identifier().unwrap();
        assert!(a.starts_with("volvo-connector:"));
        assert_ne!(a, b);
        assert_eq!(a, seed().identifier().unwrap());
    }

    #[test]
    fn debug_output_is_redacted() {
        let seed = CredentialSeed {
            api_key_primary: Some("primary-secret".into()),
            api_key_secondary: Some("secondary-secret".into()),
            access_token: Some("access-secret".into()),
            refresh_token: Some("refresh-secret".into()),
        };
        let creds = seed.resolve().unwrap();

        assert!(!format!("{:?}", seed).contains("-secret"));
        let text = format!("{:?}", creds);
        assert!(!text.contains("-secret"));
        assert!(text.contains("api_key_primary"));
        assert!(text.contains("***"));
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryCredentialStore::new(seed());
        let mut creds = store.load().unwrap();
        assert_eq!(creds.access_token, "token");
        creds.access_token = "refreshed".into();
        store.save(&creds).unwrap();
        assert_eq!(store.load().unwrap().access_token, "refreshed");
        store.clear().unwrap();
        assert_eq!(store.load().unwrap().access_token, "token");
    }
}
