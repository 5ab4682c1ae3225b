//! Connector facade the host instantiates
//!
//! Wires configuration into the credential store, token manager, cached
//! client and poll loop, and exposes the `start` / `shutdown` lifecycle.

use crate::auth::{RefreshStrategy, TokenManager, TokenSettings, strategy_from_config};
use crate::clock::{Clock, SystemClock};
use crate::config::ConnectorConfig;
use crate::credentials::{CredentialSeed, CredentialStore, FileCredentialStore, MemoryCredentialStore};
use crate::error::{ConnectorError, Result};
use crate::host::VehicleStateSink;
use crate::http::{CachedClient, ClientSettings, ClientStats, ReqwestTransport, Transport};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::poller::{ConnectionState, PollLoop, PollSettings, PollState, TickOutcome};
use crate::volvo::VolvoClient;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Type string the host registers this connector under
pub const CONNECTOR_TYPE: &str = "volvo-connector";

/// Human readable connector name
pub const CONNECTOR_NAME: &str = "Volvo Connector";

/// Crate version, with nightly suffix when built as such
pub fn version() -> &'static str {
    env!("APP_VERSION")
}

/// Optional overrides for the pieces `Connector::new` would build itself
pub struct ConnectorBuilder {
    config: ConnectorConfig,
    sink: Option<Arc<dyn VehicleStateSink>>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    strategy: Option<Arc<dyn RefreshStrategy>>,
    store: Option<Arc<dyn CredentialStore>>,
}

impl ConnectorBuilder {
    pub fn sink(mut self, sink: Arc<dyn VehicleStateSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn refresh_strategy(mut self, strategy: Arc<dyn RefreshStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate configuration and assemble the connector; nothing runs yet
    pub fn build(self) -> Result<Connector> {
        let config = self.config;
        config.validate()?;

        let id = config
            .connector_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let logger = |component: &str| {
            get_logger_with_context(LogContext::new(component).with_connector_id(&id))
        };
        let log = logger("connector");

        log.info(&format!(
            "Loading volvo connector with config {}",
            config.redacted()
        ));
        for warning in config.warnings() {
            log.warn(&warning);
        }

        let sink = self
            .sink
            .ok_or_else(|| ConnectorError::config("no vehicle state sink was provided"))?;

        let seed = CredentialSeed::from_config(&config);
        let store: Arc<dyn CredentialStore> = match (self.store, &config.token_store) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileCredentialStore::new(path, seed)),
            (None, None) => Arc::new(MemoryCredentialStore::new(seed)),
        };
        // Fails with a config error when keys or token are missing
        let credentials = store.load()?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None => strategy_from_config(&config)?,
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(
                &config.api_base_url,
                &credentials.api_key_primary,
                config.request_timeout(),
            )?),
        };

        let tokens = Arc::new(
            TokenManager::new(
                store,
                strategy,
                clock.clone(),
                TokenSettings::from_config(&config),
            )?
            .with_logger(logger("auth")),
        );
        let http = Arc::new(
            CachedClient::new(
                transport,
                tokens.clone(),
                clock.clone(),
                ClientSettings::from_config(&config),
            )
            .with_logger(logger("http")),
        );
        let api = VolvoClient::new(http.clone()).with_logger(&logger("volvo"));
        let poll = Arc::new(
            PollLoop::new(
                api,
                sink.clone(),
                clock,
                &id,
                PollSettings::from_config(&config),
            )
            .with_logger(logger("poller")),
        );

        Ok(Connector {
            id,
            config,
            sink,
            tokens,
            http,
            poll,
            handle: Mutex::new(None),
            logger: log,
        })
    }
}

pub struct Connector {
    id: String,
    config: ConnectorConfig,
    sink: Arc<dyn VehicleStateSink>,
    tokens: Arc<TokenManager>,
    http: Arc<CachedClient>,
    poll: Arc<PollLoop>,
    handle: Mutex<Option<JoinHandle<()>>>,
    logger: StructuredLogger,
}

impl Connector {
    pub fn builder(config: ConnectorConfig) -> ConnectorBuilder {
        ConnectorBuilder {
            config,
            sink: None,
            transport: None,
            clock: None,
            strategy: None,
            store: None,
        }
    }

    /// Connector with the default transport, clock, store and refresh strategy
    pub fn new(config: ConnectorConfig, sink: Arc<dyn VehicleStateSink>) -> Result<Self> {
        Self::builder(config).sink(sink).build()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connector_type(&self) -> &'static str {
        CONNECTOR_TYPE
    }

    pub fn name(&self) -> &'static str {
        CONNECTOR_NAME
    }

    pub fn version(&self) -> &'static str {
        version()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn stats(&self) -> ClientStats {
        self.http.stats()
    }

    pub fn state(&self) -> PollState {
        self.poll.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PollState> {
        self.poll.subscribe_state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.poll.connection_state()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.poll.subscribe_connection()
    }

    pub fn last_update(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.poll.last_update()
    }

    /// Spawn the background poll loop
    pub async fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(ConnectorError::generic("connector is already started"));
        }
        if self.poll.stop_requested() {
            return Err(ConnectorError::generic("connector was shut down"));
        }
        self.logger.info(&format!("Starting {} {}", CONNECTOR_NAME, version()));
        *handle = Some(tokio::spawn(self.poll.clone().run()));
        Ok(())
    }

    /// On-demand refresh alongside the scheduled loop
    pub async fn tick_now(&self) -> Result<TickOutcome> {
        self.poll.tick_now().await
    }

    /// Stop polling, release vehicles, persist and discard credentials
    pub async fn shutdown(&self) -> Result<()> {
        self.logger.info("Shutting down");
        self.poll.stop();
        if let Some(handle) = self.handle.lock().await.take()
            && let Err(e) = handle.await
        {
            self.logger.error(&format!("Poll loop task failed: {}", e));
        }
        self.poll.finish();

        // Vehicles other connectors also manage stay in the garage
        for vin in self.sink.managed_vehicles(&self.id) {
            if let Err(e) = self.sink.remove_vehicle(&vin, &self.id) {
                self.logger
                    .for_vin(&vin)
                    .warn(&format!("Could not release vehicle: {}", e));
            }
        }

        let persisted = self.tokens.close().await;
        let stats = self.http.stats();
        self.logger.info(&format!(
            "Shutdown complete ({} network call(s), {} cache hit(s), {}ms remote time)",
            stats.network_calls,
            stats.cache_hits,
            stats.remote_elapsed.as_millis()
        ));
        persisted
    }
}
