//! # Volvo Connector - Connected Vehicle API bridge
//!
//! Polls the Volvo Connected Vehicle API on a fixed interval and publishes
//! each vehicle's state into a host-provided vehicle garage.
//!
//! ## Features
//!
//! - **Token lifecycle**: Expiry read from the JWT, refreshed ahead of time
//!   and exactly once under concurrent demand
//! - **Credential persistence**: Tokens survive restarts in a JSON token store
//! - **Response cache**: Per-endpoint cache bounded by `max_age`, with
//!   coalescing of identical in-flight requests
//! - **Scope gating**: Only endpoints the token grants are queried
//! - **Failure handling**: Retries with backoff for transient faults, a
//!   longer pause after rate limiting, and escalating log severity
//! - **Configuration**: YAML or JSON configuration with validation
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `logging`: Structured logging and tracing
//! - `credentials`: Credential store and session identifiers
//! - `auth`: JWT decoding, refresh strategies and the token manager
//! - `http`: Transport seam and the cached, token-aware client
//! - `volvo`: Endpoint catalogue and payload mapping
//! - `poller`: Background poll loop state machine
//! - `host`: Vehicle state sink contract and an in-memory garage
//! - `connector`: Facade the host instantiates

pub mod auth;
pub mod clock;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod error;
pub mod flight;
pub mod host;
pub mod http;
pub mod logging;
pub mod poller;
pub mod retry;
pub mod testing;
pub mod volvo;

// Re-export commonly used types
pub use config::ConnectorConfig;
pub use connector::{Connector, ConnectorBuilder};
pub use error::{ConnectorError, ErrorClass, Result};
pub use host::{FieldUpdate, FieldValue, Garage, VehicleStateSink};
pub use poller::{ConnectionState, PollState, TickOutcome, TickReport};
