//! Poll loop: authorize, fetch, publish, sleep
//!
//! One tick runs at a time. The interval is measured from the end of a tick,
//! and shutdown is only observed between states so an in-flight request is
//! never abandoned halfway.

mod escalation;
mod types;

pub use escalation::{ESCALATE_AFTER, Escalation};
pub use types::{ConnectionState, PollState, TickOutcome, TickReport};

use crate::clock::Clock;
use crate::config::ConnectorConfig;
use crate::error::{ErrorClass, Result};
use crate::host::{FieldUpdate, VehicleStateSink};
use crate::http::RequestOptions;
use crate::logging::{StructuredLogger, get_logger};
use crate::volvo::{
    SCOPE_VEHICLE_RELATION, VehicleSnapshot, VolvoClient, endpoints_for, parse_status_section,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub rate_limit_backoff: Duration,
}

impl PollSettings {
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            interval: config.interval_duration(),
            rate_limit_backoff: Duration::from_secs(config.rate_limit_backoff_secs),
        }
    }

    /// Wait before the next tick after a failure of `class`
    pub fn wait_after(&self, class: Option<ErrorClass>) -> Duration {
        match class {
            Some(ErrorClass::RateLimited) => self.interval.max(self.rate_limit_backoff),
            _ => self.interval,
        }
    }
}

/// VINs this connector has registered with the sink
#[derive(Default)]
struct TickMemory {
    known: BTreeSet<String>,
}

pub struct PollLoop {
    api: VolvoClient,
    sink: Arc<dyn VehicleStateSink>,
    clock: Arc<dyn Clock>,
    connector_id: String,
    settings: PollSettings,
    state: watch::Sender<PollState>,
    connection: watch::Sender<ConnectionState>,
    stop: watch::Sender<bool>,
    memory: tokio::sync::Mutex<TickMemory>,
    escalation: Mutex<Escalation>,
    last_update: Mutex<Option<DateTime<Utc>>>,
    logger: StructuredLogger,
}

impl PollLoop {
    pub fn new(
        api: VolvoClient,
        sink: Arc<dyn VehicleStateSink>,
        clock: Arc<dyn Clock>,
        connector_id: &str,
        settings: PollSettings,
    ) -> Self {
        Self {
            api,
            sink,
            clock,
            connector_id: connector_id.to_string(),
            settings,
            state: watch::Sender::new(PollState::Idle),
            connection: watch::Sender::new(ConnectionState::Disconnected),
            stop: watch::Sender::new(false),
            memory: tokio::sync::Mutex::new(TickMemory::default()),
            escalation: Mutex::new(Escalation::default()),
            last_update: Mutex::new(None),
            logger: get_logger("poller"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Time of the last successful tick
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Ask the loop to stop at its next safe point
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    fn set_state(&self, state: PollState) {
        if self.state.send_replace(state) != state {
            self.logger.trace(&format!("Poll state -> {:?}", state));
        }
    }

    /// Mark the loop as terminated
    pub fn finish(&self) {
        self.set_state(PollState::Stopped);
        self.connection.send_replace(ConnectionState::Disconnected);
    }

    /// Scheduled loop; returns once `stop()` was observed
    pub async fn run(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        self.connection.send_replace(ConnectionState::Connecting);
        self.logger.info(&format!(
            "Starting poll loop with interval {}s",
            self.settings.interval.as_secs()
        ));

        loop {
            if *stop.borrow_and_update() {
                break;
            }
            let wait = match self.tick_now().await {
                Ok(TickOutcome::Stopped) => break,
                Ok(TickOutcome::Completed(_)) => self.settings.wait_after(None),
                Err(e) => self.settings.wait_after(Some(e.classify())),
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop.changed() => {}
            }
        }

        self.finish();
        self.logger.info("Poll loop stopped");
    }

    /// Run one tick now and account for its outcome like a scheduled one
    pub async fn tick_now(&self) -> Result<TickOutcome> {
        let result = self.tick(RequestOptions::default()).await;
        match &result {
            Ok(TickOutcome::Completed(report)) => {
                self.escalation
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .reset();
                *self.last_update.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(self.clock.now());
                self.connection.send_replace(ConnectionState::Connected);
                self.logger.debug(&format!(
                    "Tick completed: {} vehicle(s), {} field(s) published, {} failure(s)",
                    report.vehicles, report.fields_published, report.publish_failures
                ));
            }
            Ok(TickOutcome::Stopped) => {}
            Err(e) => {
                self.connection.send_replace(ConnectionState::Error);
                let class = e.classify();
                let level = self
                    .escalation
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(class);
                let wait = self.settings.wait_after(Some(class)).as_secs();
                let message = match class {
                    ErrorClass::RateLimited => format!(
                        "Too many requests from your account ({}). Will try again after {}s",
                        e, wait
                    ),
                    ErrorClass::Auth => format!(
                        "Authentication error during update ({}). Will try again after {}s",
                        e, wait
                    ),
                    _ => format!(
                        "Retrieval error during update ({}). Will try again after {}s",
                        e, wait
                    ),
                };
                self.logger.log(level, &message);
            }
        }
        result
    }

    /// One pass through the state machine without bookkeeping
    pub async fn tick(&self, options: RequestOptions) -> Result<TickOutcome> {
        let mut memory = self.memory.lock().await;
        if self.stop_requested() {
            self.set_state(PollState::Stopped);
            return Ok(TickOutcome::Stopped);
        }

        let result = self.run_tick(&mut memory, options).await;
        match &result {
            Ok(TickOutcome::Stopped) => self.set_state(PollState::Stopped),
            _ => self.set_state(PollState::Idle),
        }
        result
    }

    async fn run_tick(&self, memory: &mut TickMemory, options: RequestOptions) -> Result<TickOutcome> {
        self.set_state(PollState::Authorizing);
        let tokens = self.api.http().tokens();
        tokens.ensure_valid_token().await?;
        let scopes = tokens.granted_scopes().await;
        if let Some(granted) = &scopes
            && !granted.iter().any(|s| s == SCOPE_VEHICLE_RELATION)
        {
            self.logger.debug(&format!(
                "Token does not list {}; vehicle listing may be refused",
                SCOPE_VEHICLE_RELATION
            ));
        }
        let endpoints = endpoints_for(scopes.as_deref());

        if self.stop_requested() {
            return Ok(TickOutcome::Stopped);
        }
        self.set_state(PollState::Fetching);

        let vins = self.api.list_vehicles(options).await?;
        let mut snapshots = Vec::with_capacity(vins.len());
        let mut skipped = 0;
        for vin in &vins {
            if self.stop_requested() {
                return Ok(TickOutcome::Stopped);
            }
            let vlog = self.logger.for_vin(vin);
            let mut snapshot = VehicleSnapshot::new(vin.as_str());

            if !memory.known.contains(vin) {
                match self.api.vehicle_details(vin, options).await {
                    Ok(details) => snapshot.details = Some(details),
                    Err(e) if e.classify() == ErrorClass::Permanent => {
                        vlog.warn(&format!("Vehicle details unavailable: {}", e));
                        skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            for endpoint in &endpoints {
                match self.api.status(vin, *endpoint, options).await {
                    Ok(payload) => snapshot.sections.push((*endpoint, payload)),
                    Err(e) if e.classify() == ErrorClass::Permanent => {
                        vlog.warn(&format!("Skipping {} this tick: {}", endpoint, e));
                        skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            snapshots.push(snapshot);
        }

        if self.stop_requested() {
            return Ok(TickOutcome::Stopped);
        }
        self.set_state(PollState::Publishing);
        let mut report = self.publish(memory, &vins, snapshots);
        report.skipped_sections = skipped;
        Ok(TickOutcome::Completed(report))
    }

    fn publish(&self, memory: &mut TickMemory, vins: &[String], snapshots: Vec<VehicleSnapshot>) -> TickReport {
        let mut report = TickReport {
            vehicles: vins.len(),
            ..TickReport::default()
        };

        let seen: BTreeSet<&String> = vins.iter().collect();
        let vanished: Vec<String> = memory
            .known
            .iter()
            .filter(|vin| !seen.contains(vin))
            .cloned()
            .collect();
        for vin in vanished {
            match self.sink.remove_vehicle(&vin, &self.connector_id) {
                Ok(()) => {
                    self.logger
                        .for_vin(&vin)
                        .info("Vehicle no longer listed by the account, removed");
                    memory.known.remove(&vin);
                    report.removed += 1;
                }
                Err(e) => {
                    self.logger
                        .for_vin(&vin)
                        .warn(&format!("Could not remove vehicle: {}", e));
                    report.publish_failures += 1;
                }
            }
        }

        for snapshot in snapshots {
            let vlog = self.logger.for_vin(&snapshot.vin);
            if !memory.known.contains(&snapshot.vin) {
                if let Err(e) = self.sink.add_vehicle(&snapshot.vin, &self.connector_id) {
                    vlog.warn(&format!("Could not add vehicle: {}", e));
                    report.publish_failures += 1;
                    continue;
                }
                vlog.info("Discovered vehicle");
                memory.known.insert(snapshot.vin.clone());
                report.added += 1;
            }

            let (updates, mapping_failures) = self.map_snapshot(&snapshot, &vlog);
            report.publish_failures += mapping_failures;

            if self.sink.supports_incremental() {
                for update in updates {
                    let path = update.path.clone();
                    match self.sink.publish_field(&snapshot.vin, update) {
                        Ok(()) => report.fields_published += 1,
                        Err(e) => {
                            vlog.warn(&format!("Host rejected {}: {}", path, e));
                            report.publish_failures += 1;
                        }
                    }
                }
            } else if mapping_failures > 0 {
                vlog.warn("Discarding this tick's snapshot, not every section could be mapped");
            } else {
                let count = updates.len();
                match self.sink.publish_snapshot(&snapshot.vin, updates) {
                    Ok(()) => report.fields_published += count,
                    Err(e) => {
                        vlog.warn(&format!("Host rejected snapshot: {}", e));
                        report.publish_failures += 1;
                    }
                }
            }
        }

        self.sink.transaction_end();
        report
    }

    fn map_snapshot(&self, snapshot: &VehicleSnapshot, vlog: &StructuredLogger) -> (Vec<FieldUpdate>, usize) {
        let api_log = vlog.api();
        let mut updates = snapshot
            .details
            .as_ref()
            .map(|d| d.to_updates())
            .unwrap_or_default();
        let mut failures = 0;
        for (endpoint, payload) in &snapshot.sections {
            match parse_status_section(*endpoint, payload, &api_log) {
                Ok(mut section) => updates.append(&mut section),
                Err(e) => {
                    vlog.warn(&format!("Could not map {}: {}", endpoint, e));
                    failures += 1;
                }
            }
        }
        (updates, failures)
    }
}
