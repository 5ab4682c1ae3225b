//! Interface into the host's vehicle data model
//!
//! The connector only produces data; storage belongs to the host. `Garage` is
//! an in-memory reference sink used by the standalone binary and in tests.

use crate::error::{ConnectorError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Typed value of one vehicle attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One attribute write, e.g. `doors/centralLock = LOCKED`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldUpdate {
    pub path: String,
    pub value: FieldValue,
    pub unit: Option<String>,
    /// When the vehicle captured the value, if the API said
    pub measured_at: Option<DateTime<Utc>>,
}

impl FieldUpdate {
    pub fn new(path: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            unit: None,
            measured_at: None,
        }
    }

    pub fn with_unit(mut self, unit: Option<String>) -> Self {
        self.unit = unit;
        self
    }

    pub fn measured(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.measured_at = at;
        self
    }
}

/// Where polled vehicle state goes
pub trait VehicleStateSink: Send + Sync {
    /// Register a vehicle as managed by `connector_id`
    fn add_vehicle(&self, vin: &str, connector_id: &str) -> Result<()>;

    /// Drop `connector_id`'s claim; the vehicle goes once nobody manages it
    fn remove_vehicle(&self, vin: &str, connector_id: &str) -> Result<()>;

    /// Vehicles `connector_id` currently manages
    fn managed_vehicles(&self, connector_id: &str) -> Vec<String>;

    /// Whether fields can be written one at a time
    fn supports_incremental(&self) -> bool {
        true
    }

    fn publish_field(&self, vin: &str, update: FieldUpdate) -> Result<()>;

    /// Apply all updates for a vehicle at once, or none of them
    fn publish_snapshot(&self, vin: &str, updates: Vec<FieldUpdate>) -> Result<()>;

    /// Marks the end of one tick's writes
    fn transaction_end(&self) {}
}

/// A vehicle as the garage stores it
#[derive(Debug, Clone, Default, Serialize)]
pub struct GarageVehicle {
    pub managing_connectors: BTreeSet<String>,
    pub fields: BTreeMap<String, FieldUpdate>,
}

impl GarageVehicle {
    pub fn value(&self, path: &str) -> Option<&FieldValue> {
        self.fields.get(path).map(|f| &f.value)
    }
}

#[derive(Default)]
struct GarageInner {
    vehicles: BTreeMap<String, GarageVehicle>,
    transactions: u64,
}

/// In-memory vehicle registry
pub struct Garage {
    inner: Mutex<GarageInner>,
    incremental: bool,
}

impl Default for Garage {
    fn default() -> Self {
        Self::new()
    }
}

impl Garage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GarageInner::default()),
            incremental: true,
        }
    }

    /// A garage that only accepts whole snapshots
    pub fn snapshot_only() -> Self {
        Self {
            incremental: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, GarageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn vins(&self) -> Vec<String> {
        self.lock().vehicles.keys().cloned().collect()
    }

    pub fn vehicle(&self, vin: &str) -> Option<GarageVehicle> {
        self.lock().vehicles.get(vin).cloned()
    }

    pub fn value(&self, vin: &str, path: &str) -> Option<FieldValue> {
        self.lock()
            .vehicles
            .get(vin)
            .and_then(|v| v.value(path).cloned())
    }

    pub fn transaction_count(&self) -> u64 {
        self.lock().transactions
    }
}

impl VehicleStateSink for Garage {
    fn add_vehicle(&self, vin: &str, connector_id: &str) -> Result<()> {
        self.lock()
            .vehicles
            .entry(vin.to_string())
            .or_default()
            .managing_connectors
            .insert(connector_id.to_string());
        Ok(())
    }

    fn remove_vehicle(&self, vin: &str, connector_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let now_unmanaged = match inner.vehicles.get_mut(vin) {
            Some(vehicle) => {
                vehicle.managing_connectors.remove(connector_id);
                vehicle.managing_connectors.is_empty()
            }
            None => false,
        };
        if now_unmanaged {
            inner.vehicles.remove(vin);
        }
        Ok(())
    }

    fn managed_vehicles(&self, connector_id: &str) -> Vec<String> {
        self.lock()
            .vehicles
            .iter()
            .filter(|(_, v)| v.managing_connectors.contains(connector_id))
            .map(|(vin, _)| vin.clone())
            .collect()
    }

    fn supports_incremental(&self) -> bool {
        self.incremental
    }

    fn publish_field(&self, vin: &str, update: FieldUpdate) -> Result<()> {
        let mut inner = self.lock();
        let vehicle = inner
            .vehicles
            .get_mut(vin)
            .ok_or_else(|| ConnectorError::publish(format!("unknown vehicle {}", vin)))?;
        vehicle.fields.insert(update.path.clone(), update);
        Ok(())
    }

    fn publish_snapshot(&self, vin: &str, updates: Vec<FieldUpdate>) -> Result<()> {
        let mut inner = self.lock();
        let vehicle = inner
            .vehicles
            .get_mut(vin)
            .ok_or_else(|| ConnectorError::publish(format!("unknown vehicle {}", vin)))?;
        for update in updates {
            vehicle.fields.insert(update.path.clone(), update);
        }
        Ok(())
    }

    fn transaction_end(&self) {
        self.lock().transactions += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_vehicle_survives_one_connector_leaving() {
        let garage = Garage::new();
        garage.add_vehicle("VIN1", "a").unwrap();
        garage.add_vehicle("VIN1", "b").unwrap();
        garage.remove_vehicle("VIN1", "a").unwrap();
        assert_eq!(garage.vins(), vec!["VIN1".to_string()]);
        assert!(garage.managed_vehicles("a").is_empty());

        garage.remove_vehicle("VIN1", "b").unwrap();
        assert!(garage.vins().is_empty());
    }

    #[test]
    fn publishing_to_unknown_vehicle_fails() {
        let garage = Garage::new();
        let err = garage
            .publish_field("NOPE", FieldUpdate::new("odometer/odometer", 1i64))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Publish { .. }));
    }
}
