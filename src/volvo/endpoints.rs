//! Connected Vehicle API v2 endpoint catalogue

use std::fmt;

/// Base path of the Connected Vehicle API
pub const CONNECTED_VEHICLE_BASE: &str = "/connected-vehicle/v2/vehicles";

/// Scope required to list vehicles and read their details
pub const SCOPE_VEHICLE_RELATION: &str = "conve:vehicle_relation";

/// Per-vehicle status resources polled every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusEndpoint {
    Doors,
    Windows,
    Tyres,
    EngineStatus,
    Odometer,
    Warnings,
    Fuel,
    Statistics,
}

impl StatusEndpoint {
    pub const ALL: [Self; 8] = [
        Self::Doors,
        Self::Windows,
        Self::Tyres,
        Self::EngineStatus,
        Self::Odometer,
        Self::Warnings,
        Self::Fuel,
        Self::Statistics,
    ];

    /// Path segment after `/vehicles/{vin}/`
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Doors => "doors",
            Self::Windows => "windows",
            Self::Tyres => "tyres",
            Self::EngineStatus => "engine-status",
            Self::Odometer => "odometer",
            Self::Warnings => "warnings",
            Self::Fuel => "fuel",
            Self::Statistics => "statistics",
        }
    }

    /// Prefix for field paths published from this resource
    pub fn section(&self) -> &'static str {
        match self {
            Self::EngineStatus => "engine",
            other => other.resource(),
        }
    }

    pub fn required_scope(&self) -> &'static str {
        match self {
            Self::Doors => "conve:lock_status",
            Self::Windows => "conve:windows_status",
            Self::Tyres => "conve:tyre_status",
            Self::EngineStatus => "conve:engine_status",
            Self::Odometer => "conve:odometer_status",
            Self::Warnings => "conve:warnings",
            Self::Fuel => "conve:fuel_status",
            Self::Statistics => "conve:trip_statistics",
        }
    }

    pub fn path(&self, vin: &str) -> String {
        format!("{}/{}/{}", CONNECTED_VEHICLE_BASE, vin, self.resource())
    }
}

impl fmt::Display for StatusEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource())
    }
}

pub fn vehicles_path() -> String {
    CONNECTED_VEHICLE_BASE.to_string()
}

pub fn details_path(vin: &str) -> String {
    format!("{}/{}", CONNECTED_VEHICLE_BASE, vin)
}

/// Status endpoints the token may read; all of them when it lists no scopes
pub fn endpoints_for(scopes: Option<&[String]>) -> Vec<StatusEndpoint> {
    match scopes {
        None => StatusEndpoint::ALL.to_vec(),
        Some(granted) => StatusEndpoint::ALL
            .into_iter()
            .filter(|ep| granted.iter().any(|s| s == ep.required_scope()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths() {
        assert_eq!(vehicles_path(), "/connected-vehicle/v2/vehicles");
        assert_eq!(
            StatusEndpoint::EngineStatus.path("YV1"),
            "/connected-vehicle/v2/vehicles/YV1/engine-status"
        );
        assert_eq!(StatusEndpoint::EngineStatus.section(), "engine");
    }

    #[test]
    fn scope_gating() {
        assert_eq!(endpoints_for(None).len(), StatusEndpoint::ALL.len());
        let granted = vec![
            "openid".to_string(),
            "conve:odometer_status".to_string(),
            "conve:lock_status".to_string(),
        ];
        assert_eq!(
            endpoints_for(Some(&granted)),
            vec![StatusEndpoint::Doors, StatusEndpoint::Odometer]
        );
        assert!(endpoints_for(Some(&[])).is_empty());
    }
}
