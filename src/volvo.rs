//! Volvo Connected Vehicle API v2: endpoints, scopes and payload mapping

pub mod client;
pub mod endpoints;
pub mod parse;

pub use client::VolvoClient;
pub use endpoints::{SCOPE_VEHICLE_RELATION, StatusEndpoint, endpoints_for};
pub use parse::{
    SteeringPosition, VehicleDetails, VehicleKind, VehicleSnapshot, parse_status_section,
};
