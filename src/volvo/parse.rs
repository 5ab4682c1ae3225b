//! Mapping of Connected Vehicle payloads into field updates

use super::endpoints::StatusEndpoint;
use crate::error::{ConnectorError, Result};
use crate::host::{FieldUpdate, FieldValue};
use crate::logging::StructuredLogger;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteeringPosition {
    Left,
    Right,
    Unknown,
}

impl SteeringPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Drive train derived from the reported fuel type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleKind {
    Electric,
    Combustion,
    Hybrid,
    Unknown,
}

impl VehicleKind {
    pub fn from_fuel_type(fuel_type: &str) -> Self {
        let upper = fuel_type.to_ascii_uppercase();
        let electric = upper.contains("ELECTRIC");
        let combustion = ["PETROL", "DIESEL", "GASOLINE"]
            .iter()
            .any(|f| upper.contains(f));
        match (electric, combustion) {
            (true, true) => Self::Hybrid,
            (true, false) => Self::Electric,
            (false, true) => Self::Combustion,
            (false, false) => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Electric => "electric",
            Self::Combustion => "combustion",
            Self::Hybrid => "hybrid",
            Self::Unknown => "unknown",
        }
    }
}

/// Static description of a vehicle from `/vehicles/{vin}`
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleDetails {
    pub vin: String,
    pub model_year: Option<i64>,
    pub model: Option<String>,
    pub fuel_type: Option<String>,
    pub kind: VehicleKind,
    pub steering: Option<SteeringPosition>,
    pub gearbox: Option<String>,
    pub external_colour: Option<String>,
    pub battery_capacity_kwh: Option<f64>,
    /// Image URLs by id, e.g. `exteriorImageUrl`
    pub images: BTreeMap<String, String>,
}

impl VehicleDetails {
    pub fn to_updates(&self) -> Vec<FieldUpdate> {
        let mut out = vec![
            FieldUpdate::new("manufacturer", "Volvo"),
            FieldUpdate::new("details/kind", self.kind.as_str()),
        ];
        if let Some(year) = self.model_year {
            out.push(FieldUpdate::new("details/modelYear", year));
        }
        if let Some(model) = &self.model {
            out.push(FieldUpdate::new("details/model", model.as_str()));
        }
        if let Some(fuel) = &self.fuel_type {
            out.push(FieldUpdate::new("details/fuelType", fuel.as_str()));
        }
        if let Some(steering) = self.steering {
            out.push(FieldUpdate::new("details/steeringPosition", steering.as_str()));
        }
        if let Some(gearbox) = &self.gearbox {
            out.push(FieldUpdate::new("details/gearbox", gearbox.as_str()));
        }
        if let Some(colour) = &self.external_colour {
            out.push(FieldUpdate::new("details/externalColour", colour.as_str()));
        }
        if let Some(capacity) = self.battery_capacity_kwh {
            out.push(
                FieldUpdate::new("details/batteryCapacity", capacity)
                    .with_unit(Some("kWh".to_string())),
            );
        }
        for (id, url) in &self.images {
            out.push(FieldUpdate::new(format!("details/images/{}", id), url.as_str()));
        }
        out
    }
}

/// Everything one tick fetched for one vehicle
#[derive(Debug, Clone)]
pub struct VehicleSnapshot {
    pub vin: String,
    /// Present on the tick that discovered the vehicle
    pub details: Option<VehicleDetails>,
    pub sections: Vec<(StatusEndpoint, Arc<Value>)>,
}

impl VehicleSnapshot {
    pub fn new(vin: impl Into<String>) -> Self {
        Self {
            vin: vin.into(),
            details: None,
            sections: Vec::new(),
        }
    }
}

fn data_object<'a>(payload: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    payload
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| ConnectorError::publish(format!("{} response has no data object", what)))
}

/// Debug-log keys the mapping does not know about
pub fn log_extra_keys(logger: &StructuredLogger, context: &str, object: &Map<String, Value>, known: &[&str]) {
    let extra: Vec<&str> = object
        .keys()
        .map(String::as_str)
        .filter(|k| !known.contains(k))
        .collect();
    if !extra.is_empty() {
        logger.debug(&format!("Unknown keys in {}: {}", context, extra.join(", ")));
    }
}

fn parse_timestamp(raw: Option<&Value>) -> Option<DateTime<Utc>> {
    raw.and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Scalar JSON into a field value; numeric strings become numbers
pub fn field_value(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Bool(b) => Some(FieldValue::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(FieldValue::Integer)
            .or_else(|| n.as_f64().map(FieldValue::Float)),
        Value::String(s) => {
            if let Ok(i) = s.parse::<i64>() {
                Some(FieldValue::Integer(i))
            } else if let Ok(f) = s.parse::<f64>()
                && f.is_finite()
            {
                Some(FieldValue::Float(f))
            } else {
                Some(FieldValue::Text(s.clone()))
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// VINs from `{"data": [{"vin": ...}, ...]}`; `"data": null` lists nothing
pub fn parse_vehicle_list(payload: &Value) -> Result<Vec<String>> {
    let entries = match payload.get("data") {
        Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        _ => {
            return Err(ConnectorError::publish(
                "vehicle list response has no data array",
            ));
        }
    };
    entries
        .iter()
        .map(|entry| {
            let vin = entry
                .get("vin")
                .and_then(Value::as_str)
                .ok_or_else(|| ConnectorError::publish("Could not fetch vehicle data, VIN missing"))?;
            // VINs end up as URL path segments
            if vin.is_empty() || !vin.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return Err(ConnectorError::publish(format!(
                    "Could not fetch vehicle data, invalid VIN {:?}",
                    vin
                )));
            }
            Ok(vin.to_string())
        })
        .collect()
}

pub fn parse_details(vin: &str, payload: &Value, logger: &StructuredLogger) -> Result<VehicleDetails> {
    let data = data_object(payload, "vehicle details")?;
    let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);

    let descriptions = data.get("descriptions").and_then(Value::as_object);
    let model = descriptions
        .and_then(|d| d.get("model"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let steering = descriptions
        .and_then(|d| d.get("steering"))
        .and_then(Value::as_str)
        .map(|s| match s {
            "LEFT" => SteeringPosition::Left,
            "RIGHT" => SteeringPosition::Right,
            other => {
                logger.warn(&format!("Unknown steering position: {}", other));
                SteeringPosition::Unknown
            }
        });
    if let Some(d) = descriptions {
        log_extra_keys(logger, "descriptions", d, &["model", "steering", "upholstery"]);
    }
    log_extra_keys(
        logger,
        "vehicle details",
        data,
        &[
            "vin",
            "modelYear",
            "descriptions",
            "images",
            "gearbox",
            "fuelType",
            "externalColour",
            "batteryCapacityKWH",
        ],
    );

    let fuel_type = text("fuelType");
    Ok(VehicleDetails {
        vin: vin.to_string(),
        model_year: data.get("modelYear").and_then(Value::as_i64),
        model,
        kind: fuel_type
            .as_deref()
            .map_or(VehicleKind::Unknown, VehicleKind::from_fuel_type),
        fuel_type,
        steering,
        gearbox: text("gearbox"),
        external_colour: text("externalColour"),
        battery_capacity_kwh: data.get("batteryCapacityKWH").and_then(Value::as_f64),
        images: data
            .get("images")
            .and_then(Value::as_object)
            .map(|images| {
                images
                    .iter()
                    .filter_map(|(id, url)| Some((id.clone(), url.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

/// `{"data": {"name": {"value": v, "unit": u, "timestamp": t}}}` into updates
pub fn parse_status_section(
    endpoint: StatusEndpoint,
    payload: &Value,
    logger: &StructuredLogger,
) -> Result<Vec<FieldUpdate>> {
    let data = data_object(payload, endpoint.resource())?;
    let mut out = Vec::with_capacity(data.len());
    for (name, entry) in data {
        let Some(obj) = entry.as_object() else {
            logger.debug(&format!("Skipping non-object {}/{}", endpoint, name));
            continue;
        };
        let Some(value) = obj.get("value").and_then(field_value) else {
            logger.debug(&format!("No usable value in {}/{}", endpoint, name));
            continue;
        };
        log_extra_keys(
            logger,
            &format!("{}/{}", endpoint, name),
            obj,
            &["value", "unit", "timestamp"],
        );
        out.push(
            FieldUpdate::new(format!("{}/{}", endpoint.section(), name), value)
                .with_unit(obj.get("unit").and_then(Value::as_str).map(str::to_string))
                .measured(parse_timestamp(obj.get("timestamp"))),
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::get_api_logger;
    use serde_json::json;

    #[test]
    fn fuel_type_to_kind() {
        assert_eq!(VehicleKind::from_fuel_type("ELECTRIC"), VehicleKind::Electric);
        assert_eq!(VehicleKind::from_fuel_type("DIESEL"), VehicleKind::Combustion);
        assert_eq!(
            VehicleKind::from_fuel_type("PETROL/ELECTRIC"),
            VehicleKind::Hybrid
        );
        assert_eq!(VehicleKind::from_fuel_type("NONE"), VehicleKind::Unknown);
    }

    #[test]
    fn details_mapping() {
        let payload = json!({"data": {
            "vin": "YV4952NA4F120DEMO",
            "modelYear": 2019,
            "gearbox": "AUTOMATIC",
            "fuelType": "DIESEL",
            "externalColour": "SAVILE GREY",
            "descriptions": {"model": "V60 II", "upholstery": "CHARCOAL", "steering": "LEFT"}
        }});
        let details = parse_details("YV4952NA4F120DEMO", &payload, &get_api_logger("test")).unwrap();
        assert_eq!(details.model.as_deref(), Some("V60 II"));
        assert_eq!(details.steering, Some(SteeringPosition::Left));
        assert_eq!(details.kind, VehicleKind::Combustion);
        let updates = details.to_updates();
        assert!(updates.iter().any(|u| u.path == "details/modelYear"
            && u.value == FieldValue::Integer(2019)));
    }

    #[test]
    fn status_section_mapping() {
        let payload = json!({"data": {
            "fuelAmount": {"value": "47.3", "unit": "l", "timestamp": "2024-03-01T10:00:00Z"},
            "centralLock": {"value": "LOCKED"},
            "broken": "not-an-object",
            "empty": {"value": null}
        }});
        let updates =
            parse_status_section(StatusEndpoint::Fuel, &payload, &get_api_logger("test")).unwrap();
        assert_eq!(updates.len(), 2);
        let fuel = updates.iter().find(|u| u.path == "fuel/fuelAmount").unwrap();
        assert_eq!(fuel.value, FieldValue::Float(47.3));
        assert_eq!(fuel.unit.as_deref(), Some("l"));
        assert!(fuel.measured_at.is_some());
    }

    #[test]
    fn missing_data_is_publish_error() {
        let err = parse_status_section(StatusEndpoint::Doors, &json!({"error": 1}), &get_api_logger("test"))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Publish { .. }));

        let err = parse_vehicle_list(&json!({"data": [{"vin": "A"}, {"model": "x"}]})).unwrap_err();
        assert!(err.to_string().contains("VIN missing"));
        assert!(parse_vehicle_list(&json!({"vehicles": []})).is_err());
    }

    #[test]
    fn null_vehicle_list_is_empty() {
        assert!(parse_vehicle_list(&json!({"data": null})).unwrap().is_empty());
        assert_eq!(
            parse_vehicle_list(&json!({"data": [{"vin": "YV1XZK7V0N2000001"}]})).unwrap(),
            vec!["YV1XZK7V0N2000001".to_string()]
        );
    }

    #[test]
    fn vins_that_would_alter_the_path_are_rejected() {
        for vin in ["../accounts", "YV1?x=1", "YV1#frag", "YV1 2", ""] {
            let err = parse_vehicle_list(&json!({"data": [{"vin": vin}]})).unwrap_err();
            assert!(err.to_string().contains("invalid VIN"), "{}", vin);
        }
    }

    #[test]
    fn detail_images_are_published_as_urls() {
        let payload = json!({"data": {
            "vin": "YV4952NA4F120DEMO",
            "images": {
                "exteriorImageUrl": "https://cas.volvocars.com/image/exterior/default.png",
                "internalImageUrl": "https://cas.volvocars.com/image/interior/default.png",
                "broken": 42
            }
        }});
        let details = parse_details("YV4952NA4F120DEMO", &payload, &get_api_logger("test")).unwrap();
        assert_eq!(details.images.len(), 2);

        let updates = details.to_updates();
        let exterior = updates
            .iter()
            .find(|u| u.path == "details/images/exteriorImageUrl")
            .unwrap();
        assert_eq!(
            exterior.value,
            FieldValue::Text("https://cas.volvocars.com/image/exterior/default.png".to_string())
        );
    }
}
