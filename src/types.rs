use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one remote data point. Stable for the lifetime of a
/// session, not guaranteed stable across vendor firmware versions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParameterId(pub u32);

impl From<u32> for ParameterId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of one remote parameter. Superseded wholesale on each
/// fetch, never field-merged: a partial vendor response is
/// indistinguishable from a full one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    #[serde(rename = "parameterId")]
    pub id: ParameterId,
    pub title: String,
    #[serde(default)]
    pub designation: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub display_value: String,
    /// Value in display scale.
    #[serde(default)]
    pub value: Option<f64>,
    /// Value in the vendor's native integer scale.
    #[serde(default)]
    pub raw_value: Option<i64>,
}

/// One alarm/notice raised by the remote system. Compared by value,
/// not position: the vendor API does not guarantee stable ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "notificationId")]
    pub id: i64,
    #[serde(default)]
    pub severity: i32,
    pub header: String,
    #[serde(default)]
    pub description: String,
}

/// One entry of the status/icon list. The embedded parameter
/// snapshots are what amortize request volume per poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusIcon {
    pub title: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

/// Metadata for one remote installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub system_id: u32,
    pub name: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub software_version: Option<String>,
    #[serde(default)]
    pub connection_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemUnit {
    #[serde(rename = "systemUnitId")]
    pub unit_id: u32,
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub software_version: Option<String>,
}

/// Service-info category: a named group of parameters for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(rename = "categoryId")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

/// External thermostat reading published to the smart-home endpoint.
/// Temperatures are sent in the vendor's x10 integer scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thermostat {
    pub external_id: u32,
    pub name: String,
    pub actual_temp: Option<i32>,
    pub target_temp: Option<i32>,
    pub valve_position: Option<u8>,
    pub climate_systems: Vec<u32>,
}

impl Thermostat {
    /// Convert a display-scale temperature to the x10 wire scale.
    pub fn scaled(value: Option<f64>) -> Option<i32> {
        value.map(|v| (v * 10.0).round() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameter_parses_vendor_shape() {
        let data = json!({
            "parameterId": 40004,
            "title": "outdoor temp.",
            "designation": "BT1",
            "unit": "°C",
            "displayValue": "2.5°C",
            "value": 2.5,
            "rawValue": 25
        });
        let parameter: Parameter = serde_json::from_value(data).unwrap();
        assert_eq!(parameter.id, ParameterId(40004));
        assert_eq!(parameter.designation, "BT1");
        assert_eq!(parameter.value, Some(2.5));
        assert_eq!(parameter.raw_value, Some(25));
    }

    #[test]
    fn parameter_tolerates_missing_values() {
        let data = json!({
            "parameterId": 43420,
            "title": "compressor starts",
        });
        let parameter: Parameter = serde_json::from_value(data).unwrap();
        assert_eq!(parameter.value, None);
        assert_eq!(parameter.raw_value, None);
        assert!(parameter.unit.is_empty());
    }

    #[test]
    fn notifications_compare_by_value() {
        let a = Notification {
            id: 1,
            severity: 2,
            header: "Sensor fault".into(),
            description: "BT6 out of range".into(),
        };
        let b = a.clone();
        assert_eq!(a, b);
        let c = Notification { id: 2, ..a.clone() };
        assert_ne!(a, c);
    }

    #[test]
    fn thermostat_temperature_scaling() {
        assert_eq!(Thermostat::scaled(Some(21.34)), Some(213));
        assert_eq!(Thermostat::scaled(Some(-0.06)), Some(-1));
        assert_eq!(Thermostat::scaled(None), None);
    }
}
