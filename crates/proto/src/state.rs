//! Device-state reports and the latest-value extraction utility.
//!
//! A bulk state report (`evt.pd7.response`) carries one entry per device,
//! each with per-service attribute lists. Every attribute holds a list of
//! timestamped values; consumers only ever care about the most recent one.

use crate::device::ServiceName;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One device entry inside a bulk state report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateUpdate {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub services: Vec<ServiceState>,
}

/// State snapshot of one service on one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    pub name: ServiceName,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl ServiceState {
    /// Latest value of the named attribute, if present.
    pub fn latest_attribute(&self, name: &str) -> Option<&AttributeValue> {
        let attr = self.attributes.iter().find(|a| a.name == name)?;
        latest(&attr.values)
    }
}

/// Named attribute with its timestamped value history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(default)]
    pub values: Vec<AttributeValue>,
}

/// A single reported value with its wall-clock timestamp and per-value
/// properties (e.g. the unit of a temperature reading).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeValue {
    #[serde(default)]
    pub val: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub props: serde_json::Map<String, Value>,
}

impl AttributeValue {
    pub fn as_bool(&self) -> Option<bool> {
        self.val.as_bool()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.val.as_i64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.val.as_f64()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.val.as_str()
    }

    /// Nested field of an object-valued attribute (`lock.is_secured` etc.).
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.val.get(name)
    }

    /// The `unit` property attached to this value, if any.
    pub fn unit(&self) -> Option<&str> {
        self.props.get("unit").and_then(Value::as_str)
    }

    fn parsed_ts(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(self.ts.as_deref()?).ok()
    }
}

/// Most recently timestamped value in a list.
///
/// Single-element lists return that element without timestamp comparison.
/// Otherwise the entry with the maximum parseable timestamp wins, ties
/// resolved first-seen (strict greater-than against the running maximum);
/// unparseable or missing timestamps rank below any parseable one.
pub fn latest(values: &[AttributeValue]) -> Option<&AttributeValue> {
    if values.len() == 1 {
        return values.first();
    }

    let mut best: Option<(&AttributeValue, Option<DateTime<FixedOffset>>)> = None;
    for value in values {
        let ts = value.parsed_ts();
        match &best {
            None => best = Some((value, ts)),
            Some((_, best_ts)) => {
                let newer = match (&ts, best_ts) {
                    (Some(current), Some(previous)) => current > previous,
                    (Some(_), None) => true,
                    _ => false,
                };
                if newer {
                    best = Some((value, ts));
                }
            }
        }
    }
    best.map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(val: Value, ts: Option<&str>) -> AttributeValue {
        AttributeValue {
            val,
            ts: ts.map(str::to_string),
            props: serde_json::Map::new(),
        }
    }

    #[test]
    fn empty_list_has_no_latest() {
        assert!(latest(&[]).is_none());
    }

    #[test]
    fn single_element_skips_timestamp_parsing() {
        let values = [value(json!(42), Some("not a timestamp"))];
        assert_eq!(latest(&values).unwrap().as_i64(), Some(42));
    }

    #[test]
    fn maximum_timestamp_wins() {
        let values = [
            value(json!(1), Some("2024-03-01T10:00:00+01:00")),
            value(json!(3), Some("2024-03-01T12:30:00+01:00")),
            value(json!(2), Some("2024-03-01T11:00:00+01:00")),
        ];
        assert_eq!(latest(&values).unwrap().as_i64(), Some(3));
    }

    #[test]
    fn ties_resolve_to_first_seen() {
        let values = [
            value(json!("first"), Some("2024-03-01T12:00:00Z")),
            value(json!("second"), Some("2024-03-01T12:00:00Z")),
        ];
        assert_eq!(latest(&values).unwrap().as_str(), Some("first"));
    }

    #[test]
    fn unparseable_timestamps_rank_lowest() {
        let values = [
            value(json!("garbled"), Some("whenever")),
            value(json!("dated"), Some("2020-01-01T00:00:00Z")),
            value(json!("missing"), None),
        ];
        assert_eq!(latest(&values).unwrap().as_str(), Some("dated"));

        let all_unparseable = [
            value(json!("a"), None),
            value(json!("b"), Some("???")),
        ];
        assert_eq!(latest(&all_unparseable).unwrap().as_str(), Some("a"));
    }

    #[test]
    fn latest_attribute_resolves_by_name() {
        let state: ServiceState = serde_json::from_value(json!({
            "name": "battery",
            "attributes": [
                {"name": "lvl", "values": [
                    {"val": 80, "ts": "2024-03-01T08:00:00Z"},
                    {"val": 55, "ts": "2024-03-02T08:00:00Z"}
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(state.latest_attribute("lvl").unwrap().as_i64(), Some(55));
        assert!(state.latest_attribute("voltage").is_none());
    }

    #[test]
    fn value_props_carry_units() {
        let state: ServiceState = serde_json::from_value(json!({
            "name": "sensor_temp",
            "attributes": [
                {"name": "sensor", "values": [
                    {"val": 21.5, "ts": "2024-03-01T08:00:00Z", "props": {"unit": "C"}}
                ]}
            ]
        }))
        .unwrap();
        let latest = state.latest_attribute("sensor").unwrap();
        assert_eq!(latest.as_f64(), Some(21.5));
        assert_eq!(latest.unit(), Some("C"));
    }
}
