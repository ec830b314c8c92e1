//! Raw document values.
//!
//! Legacy documents have no fixed schema, so every document is read as a
//! [`RawRecord`]: a map from field name to a small closed set of value kinds.
//! Typed entities are built from raw records by explicit mapping functions
//! instead of deserializing straight into structs.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use crate::StoreError;

/// A document body: field name to value.
pub type RawRecord = BTreeMap<String, FieldValue>;

/// A single field value as stored in Firestore.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<FieldValue>),
    Map(RawRecord),
}

impl FieldValue {
    /// Truthiness as the legacy application code saw it.
    ///
    /// `null`, `false`, `0`, `NaN` and `""` are falsy; timestamps, arrays and
    /// maps are always truthy, even when empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Bool(b) => *b,
            FieldValue::Integer(i) => *i != 0,
            FieldValue::Double(d) => *d != 0.0 && !d.is_nan(),
            FieldValue::String(s) => !s.is_empty(),
            FieldValue::Timestamp(_) | FieldValue::Array(_) | FieldValue::Map(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of integer and double values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&RawRecord> {
        match self {
            FieldValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Encode as a Firestore REST `Value` object.
    pub fn to_rest(&self) -> Value {
        match self {
            FieldValue::Null => json!({ "nullValue": null }),
            FieldValue::Bool(b) => json!({ "booleanValue": b }),
            // The REST API carries 64-bit integers as decimal strings.
            FieldValue::Integer(i) => json!({ "integerValue": i.to_string() }),
            FieldValue::Double(d) => json!({ "doubleValue": d }),
            FieldValue::String(s) => json!({ "stringValue": s }),
            FieldValue::Timestamp(ts) => {
                json!({ "timestampValue": ts.to_rfc3339_opts(SecondsFormat::Micros, true) })
            }
            FieldValue::Array(values) => {
                let values: Vec<Value> = values.iter().map(FieldValue::to_rest).collect();
                json!({ "arrayValue": { "values": values } })
            }
            FieldValue::Map(map) => json!({ "mapValue": { "fields": record_to_rest(map) } }),
        }
    }

    /// Decode a Firestore REST `Value` object.
    pub fn from_rest(value: &Value) -> Result<Self, StoreError> {
        let object = value
            .as_object()
            .ok_or_else(|| StoreError::Decode(format!("expected value object, got {}", value)))?;
        let (kind, inner) = object
            .iter()
            .next()
            .ok_or_else(|| StoreError::Decode("empty value object".to_string()))?;

        match kind.as_str() {
            "nullValue" => Ok(FieldValue::Null),
            "booleanValue" => inner
                .as_bool()
                .map(FieldValue::Bool)
                .ok_or_else(|| StoreError::Decode(format!("invalid booleanValue: {}", inner))),
            "integerValue" => {
                let parsed = match inner {
                    Value::String(s) => s.parse::<i64>().ok(),
                    Value::Number(n) => n.as_i64(),
                    _ => None,
                };
                parsed
                    .map(FieldValue::Integer)
                    .ok_or_else(|| StoreError::Decode(format!("invalid integerValue: {}", inner)))
            }
            "doubleValue" => {
                let parsed = match inner {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.parse::<f64>().ok(),
                    _ => None,
                };
                parsed
                    .map(FieldValue::Double)
                    .ok_or_else(|| StoreError::Decode(format!("invalid doubleValue: {}", inner)))
            }
            "timestampValue" => {
                let raw = inner
                    .as_str()
                    .ok_or_else(|| StoreError::Decode(format!("invalid timestampValue: {}", inner)))?;
                DateTime::parse_from_rfc3339(raw)
                    .map(|ts| FieldValue::Timestamp(ts.with_timezone(&Utc)))
                    .map_err(|e| StoreError::Decode(format!("invalid timestampValue {}: {}", raw, e)))
            }
            "stringValue" | "bytesValue" | "referenceValue" => inner
                .as_str()
                .map(|s| FieldValue::String(s.to_string()))
                .ok_or_else(|| StoreError::Decode(format!("invalid {}: {}", kind, inner))),
            "geoPointValue" => {
                let mut point = RawRecord::new();
                for axis in ["latitude", "longitude"] {
                    let coordinate = inner.get(axis).and_then(Value::as_f64).unwrap_or(0.0);
                    point.insert(axis.to_string(), FieldValue::Double(coordinate));
                }
                Ok(FieldValue::Map(point))
            }
            "arrayValue" => {
                let values = match inner.get("values").and_then(Value::as_array) {
                    Some(values) => values
                        .iter()
                        .map(FieldValue::from_rest)
                        .collect::<Result<Vec<_>, _>>()?,
                    None => Vec::new(),
                };
                Ok(FieldValue::Array(values))
            }
            "mapValue" => {
                let fields = match inner.get("fields").and_then(Value::as_object) {
                    Some(fields) => record_from_rest(fields)?,
                    None => RawRecord::new(),
                };
                Ok(FieldValue::Map(fields))
            }
            other => Err(StoreError::Decode(format!("unsupported value kind: {}", other))),
        }
    }

    /// Render as plain JSON; timestamps become RFC 3339 strings.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => json!(b),
            FieldValue::Integer(i) => json!(i),
            FieldValue::Double(d) => json!(d),
            FieldValue::String(s) => json!(s),
            FieldValue::Timestamp(ts) => json!(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            FieldValue::Array(values) => Value::Array(values.iter().map(FieldValue::to_json).collect()),
            FieldValue::Map(map) => record_to_json(map),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(d: f64) -> Self {
        FieldValue::Double(d)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(ts)
    }
}

impl From<RawRecord> for FieldValue {
    fn from(map: RawRecord) -> Self {
        FieldValue::Map(map)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(values: Vec<FieldValue>) -> Self {
        FieldValue::Array(values)
    }
}

/// Encode a record as a REST `fields` object.
pub fn record_to_rest(record: &RawRecord) -> Value {
    let fields: Map<String, Value> = record
        .iter()
        .map(|(k, v)| (k.clone(), v.to_rest()))
        .collect();
    Value::Object(fields)
}

/// Decode a REST `fields` object.
pub fn record_from_rest(fields: &Map<String, Value>) -> Result<RawRecord, StoreError> {
    fields
        .iter()
        .map(|(k, v)| Ok((k.clone(), FieldValue::from_rest(v)?)))
        .collect()
}

/// Render a record as a plain JSON object.
pub fn record_to_json(record: &RawRecord) -> Value {
    Value::Object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_truthiness_matches_legacy_rules() {
        assert!(!FieldValue::Null.is_truthy());
        assert!(!FieldValue::Bool(false).is_truthy());
        assert!(!FieldValue::Integer(0).is_truthy());
        assert!(!FieldValue::Double(f64::NAN).is_truthy());
        assert!(!FieldValue::String(String::new()).is_truthy());

        assert!(FieldValue::Bool(true).is_truthy());
        assert!(FieldValue::Integer(-1).is_truthy());
        assert!(FieldValue::Array(vec![]).is_truthy());
        assert!(FieldValue::Map(RawRecord::new()).is_truthy());
        assert!(FieldValue::Timestamp(Utc::now()).is_truthy());
    }

    #[test]
    fn test_decode_nested_rest_value() {
        let rest = json!({
            "mapValue": {
                "fields": {
                    "version": { "stringValue": "2.0.0" },
                    "dryRun": { "booleanValue": false },
                    "count": { "integerValue": "42" },
                    "migratedAt": { "timestampValue": "2024-01-01T00:00:00Z" },
                    "tags": { "arrayValue": { "values": [{ "stringValue": "a" }] } }
                }
            }
        });

        let value = FieldValue::from_rest(&rest).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map["version"], FieldValue::from("2.0.0"));
        assert_eq!(map["dryRun"], FieldValue::Bool(false));
        assert_eq!(map["count"], FieldValue::Integer(42));
        assert_eq!(
            map["migratedAt"],
            FieldValue::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(map["tags"], FieldValue::Array(vec![FieldValue::from("a")]));
    }

    #[test]
    fn test_decode_empty_containers() {
        assert_eq!(
            FieldValue::from_rest(&json!({ "arrayValue": {} })).unwrap(),
            FieldValue::Array(vec![])
        );
        assert_eq!(
            FieldValue::from_rest(&json!({ "mapValue": {} })).unwrap(),
            FieldValue::Map(RawRecord::new())
        );
    }

    #[test]
    fn test_decode_reference_and_geo_point() {
        let reference = json!({ "referenceValue": "projects/p/databases/(default)/documents/videos/v1" });
        assert_eq!(
            FieldValue::from_rest(&reference).unwrap().as_str(),
            Some("projects/p/databases/(default)/documents/videos/v1")
        );

        let geo = json!({ "geoPointValue": { "latitude": 35.6, "longitude": 139.7 } });
        let point = FieldValue::from_rest(&geo).unwrap();
        assert_eq!(point.as_map().unwrap()["latitude"], FieldValue::Double(35.6));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let err = FieldValue::from_rest(&json!({ "vectorValue": {} })).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn test_integer_encodes_as_string() {
        assert_eq!(FieldValue::Integer(7).to_rest(), json!({ "integerValue": "7" }));
    }

    proptest! {
        #[test]
        fn string_truthiness_is_non_emptiness(s in ".{0,20}") {
            prop_assert_eq!(FieldValue::from(s.as_str()).is_truthy(), !s.is_empty());
        }

        #[test]
        fn integer_survives_rest_encoding(i in any::<i64>()) {
            let decoded = FieldValue::from_rest(&FieldValue::Integer(i).to_rest()).unwrap();
            prop_assert_eq!(decoded, FieldValue::Integer(i));
        }
    }
}
