//! Source side of the pipeline: raw records and the paginated fetcher.

pub mod pagination;
pub mod shopify;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FetchError;

pub use pagination::{LinkValue, next_link, parse_link_header};
pub use shopify::ShopifyClient;

/// Why a single field lookup on a raw record failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("cannot parse '{value}': {reason}")]
    Unparseable { value: String, reason: String },
}

/// One loosely-typed record exactly as the source returned it.
///
/// Every accessor treats an absent field and an explicit JSON `null` the same
/// way (`Ok(None)`), and reports a type mismatch instead of guessing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(FieldError::WrongType {
                expected: "object",
                found: type_name(&other),
            }),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Field value, with JSON `null` folded into `None`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, field: &str) -> Result<Option<&str>, FieldError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(FieldError::WrongType {
                expected: "string",
                found: type_name(other),
            }),
        }
    }

    pub fn i64_field(&self, field: &str) -> Result<Option<i64>, FieldError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| FieldError::Unparseable {
                value: n.to_string(),
                reason: "not an integer".into(),
            }),
            Some(Value::String(s)) => s.trim().parse::<i64>().map(Some).map_err(|e| {
                FieldError::Unparseable {
                    value: s.clone(),
                    reason: e.to_string(),
                }
            }),
            Some(other) => Err(FieldError::WrongType {
                expected: "integer",
                found: type_name(other),
            }),
        }
    }

    /// Numeric field; money amounts arrive as decimal strings, so those parse too.
    pub fn f64_field(&self, field: &str) -> Result<Option<f64>, FieldError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| FieldError::Unparseable {
                value: n.to_string(),
                reason: "not representable as f64".into(),
            }),
            Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|e| {
                FieldError::Unparseable {
                    value: s.clone(),
                    reason: e.to_string(),
                }
            }),
            Some(other) => Err(FieldError::WrongType {
                expected: "number",
                found: type_name(other),
            }),
        }
    }

    /// Identifier rendered as a decimal string. Accepts integers and numeric strings.
    pub fn id_field(&self, field: &str) -> Result<Option<String>, FieldError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::Number(n)) if n.is_u64() || n.is_i64() => Ok(Some(n.to_string())),
            Some(Value::Number(n)) => Err(FieldError::Unparseable {
                value: n.to_string(),
                reason: "identifier is not an integer".into(),
            }),
            Some(Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(id) => Ok(Some(id.to_string())),
                Err(e) => Err(FieldError::Unparseable {
                    value: s.clone(),
                    reason: format!("identifier is not an integer: {e}"),
                }),
            },
            Some(other) => Err(FieldError::WrongType {
                expected: "integer or string",
                found: type_name(other),
            }),
        }
    }

    /// RFC 3339 timestamp normalised to UTC.
    pub fn timestamp_field(&self, field: &str) -> Result<Option<DateTime<Utc>>, FieldError> {
        match self.str_field(field)? {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| FieldError::Unparseable {
                    value: s.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// First element of an array-of-objects field, if the array is non-empty.
    pub fn first_in_array(&self, field: &str) -> Result<Option<RawRecord>, FieldError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::Array(items)) => match items.first() {
                None | Some(Value::Null) => Ok(None),
                Some(first) => RawRecord::from_value(first.clone()).map(Some),
            },
            Some(other) => Err(FieldError::WrongType {
                expected: "array",
                found: type_name(other),
            }),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// All records of one resource collection, in source order.
#[derive(Debug, Clone, Default)]
pub struct ResourceCollection {
    pub resource: String,
    pub records: Vec<RawRecord>,
    pub pages: usize,
}

impl ResourceCollection {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Trait for pulling a complete resource collection from a source.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch every page of `resource_path`, reading records from the array at `key`.
    async fn fetch_all(&self, resource_path: &str, key: &str)
    -> Result<ResourceCollection, FetchError>;

    /// Source identifier, for logging.
    fn source_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        RawRecord::from_value(value).unwrap()
    }

    #[test]
    fn test_null_and_absent_are_none() {
        let r = record(json!({"email": null}));
        assert_eq!(r.str_field("email").unwrap(), None);
        assert_eq!(r.str_field("first_name").unwrap(), None);
    }

    #[test]
    fn test_str_field_wrong_type() {
        let r = record(json!({"email": 42}));
        assert_eq!(
            r.str_field("email").unwrap_err(),
            FieldError::WrongType {
                expected: "string",
                found: "number"
            }
        );
    }

    #[test]
    fn test_id_field_accepts_number_and_string() {
        let r = record(json!({"a": 207119551, "b": "8823", "c": 1.5, "d": ""}));
        assert_eq!(r.id_field("a").unwrap().as_deref(), Some("207119551"));
        assert_eq!(r.id_field("b").unwrap().as_deref(), Some("8823"));
        assert!(r.id_field("c").is_err());
        assert!(r.id_field("d").is_err());
        assert_eq!(r.id_field("missing").unwrap(), None);
    }

    #[test]
    fn test_id_field_rejects_non_numeric_strings() {
        let r = record(json!({"a": "abc", "b": " 8823 ", "c": "12ab"}));
        assert!(matches!(
            r.id_field("a").unwrap_err(),
            FieldError::Unparseable { ref value, .. } if value == "abc"
        ));
        assert_eq!(r.id_field("b").unwrap().as_deref(), Some("8823"));
        assert!(r.id_field("c").is_err());
    }

    #[test]
    fn test_f64_field_parses_decimal_strings() {
        let r = record(json!({"total_spent": "199.65", "n": 3, "bad": "abc"}));
        assert_eq!(r.f64_field("total_spent").unwrap(), Some(199.65));
        assert_eq!(r.f64_field("n").unwrap(), Some(3.0));
        assert!(matches!(
            r.f64_field("bad"),
            Err(FieldError::Unparseable { .. })
        ));
    }

    #[test]
    fn test_i64_field_rejects_fraction() {
        let r = record(json!({"orders_count": 2.5}));
        assert!(r.i64_field("orders_count").is_err());
    }

    #[test]
    fn test_timestamp_normalised_to_utc() {
        let r = record(json!({"created_at": "2024-03-01T10:15:00-05:00"}));
        let ts = r.timestamp_field("created_at").unwrap().unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T15:15:00+00:00");
    }

    #[test]
    fn test_timestamp_unparseable() {
        let r = record(json!({"created_at": "yesterday"}));
        assert!(r.timestamp_field("created_at").is_err());
    }

    #[test]
    fn test_first_in_array() {
        let r = record(json!({"variants": [{"price": "9.99"}, {"price": "1.00"}], "empty": []}));
        let first = r.first_in_array("variants").unwrap().unwrap();
        assert_eq!(first.f64_field("price").unwrap(), Some(9.99));
        assert_eq!(r.first_in_array("empty").unwrap(), None);
        assert_eq!(r.first_in_array("missing").unwrap(), None);
    }

    #[test]
    fn test_from_value_requires_object() {
        assert!(RawRecord::from_value(json!([1, 2])).is_err());
    }
}
