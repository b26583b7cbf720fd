//! Scalar field values shared by storage records and output documents.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Encapsulates the set of supported scalar field value types.
///
/// `Null` is included so callers can distinguish between “missing key” and
/// “explicit null”; a null reference field means “no referenced record”.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// The declared type this value inhabits; `None` for `Null`.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            FieldValue::Null => None,
            FieldValue::String(_) => Some(ScalarType::String),
            FieldValue::Integer(_) => Some(ScalarType::Integer),
            FieldValue::Float(_) => Some(ScalarType::Float),
            FieldValue::Boolean(_) => Some(ScalarType::Boolean),
            FieldValue::Timestamp(_) => Some(ScalarType::Timestamp),
        }
    }

    /// Plain JSON rendering used by output documents. Non-finite floats
    /// have no JSON form and render as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::String(value) => serde_json::Value::String(value.clone()),
            FieldValue::Integer(value) => serde_json::Value::from(*value),
            FieldValue::Float(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Boolean(value) => serde_json::Value::Bool(*value),
            FieldValue::Timestamp(value) => serde_json::Value::String(value.to_rfc3339()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Declared type of a scalar field in an entity shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

impl ScalarType {
    /// Whether a non-null value conforms to this type. Integers widen to
    /// floats; nothing else converts.
    pub fn accepts(self, value: &FieldValue) -> bool {
        match (self, value.scalar_type()) {
            (_, None) => false,
            (ScalarType::Float, Some(ScalarType::Integer)) => true,
            (expected, Some(actual)) => expected == actual,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::String => "string",
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Boolean => "boolean",
            ScalarType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Provides read-only access to a record's fields.
pub trait FieldContainer {
    /// Returns the backing field map keyed by field name.
    fn fields(&self) -> &BTreeMap<String, FieldValue>;

    /// Fetches a single field by name if present.
    fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields().get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestContainer {
        fields: BTreeMap<String, FieldValue>,
    }

    impl FieldContainer for TestContainer {
        fn fields(&self) -> &BTreeMap<String, FieldValue> {
            &self.fields
        }
    }

    fn fixture_container() -> TestContainer {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldValue::String("Plant A".into()));
        fields.insert("active".to_string(), FieldValue::Boolean(true));

        TestContainer { fields }
    }

    #[test]
    fn field_returns_value_when_present() {
        let container = fixture_container();

        match container.field("name") {
            Some(FieldValue::String(name)) => assert_eq!(name, "Plant A"),
            other => panic!("unexpected field value: {:?}", other),
        }
    }

    #[test]
    fn field_returns_none_when_missing() {
        let container = fixture_container();

        assert!(container.field("missing").is_none());
    }

    #[test]
    fn float_accepts_integer_but_not_the_reverse() {
        assert!(ScalarType::Float.accepts(&FieldValue::Integer(3)));
        assert!(!ScalarType::Integer.accepts(&FieldValue::Float(3.0)));
        assert!(!ScalarType::String.accepts(&FieldValue::Null));
    }

    #[test]
    fn json_rendering_is_untagged() {
        assert_eq!(FieldValue::from("x").to_json(), serde_json::json!("x"));
        assert_eq!(FieldValue::Integer(7).to_json(), serde_json::json!(7));
        assert_eq!(FieldValue::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(FieldValue::from(None::<bool>), FieldValue::Null);
    }
}
