//! Typed access to opaque plan metadata.
//!
//! Brokers attach arbitrary JSON to their plans. Policies read boolean flags
//! out of it through [`PlanMetadata::flag`], which keeps "explicitly false"
//! and "not set" apart.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Opaque key-value metadata attached to a service plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanMetadata(Value);

/// Tri-state result of reading a boolean metadata flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFlag {
    Present(bool),
    Absent,
}

impl MetadataFlag {
    /// Returns the flag value, or `default` when the flag is not set.
    pub fn value_or(self, default: bool) -> bool {
        match self {
            Self::Present(value) => value,
            Self::Absent => default,
        }
    }

    pub fn is_absent(self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl PlanMetadata {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn empty() -> Self {
        Self(Value::Null)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Reads `key` as a boolean flag.
    ///
    /// JSON booleans and the strings `"true"`/`"false"` (any case) are
    /// accepted. A missing key or `null` is [`MetadataFlag::Absent`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedMetadata`] when the metadata is not an
    /// object, or when the value under `key` cannot be read as a boolean.
    pub fn flag(&self, key: &str) -> Result<MetadataFlag> {
        let object = match &self.0 {
            Value::Null => return Ok(MetadataFlag::Absent),
            Value::Object(object) => object,
            other => {
                return Err(CoreError::malformed_metadata(
                    key,
                    format!("metadata must be a JSON object, found {}", type_name(other)),
                ));
            }
        };

        match object.get(key) {
            None | Some(Value::Null) => Ok(MetadataFlag::Absent),
            Some(Value::Bool(value)) => Ok(MetadataFlag::Present(*value)),
            Some(Value::String(text)) if text.eq_ignore_ascii_case("true") => {
                Ok(MetadataFlag::Present(true))
            }
            Some(Value::String(text)) if text.eq_ignore_ascii_case("false") => {
                Ok(MetadataFlag::Present(false))
            }
            Some(other) => Err(CoreError::malformed_metadata(
                key,
                format!("expected a boolean, found {}", type_name(other)),
            )),
        }
    }
}

impl From<Value> for PlanMetadata {
    fn from(value: Value) -> Self {
        Self(value)
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_boolean_flags() {
        let metadata = PlanMetadata::new(json!({"complementary": true, "beta": false}));
        assert_eq!(
            metadata.flag("complementary").unwrap(),
            MetadataFlag::Present(true)
        );
        assert_eq!(metadata.flag("beta").unwrap(), MetadataFlag::Present(false));
    }

    #[test]
    fn test_absent_flag_is_distinct_from_false() {
        let metadata = PlanMetadata::new(json!({"other": 1, "nulled": null}));
        assert_eq!(metadata.flag("complementary").unwrap(), MetadataFlag::Absent);
        assert_eq!(metadata.flag("nulled").unwrap(), MetadataFlag::Absent);
        assert_eq!(PlanMetadata::empty().flag("x").unwrap(), MetadataFlag::Absent);
    }

    #[test]
    fn test_string_booleans() {
        let metadata = PlanMetadata::new(json!({"a": "TRUE", "b": "False"}));
        assert_eq!(metadata.flag("a").unwrap(), MetadataFlag::Present(true));
        assert_eq!(metadata.flag("b").unwrap(), MetadataFlag::Present(false));
    }

    #[test]
    fn test_malformed_values() {
        let metadata = PlanMetadata::new(json!({"n": 1, "s": "yes", "o": {}}));
        for key in ["n", "s", "o"] {
            let err = metadata.flag(key).unwrap_err();
            assert!(matches!(err, CoreError::MalformedMetadata { .. }), "{key}");
        }

        let err = PlanMetadata::new(json!([1, 2])).flag("n").unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn test_value_or() {
        assert!(MetadataFlag::Present(true).value_or(false));
        assert!(!MetadataFlag::Present(false).value_or(true));
        assert!(MetadataFlag::Absent.value_or(true));
        assert!(MetadataFlag::Absent.is_absent());
    }
}
