//! Record types for mirrored documents.

use crate::{error::Result, Error, RecordKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default key path for mirrored collections.
pub const DEFAULT_KEY_PATH: &str = "_id";

/// A mirrored document.
///
/// Contents are owned by the application; the engine only ever looks at the
/// identifier field named by the collection's key path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Value);

impl Record {
    /// Wrap a JSON document.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the underlying JSON document.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Unwrap into the underlying JSON document.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Look up a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Extract the primary key of this record.
    ///
    /// `key_path` may be dotted (`meta.id`) to reach into nested objects.
    /// A bare string or number standing in for a whole document is its own
    /// key, which is how delete operations sometimes name their target.
    pub fn key(&self, key_path: &str) -> Result<RecordKey> {
        let missing = || Error::MissingIdentifier {
            key_path: key_path.to_string(),
        };

        match &self.0 {
            Value::String(_) | Value::Number(_) => key_from_value(&self.0).ok_or_else(missing),
            Value::Object(_) => {
                let mut current = &self.0;
                for segment in key_path.split('.') {
                    current = current.get(segment).ok_or_else(missing)?;
                }
                key_from_value(current).ok_or_else(missing)
            }
            _ => Err(missing()),
        }
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Normalize an identifier value into a store key.
///
/// Extended-JSON object ids (`{"$oid": "..."}`) are keyed by their hex text.
fn key_from_value(value: &Value) -> Option<RecordKey> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map
            .get("$oid")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}
