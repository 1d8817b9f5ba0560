//! Collection version maps and their on-disk meta record.
//!
//! The local map lives in the reserved `_meta` collection as a single
//! record: `{"_id": "state", "<collection>": "<token>", ...}`.

use crate::{CollectionName, Record, VersionToken};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserved collection holding sync bookkeeping.
pub const META_COLLECTION: &str = "_meta";

/// Key of the state record inside the meta collection.
pub const STATE_KEY: &str = "state";

/// Key path of the meta collection.
pub const META_KEY_PATH: &str = "_id";

/// Mapping from collection name to the version token it was synced at.
///
/// Uses BTreeMap so serialization and iteration order are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionVersionMap(BTreeMap<CollectionName, VersionToken>);

impl CollectionVersionMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Get the token for a collection.
    pub fn get(&self, collection: &str) -> Option<&VersionToken> {
        self.0.get(collection)
    }

    /// Set the token for a collection, returning the previous one.
    pub fn insert(
        &mut self,
        collection: impl Into<CollectionName>,
        token: impl Into<VersionToken>,
    ) -> Option<VersionToken> {
        self.0.insert(collection.into(), token.into())
    }

    /// Builder-style insert.
    pub fn with(
        mut self,
        collection: impl Into<CollectionName>,
        token: impl Into<VersionToken>,
    ) -> Self {
        self.insert(collection, token);
        self
    }

    /// Whether a collection has a token.
    pub fn contains(&self, collection: &str) -> bool {
        self.0.contains_key(collection)
    }

    /// Number of tracked collections.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no collection is tracked.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(collection, token)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&CollectionName, &VersionToken)> {
        self.0.iter()
    }

    /// Overwrite entries with those from `other`; entries only in `self` stay.
    pub fn merge(&mut self, other: &CollectionVersionMap) {
        for (collection, token) in other.iter() {
            self.0.insert(collection.clone(), token.clone());
        }
    }

    /// Read a map back from a stored meta record.
    ///
    /// The `_id` field is not a collection; values that are not strings
    /// were not written by the engine and are skipped.
    pub fn from_meta_record(record: &Record) -> Self {
        let Some(object) = record.as_value().as_object() else {
            return Self::new();
        };

        object
            .iter()
            .filter(|(field, _)| field.as_str() != META_KEY_PATH)
            .filter_map(|(field, value)| {
                value
                    .as_str()
                    .map(|token| (field.clone(), token.to_string()))
            })
            .collect()
    }

    /// Merge this map into an existing meta record.
    ///
    /// Starts from whatever the stored record holds so entries for other
    /// collections survive.
    pub fn merged_into(&self, existing: Option<&Record>) -> Record {
        let mut object = existing
            .and_then(|record| record.as_value().as_object().cloned())
            .unwrap_or_default();

        object.insert(
            META_KEY_PATH.to_string(),
            Value::String(STATE_KEY.to_string()),
        );
        for (collection, token) in self.iter() {
            object.insert(collection.clone(), Value::String(token.clone()));
        }

        Record::new(Value::Object(object))
    }

    /// Render a fresh meta record holding only this map.
    pub fn to_meta_record(&self) -> Record {
        self.merged_into(None)
    }
}

impl FromIterator<(CollectionName, VersionToken)> for CollectionVersionMap {
    fn from_iter<I: IntoIterator<Item = (CollectionName, VersionToken)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<CollectionName, VersionToken>> for CollectionVersionMap {
    fn from(map: BTreeMap<CollectionName, VersionToken>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_keeps_untouched_entries() {
        let mut local = CollectionVersionMap::new()
            .with("alpha", "v1")
            .with("beta", "v2");
        let pass = CollectionVersionMap::new().with("alpha", "v1b");

        local.merge(&pass);

        assert_eq!(local.get("alpha").unwrap(), "v1b");
        assert_eq!(local.get("beta").unwrap(), "v2");
    }

    #[test]
    fn reads_meta_record() {
        let record = Record::new(json!({
            "_id": "state",
            "author": "51a40ce2c6ec494fcbf56e46",
            "series": "502962b349d52414fc0000d1",
            "note": 7
        }));

        let map = CollectionVersionMap::from_meta_record(&record);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("author").unwrap(), "51a40ce2c6ec494fcbf56e46");
        assert!(!map.contains("_id"));
        assert!(!map.contains("note"));
    }

    #[test]
    fn merged_into_preserves_existing_fields() {
        let existing = Record::new(json!({"_id": "state", "alpha": "v1", "beta": "v2"}));
        let update = CollectionVersionMap::new().with("alpha", "v3");

        let merged = update.merged_into(Some(&existing));
        assert_eq!(
            merged.into_value(),
            json!({"_id": "state", "alpha": "v3", "beta": "v2"})
        );
    }

    #[test]
    fn fresh_meta_record() {
        let map = CollectionVersionMap::new().with("author", "v3");
        assert_eq!(
            map.to_meta_record().into_value(),
            json!({"_id": "state", "author": "v3"})
        );
        assert_eq!(
            CollectionVersionMap::new().to_meta_record().into_value(),
            json!({"_id": "state"})
        );
    }

    #[test]
    fn serializes_as_plain_object() {
        let map: CollectionVersionMap =
            serde_json::from_value(json!({"edition": "e1", "author": "a1"})).unwrap();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"author":"a1","edition":"e1"}"#);
    }
}
