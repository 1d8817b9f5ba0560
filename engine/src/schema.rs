//! Local store schema and versioned upgrades.
//!
//! The local store only changes shape through an upgrade that bumps its
//! schema version. Upgrades create collections; they never drop or rename
//! them.

use crate::{error::Result, CollectionName, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A collection to create, with the field used as its primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSpec {
    /// Collection name
    pub name: CollectionName,
    /// Record field holding the primary key
    pub key_path: String,
}

impl CollectionSpec {
    /// Create a new collection spec.
    pub fn new(name: impl Into<CollectionName>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
        }
    }
}

/// The shape of the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSchema {
    /// Schema version, 0 for a store that was never upgraded
    pub version: SchemaVersion,
    /// Key path by collection name
    pub collections: BTreeMap<CollectionName, String>,
}

impl StoreSchema {
    /// Create a schema at the given version with no collections.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: BTreeMap::new(),
        }
    }

    /// Whether a collection exists.
    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Key path of a collection.
    pub fn key_path(&self, name: &str) -> Result<&str> {
        self.collections
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Check that `upgrade` can be applied to this schema.
    pub fn check_upgrade(&self, upgrade: &SchemaUpgrade) -> Result<()> {
        if upgrade.from != self.version {
            return Err(Error::SchemaVersionMismatch {
                expected: upgrade.from,
                actual: self.version,
            });
        }
        if upgrade.to <= upgrade.from {
            return Err(Error::SchemaUpgradeFailed {
                target: upgrade.to,
                reason: format!("version must increase past {}", upgrade.from),
            });
        }
        for spec in &upgrade.create {
            if self.contains(&spec.name) {
                return Err(Error::CollectionExists(spec.name.clone()));
            }
        }
        Ok(())
    }

    /// Apply an upgrade, after checking it.
    pub fn apply_upgrade(&mut self, upgrade: &SchemaUpgrade) -> Result<()> {
        self.check_upgrade(upgrade)?;
        for spec in &upgrade.create {
            self.collections
                .insert(spec.name.clone(), spec.key_path.clone());
        }
        self.version = upgrade.to;
        Ok(())
    }
}

/// A single version bump that creates a batch of collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaUpgrade {
    /// Version the store must currently be at
    pub from: SchemaVersion,
    /// Version after the upgrade
    pub to: SchemaVersion,
    /// Collections created by the upgrade
    pub create: Vec<CollectionSpec>,
}

impl SchemaUpgrade {
    /// Plan an upgrade one version past `from`.
    pub fn next(from: SchemaVersion, create: Vec<CollectionSpec>) -> Self {
        Self {
            from,
            to: from + 1,
            create,
        }
    }
}

/// Check that a name can be used for a mirrored collection.
///
/// Names end up in URL paths, so only `[A-Za-z0-9_]` is accepted. A leading
/// underscore is reserved for bookkeeping collections such as `_meta`.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidCollectionName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_with_author() -> StoreSchema {
        let mut schema = StoreSchema::new(0);
        schema
            .apply_upgrade(&SchemaUpgrade::next(
                0,
                vec![CollectionSpec::new("author", "_id")],
            ))
            .unwrap();
        schema
    }

    #[test]
    fn upgrade_creates_collections() {
        let schema = schema_with_author();
        assert_eq!(schema.version, 1);
        assert!(schema.contains("author"));
        assert_eq!(schema.key_path("author").unwrap(), "_id");
    }

    #[test]
    fn upgrade_from_wrong_version() {
        let schema = schema_with_author();
        let upgrade = SchemaUpgrade::next(0, vec![CollectionSpec::new("series", "_id")]);

        let result = schema.check_upgrade(&upgrade);
        assert!(matches!(
            result,
            Err(Error::SchemaVersionMismatch {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn upgrade_must_increase_version() {
        let schema = schema_with_author();
        let upgrade = SchemaUpgrade {
            from: 1,
            to: 1,
            create: vec![],
        };
        assert!(matches!(
            schema.check_upgrade(&upgrade),
            Err(Error::SchemaUpgradeFailed { target: 1, .. })
        ));
    }

    #[test]
    fn upgrade_rejects_existing_collection() {
        let mut schema = schema_with_author();
        let upgrade = SchemaUpgrade::next(
            1,
            vec![
                CollectionSpec::new("series", "_id"),
                CollectionSpec::new("author", "_id"),
            ],
        );

        let result = schema.apply_upgrade(&upgrade);
        assert!(matches!(result, Err(Error::CollectionExists(c)) if c == "author"));
        // Nothing from the failed upgrade is applied
        assert!(!schema.contains("series"));
        assert_eq!(schema.version, 1);
    }

    #[test]
    fn key_path_of_unknown_collection() {
        let schema = StoreSchema::default();
        assert!(matches!(
            schema.key_path("author"),
            Err(Error::CollectionNotFound(c)) if c == "author"
        ));
    }

    #[test]
    fn collection_names() {
        for name in ["author", "citationwork", "online_corpus", "v2"] {
            assert!(validate_collection_name(name).is_ok(), "{name}");
        }
        for name in ["", "_meta", "with space", "a/b", "ünïcode", "a-b"] {
            assert!(validate_collection_name(name).is_err(), "{name}");
        }
    }
}
