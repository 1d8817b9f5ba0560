//! The local key-value store contract and an in-memory implementation.
//!
//! A store holds named collections of records keyed by an identifier field.
//! Its shape only changes through [`SchemaUpgrade`]s, and every write batch
//! against a collection is atomic: either all writes become visible or none.

use crate::{
    error::Result, CollectionName, Error, Record, RecordKey, SchemaUpgrade, StoreSchema,
};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// A single write inside a collection transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StoreWrite {
    /// Insert a record; fails the batch if its key already exists
    Add(Record),
    /// Insert or replace a record by key
    Put(Record),
    /// Remove a record by key; a missing key is not an error
    Delete(RecordKey),
    /// Remove every record in the collection
    Clear,
}

/// Embedded key-value database holding the local mirror.
///
/// Implementations must make [`KeyValueStore::upgrade`] and
/// [`KeyValueStore::write_many`] atomic.
#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
    /// Current schema version and collections.
    async fn schema(&self) -> Result<StoreSchema>;

    /// Bump the schema version, creating collections.
    async fn upgrade(&mut self, upgrade: &SchemaUpgrade) -> Result<()>;

    /// Read one record by key.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>>;

    /// Read every record of a collection, ordered by key.
    async fn all(&self, collection: &str) -> Result<Vec<Record>>;

    /// Apply a batch of writes to one collection in a single transaction.
    async fn write(&mut self, collection: &str, writes: Vec<StoreWrite>) -> Result<()> {
        self.write_many(vec![(collection.to_string(), writes)]).await
    }

    /// Apply batches to several collections in a single transaction.
    ///
    /// Batches run in the given order. If any write fails, no collection
    /// changes.
    async fn write_many(&mut self, batches: Vec<(CollectionName, Vec<StoreWrite>)>) -> Result<()>;
}

/// A collection of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    key_path: String,
    records: BTreeMap<RecordKey, Record>,
}

impl Collection {
    /// Create an empty collection keyed by `key_path`.
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            records: BTreeMap::new(),
        }
    }

    /// Get a record by key.
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    /// Check if a record exists.
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// All records, ordered by key.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// All keys, in order.
    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.records.keys()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the collection has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn apply(&mut self, name: &str, write: StoreWrite) -> Result<()> {
        match write {
            StoreWrite::Add(record) => {
                let key = record.key(&self.key_path)?;
                if self.records.contains_key(&key) {
                    return Err(Error::RecordConflict {
                        collection: name.to_string(),
                        key,
                    });
                }
                self.records.insert(key, record);
            }
            StoreWrite::Put(record) => {
                let key = record.key(&self.key_path)?;
                self.records.insert(key, record);
            }
            StoreWrite::Delete(key) => {
                self.records.remove(&key);
            }
            StoreWrite::Clear => self.records.clear(),
        }
        Ok(())
    }
}

/// In-memory [`KeyValueStore`].
///
/// Cloning a store snapshots it, and equality compares schema and contents
/// only, which makes before/after checks straightforward.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    schema: StoreSchema,
    collections: BTreeMap<CollectionName, Collection>,
    commits: u64,
}

impl MemoryStore {
    /// Create an empty store at schema version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a collection.
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// Number of committed upgrades and write batches so far.
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    fn collection_ref(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }
}

impl PartialEq for MemoryStore {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.collections == other.collections
    }
}

impl KeyValueStore for MemoryStore {
    async fn schema(&self) -> Result<StoreSchema> {
        Ok(self.schema.clone())
    }

    async fn upgrade(&mut self, upgrade: &SchemaUpgrade) -> Result<()> {
        self.schema.apply_upgrade(upgrade)?;
        for spec in &upgrade.create {
            self.collections
                .insert(spec.name.clone(), Collection::new(spec.key_path.clone()));
        }
        self.commits += 1;
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        Ok(self.collection_ref(collection)?.get(key).cloned())
    }

    async fn all(&self, collection: &str) -> Result<Vec<Record>> {
        Ok(self.collection_ref(collection)?.records().cloned().collect())
    }

    async fn write_many(&mut self, batches: Vec<(CollectionName, Vec<StoreWrite>)>) -> Result<()> {
        // Work on copies so a failing write leaves every collection untouched
        let mut staged: BTreeMap<CollectionName, Collection> = BTreeMap::new();
        for (name, writes) in batches {
            let collection = match staged.entry(name.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(self.collection_ref(&name)?.clone()),
            };
            for write in writes {
                collection.apply(&name, write)?;
            }
        }

        self.collections.extend(staged);
        self.commits += 1;
        Ok(())
    }
}
