//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use magsync_engine::{
    CollectionVersionMap, Error, KeyValueStore, MemoryStore, Record, RemoteState, Result,
    SchemaUpgrade, StoreSchema, StoreWrite, UpdateOperation,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Remote serving canned responses.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRemote {
    state: Option<CollectionVersionMap>,
    collections: HashMap<String, Vec<Record>>,
    updates: HashMap<(String, String), Vec<UpdateOperation>>,
    broken: HashSet<String>,
}

impl ScriptedRemote {
    /// A reachable remote tracking no collections yet.
    pub fn online() -> Self {
        Self {
            state: Some(CollectionVersionMap::new()),
            ..Default::default()
        }
    }

    /// A remote whose state endpoint cannot be reached.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Serve a full collection at `token`.
    pub fn with_collection(mut self, name: &str, token: &str, records: Vec<Value>) -> Self {
        self.track(name, token);
        self.collections
            .insert(name.to_string(), records.into_iter().map(Record::new).collect());
        self
    }

    /// Serve the change log from `since` to `token`.
    pub fn with_updates(
        mut self,
        name: &str,
        since: &str,
        token: &str,
        ops: Vec<UpdateOperation>,
    ) -> Self {
        self.track(name, token);
        self.updates
            .insert((name.to_string(), since.to_string()), ops);
        self
    }

    /// Advertise a token without serving any data for it.
    pub fn with_token(mut self, name: &str, token: &str) -> Self {
        self.track(name, token);
        self
    }

    /// Make every data request for `name` fail.
    pub fn with_broken(mut self, name: &str) -> Self {
        self.broken.insert(name.to_string());
        self
    }

    fn track(&mut self, name: &str, token: &str) {
        self.state
            .get_or_insert_with(CollectionVersionMap::new)
            .insert(name, token);
    }

    fn check(&self, collection: &str) -> Result<()> {
        if self.broken.contains(collection) {
            return Err(Error::InvalidResponse(format!("500 for {collection}")));
        }
        Ok(())
    }
}

impl RemoteState for ScriptedRemote {
    async fn fetch_state(&self) -> Result<CollectionVersionMap> {
        self.state
            .clone()
            .ok_or_else(|| Error::RemoteUnreachable("connection refused".into()))
    }

    async fn fetch_collection(&self, collection: &str) -> Result<Vec<Record>> {
        self.check(collection)?;
        self.collections
            .get(collection)
            .cloned()
            .ok_or_else(|| Error::InvalidResponse(format!("404 for {collection}")))
    }

    async fn fetch_updates(&self, collection: &str, since: &str) -> Result<Vec<UpdateOperation>> {
        self.check(collection)?;
        self.updates
            .get(&(collection.to_string(), since.to_string()))
            .cloned()
            .ok_or_else(|| Error::InvalidResponse(format!("404 for {collection} since {since}")))
    }
}

/// Memory store that fails on demand.
#[derive(Debug, Clone, Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
    pub fail_writes: HashSet<String>,
    pub fail_upgrade: bool,
}

impl FailingStore {
    pub fn wrap(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn failing_writes_to(mut self, collection: &str) -> Self {
        self.fail_writes.insert(collection.to_string());
        self
    }

    pub fn failing_upgrades(mut self) -> Self {
        self.fail_upgrade = true;
        self
    }
}

impl KeyValueStore for FailingStore {
    async fn schema(&self) -> Result<StoreSchema> {
        self.inner.schema().await
    }

    async fn upgrade(&mut self, upgrade: &SchemaUpgrade) -> Result<()> {
        if self.fail_upgrade {
            return Err(Error::Store("upgrade blocked".into()));
        }
        self.inner.upgrade(upgrade).await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        self.inner.get(collection, key).await
    }

    async fn all(&self, collection: &str) -> Result<Vec<Record>> {
        self.inner.all(collection).await
    }

    async fn write_many(&mut self, batches: Vec<(String, Vec<StoreWrite>)>) -> Result<()> {
        if batches
            .iter()
            .any(|(collection, _)| self.fail_writes.contains(collection))
        {
            return Err(Error::Store("transaction aborted".into()));
        }
        self.inner.write_many(batches).await
    }
}
