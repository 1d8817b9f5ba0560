//! Reconciliation of the local mirror against the remote state.
//!
//! # Algorithm
//!
//! 1. Read the local version map from the `_meta` collection (absent means
//!    a first run with an empty map)
//! 2. Fetch the remote version map; on failure stop without writing
//! 3. Partition remote collections into present and missing
//! 4. Create every missing collection in one schema upgrade
//! 5. Populate each missing collection from a full fetch
//! 6. Bring each stale present collection forward from its change log
//! 7. After each collection commits, merge its new token into `_meta`
//!
//! A collection's token only moves once its own data transaction has
//! committed, so an interrupted pass leaves the map matching what was
//! actually written. Failures of one collection do not stop the others.

use crate::{
    error::Result, schema::validate_collection_name, CollectionName, CollectionSpec,
    CollectionVersionMap, Error, KeyValueStore, Record, RemoteState, SchemaUpgrade,
    SchemaVersion, StoreSchema, StoreWrite, UpdateOperation, VersionToken, DEFAULT_KEY_PATH,
    META_COLLECTION, META_KEY_PATH, STATE_KEY,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a reconciliation pass currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// No pass running; the last one (if any) succeeded
    #[default]
    Idle,
    FetchingRemoteState,
    /// The remote state could not be fetched; local data is stale but usable
    Offline,
    Diffing,
    SchemaUpgrade,
    PopulatingMissing,
    UpdatingStale,
    PersistingMeta,
    /// The last pass aborted after reaching the remote
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::FetchingRemoteState => "fetching-remote-state",
            Phase::Offline => "offline",
            Phase::Diffing => "diffing",
            Phase::SchemaUpgrade => "schema-upgrade",
            Phase::PopulatingMissing => "populating-missing",
            Phase::UpdatingStale => "updating-stale",
            Phase::PersistingMeta => "persisting-meta",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Working state of one pass: what is local, what is remote, and the diff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationInfo {
    /// Version map read from `_meta`
    pub local: CollectionVersionMap,
    /// Version map served by the remote
    pub remote: CollectionVersionMap,
    /// Remote collections that already exist locally
    pub present: Vec<CollectionName>,
    /// Remote collections that must be created
    pub missing: Vec<CollectionName>,
    /// Remote names that cannot be used as collections
    pub rejected: Vec<(CollectionName, Error)>,
    /// Local schema version before the pass
    pub schema_version: SchemaVersion,
    /// Whether the `_meta` collection exists
    pub meta_present: bool,
}

impl ReconciliationInfo {
    /// Compare local and remote state against the local schema.
    pub fn diff(
        local: CollectionVersionMap,
        remote: CollectionVersionMap,
        schema: &StoreSchema,
    ) -> Self {
        let mut present = Vec::new();
        let mut missing = Vec::new();
        let mut rejected = Vec::new();

        for (name, _) in remote.iter() {
            if let Err(err) = validate_collection_name(name) {
                rejected.push((name.clone(), err));
            } else if schema.contains(name) {
                present.push(name.clone());
            } else {
                missing.push(name.clone());
            }
        }

        Self {
            local,
            remote,
            present,
            missing,
            rejected,
            schema_version: schema.version,
            meta_present: schema.contains(META_COLLECTION),
        }
    }

    /// The single upgrade creating everything this pass needs, if any.
    pub fn upgrade(&self, key_path: &str) -> Option<SchemaUpgrade> {
        let mut create = Vec::new();

        let syncs_anything = !self.present.is_empty() || !self.missing.is_empty();
        if !self.meta_present && syncs_anything {
            create.push(CollectionSpec::new(META_COLLECTION, META_KEY_PATH));
        }
        create.extend(
            self.missing
                .iter()
                .map(|name| CollectionSpec::new(name.clone(), key_path)),
        );

        if create.is_empty() {
            None
        } else {
            Some(SchemaUpgrade::next(self.schema_version, create))
        }
    }

    /// Remote token of a collection.
    pub fn remote_token(&self, name: &str) -> Option<&VersionToken> {
        self.remote.get(name)
    }

    /// Whether a present collection is already at the remote token.
    pub fn is_up_to_date(&self, name: &str) -> bool {
        self.local.get(name) == self.remote.get(name)
    }
}

/// What happened to one collection during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CollectionOutcome {
    /// Local token already matched the remote one
    UpToDate,
    /// Newly created and loaded from a full fetch
    Populated { records: usize, version: VersionToken },
    /// Existed without a token and was reloaded from a full fetch
    Refreshed { records: usize, version: VersionToken },
    /// Brought forward by replaying its change log
    Updated { applied: usize, version: VersionToken },
    /// Left at its previous token
    Failed { error: Error },
}

impl CollectionOutcome {
    /// Whether the collection ended the pass at the remote token.
    pub fn is_success(&self) -> bool {
        !matches!(self, CollectionOutcome::Failed { .. })
    }

    /// Whether the pass wrote to the collection.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            CollectionOutcome::Populated { .. }
                | CollectionOutcome::Refreshed { .. }
                | CollectionOutcome::Updated { .. }
        )
    }
}

/// Result of one successful pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Remote version map observed by the pass
    pub remote_state: CollectionVersionMap,
    /// Local schema version after the pass
    pub schema_version: SchemaVersion,
    /// Collections created by the pass's schema upgrade
    pub created: Vec<CollectionName>,
    /// Outcome per remote collection
    pub collections: BTreeMap<CollectionName, CollectionOutcome>,
}

impl ReconcileReport {
    fn new(remote_state: CollectionVersionMap, schema_version: SchemaVersion) -> Self {
        Self {
            remote_state,
            schema_version,
            created: Vec::new(),
            collections: BTreeMap::new(),
        }
    }

    /// Outcome of a collection.
    pub fn outcome(&self, name: &str) -> Option<&CollectionOutcome> {
        self.collections.get(name)
    }

    /// Collections that ended at the remote token.
    pub fn succeeded(&self) -> impl Iterator<Item = &CollectionName> {
        self.collections
            .iter()
            .filter(|(_, outcome)| outcome.is_success())
            .map(|(name, _)| name)
    }

    /// Collections that failed, with their errors.
    pub fn failed(&self) -> impl Iterator<Item = (&CollectionName, &Error)> {
        self.collections
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                CollectionOutcome::Failed { error } => Some((name, error)),
                _ => None,
            })
    }

    /// Whether every collection reached the remote token.
    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Number of collections whose data changed.
    pub fn changed(&self) -> usize {
        self.collections
            .values()
            .filter(|outcome| outcome.is_change())
            .count()
    }

    fn record(&mut self, name: &str, outcome: Result<CollectionOutcome>) {
        let outcome = outcome.unwrap_or_else(|error| {
            tracing::warn!(collection = %name, %error, "collection not synced");
            CollectionOutcome::Failed { error }
        });
        self.collections.insert(name.to_string(), outcome);
    }
}

/// How a present, stale collection gets brought forward.
#[derive(Debug, Clone)]
struct StalePlan {
    name: CollectionName,
    key_path: String,
    /// Local token to replay from; `None` reloads the whole collection
    since: Option<VersionToken>,
    version: VersionToken,
}

enum Fetched {
    Log(Vec<UpdateOperation>),
    Full(Vec<Record>),
}

/// Mirrors remote collections into a local store.
///
/// The engine owns its store connection; `reconcile` takes `&mut self`, so
/// only one pass can run against a store at a time.
pub struct ReconciliationEngine<S, R> {
    store: S,
    remote: R,
    key_path: String,
    phase: Phase,
}

impl<S: KeyValueStore, R: RemoteState> ReconciliationEngine<S, R> {
    /// Create an engine keying new collections by `_id`.
    pub fn new(store: S, remote: R) -> Self {
        Self {
            store,
            remote,
            key_path: DEFAULT_KEY_PATH.to_string(),
            phase: Phase::Idle,
        }
    }

    /// Key path used for collections this engine creates.
    pub fn with_key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = key_path.into();
        self
    }

    /// Phase of the current or last pass.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Borrow the local store, e.g. to read stale data while offline.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Borrow the remote.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Give back the store and remote.
    pub fn into_parts(self) -> (S, R) {
        (self.store, self.remote)
    }

    /// Read the local version map.
    pub async fn local_state(&self) -> Result<CollectionVersionMap> {
        let schema = self.store.schema().await?;
        self.read_local_state(&schema).await
    }

    /// Run one reconciliation pass.
    ///
    /// Returns [`Error::RemoteUnreachable`] without touching the store when
    /// the remote state cannot be fetched, and [`Error::SchemaUpgradeFailed`]
    /// when the missing collections cannot be created. Per-collection
    /// failures are reported in the [`ReconcileReport`].
    pub async fn reconcile(&mut self) -> Result<ReconcileReport> {
        match self.run_pass().await {
            Ok(report) => {
                self.enter(Phase::Idle);
                tracing::info!(
                    changed = report.changed(),
                    complete = report.is_complete(),
                    "reconciliation pass finished"
                );
                Ok(report)
            }
            Err(err) => {
                let phase = if err.is_offline() {
                    Phase::Offline
                } else {
                    Phase::Failed
                };
                tracing::warn!(error = %err, %phase, "reconciliation pass aborted");
                self.enter(phase);
                Err(err)
            }
        }
    }

    async fn run_pass(&mut self) -> Result<ReconcileReport> {
        let schema = self.store.schema().await?;
        let local = self.read_local_state(&schema).await?;

        self.enter(Phase::FetchingRemoteState);
        let remote = self.remote.fetch_state().await.map_err(|err| match err {
            Error::RemoteUnreachable(_) => err,
            other => Error::RemoteUnreachable(other.to_string()),
        })?;

        self.enter(Phase::Diffing);
        let info = ReconciliationInfo::diff(local, remote, &schema);
        tracing::debug!(
            present = info.present.len(),
            missing = info.missing.len(),
            rejected = info.rejected.len(),
            "diffed local and remote state"
        );

        let mut report = ReconcileReport::new(info.remote.clone(), schema.version);
        for (name, err) in &info.rejected {
            report.record(name, Err(err.clone()));
        }

        if let Some(upgrade) = info.upgrade(&self.key_path) {
            self.enter(Phase::SchemaUpgrade);
            self.store
                .upgrade(&upgrade)
                .await
                .map_err(|err| match err {
                    Error::SchemaUpgradeFailed { .. } => err,
                    other => Error::SchemaUpgradeFailed {
                        target: upgrade.to,
                        reason: other.to_string(),
                    },
                })?;
            tracing::info!(
                version = upgrade.to,
                created = upgrade.create.len(),
                "upgraded local schema"
            );
            report.schema_version = upgrade.to;
            report.created = info.missing.clone();
        }

        self.populate_missing(&info, &mut report).await;
        self.update_stale(&info, &schema, &mut report).await;

        Ok(report)
    }

    async fn read_local_state(&self, schema: &StoreSchema) -> Result<CollectionVersionMap> {
        if !schema.contains(META_COLLECTION) {
            return Ok(CollectionVersionMap::new());
        }
        let state = self.store.get(META_COLLECTION, STATE_KEY).await?;
        Ok(state
            .map(|record| CollectionVersionMap::from_meta_record(&record))
            .unwrap_or_default())
    }

    async fn populate_missing(&mut self, info: &ReconciliationInfo, report: &mut ReconcileReport) {
        if info.missing.is_empty() {
            return;
        }
        self.enter(Phase::PopulatingMissing);

        let remote = &self.remote;
        let fetched = join_all(
            info.missing
                .iter()
                .map(|name| remote.fetch_collection(name)),
        )
        .await;

        for (name, records) in info.missing.iter().zip(fetched) {
            let Some(version) = info.remote_token(name).cloned() else {
                continue;
            };
            let outcome = match records {
                Ok(records) => {
                    let count = records.len();
                    let writes = records.into_iter().map(StoreWrite::Add).collect();
                    self.commit(name, writes, &version)
                        .await
                        .map(|()| CollectionOutcome::Populated {
                            records: count,
                            version: version.clone(),
                        })
                }
                Err(err) => Err(fetch_failed(name, err)),
            };
            report.record(name, outcome);
        }
    }

    async fn update_stale(
        &mut self,
        info: &ReconciliationInfo,
        schema: &StoreSchema,
        report: &mut ReconcileReport,
    ) {
        let mut plans = Vec::new();
        for name in &info.present {
            if info.is_up_to_date(name) {
                report.record(name, Ok(CollectionOutcome::UpToDate));
                continue;
            }
            let plan = schema.key_path(name).and_then(|key_path| {
                let version = info
                    .remote_token(name)
                    .ok_or_else(|| Error::CollectionNotFound(name.clone()))?;
                Ok(StalePlan {
                    name: name.clone(),
                    key_path: key_path.to_string(),
                    since: info.local.get(name).cloned(),
                    version: version.clone(),
                })
            });
            match plan {
                Ok(plan) => plans.push(plan),
                Err(err) => report.record(name, Err(err)),
            }
        }
        if plans.is_empty() {
            return;
        }
        self.enter(Phase::UpdatingStale);

        let remote = &self.remote;
        let fetched = join_all(plans.iter().map(|plan| async move {
            match &plan.since {
                Some(since) => remote.fetch_updates(&plan.name, since).await.map(Fetched::Log),
                None => remote.fetch_collection(&plan.name).await.map(Fetched::Full),
            }
        }))
        .await;

        for (plan, fetched) in plans.into_iter().zip(fetched) {
            let outcome = match fetched {
                Ok(Fetched::Log(ops)) => self.apply_log(&plan, ops).await,
                Ok(Fetched::Full(records)) => self.refresh(&plan, records).await,
                Err(err) => Err(fetch_failed(&plan.name, err)),
            };
            report.record(&plan.name, outcome);
        }
    }

    async fn apply_log(
        &mut self,
        plan: &StalePlan,
        ops: Vec<UpdateOperation>,
    ) -> Result<CollectionOutcome> {
        let applied = ops.len();
        let writes = ops
            .into_iter()
            .map(|op| op.into_write(&plan.key_path))
            .collect::<Result<Vec<_>>>()?;

        self.commit(&plan.name, writes, &plan.version).await?;
        Ok(CollectionOutcome::Updated {
            applied,
            version: plan.version.clone(),
        })
    }

    async fn refresh(
        &mut self,
        plan: &StalePlan,
        records: Vec<Record>,
    ) -> Result<CollectionOutcome> {
        let count = records.len();
        let writes = std::iter::once(StoreWrite::Clear)
            .chain(records.into_iter().map(StoreWrite::Put))
            .collect();

        self.commit(&plan.name, writes, &plan.version).await?;
        Ok(CollectionOutcome::Refreshed {
            records: count,
            version: plan.version.clone(),
        })
    }

    /// Commit one collection's writes and its token in one transaction.
    async fn commit(
        &mut self,
        name: &str,
        writes: Vec<StoreWrite>,
        version: &VersionToken,
    ) -> Result<()> {
        let count = writes.len();
        let resume = self.phase;
        self.enter(Phase::PersistingMeta);

        let result = self
            .commit_with_token(name, writes, version)
            .await
            .map_err(|err| err.in_transaction(name));
        self.enter(resume);
        result?;

        tracing::info!(collection = %name, writes = count, "collection transaction committed");
        tracing::debug!(collection = %name, %version, "version token advanced");
        Ok(())
    }

    async fn commit_with_token(
        &mut self,
        name: &str,
        writes: Vec<StoreWrite>,
        version: &VersionToken,
    ) -> Result<()> {
        let existing = self.store.get(META_COLLECTION, STATE_KEY).await?;
        let merged = CollectionVersionMap::new()
            .with(name, version.clone())
            .merged_into(existing.as_ref());

        self.store
            .write_many(vec![
                (name.to_string(), writes),
                (META_COLLECTION.to_string(), vec![StoreWrite::Put(merged)]),
            ])
            .await
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!(from = %self.phase, to = %phase, "reconciliation phase");
            self.phase = phase;
        }
    }
}

fn fetch_failed(collection: &str, err: Error) -> Error {
    Error::FetchFailed {
        collection: collection.to_string(),
        reason: err.to_string(),
    }
}
