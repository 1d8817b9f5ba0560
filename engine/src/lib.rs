//! # magsync engine
//!
//! Keeps a local mirror of server-tracked record collections up to date.
//!
//! The server exposes, per application, a map from collection name to a
//! version token. This crate compares that map with the one stored locally,
//! creates collections that do not exist yet, loads them in full, and
//! replays each stale collection's change log since its local token.
//!
//! ## Design Principles
//!
//! - **No IO of its own**: storage and transport sit behind the
//!   [`KeyValueStore`] and [`RemoteState`] traits
//! - **Per-collection commits**: a collection's data and its token commit
//!   in one transaction
//! - **Offline safe**: if the remote state cannot be fetched, nothing local
//!   is written
//! - **Partial failure isolation**: one broken collection does not stop
//!   the others
//!
//! ## Core Concepts
//!
//! ### Version maps
//!
//! [`CollectionVersionMap`] maps collection names to opaque version tokens.
//! Locally it is kept in the reserved `_meta` collection under the `state`
//! key and only ever updated by merge.
//!
//! ### Operations
//!
//! A stale collection is brought forward by an ordered list of
//! [`UpdateOperation`]s:
//! - `create` - insert a record that must not exist yet
//! - `update` - replace a record by identifier (upsert)
//! - `delete` - remove a record by identifier
//!
//! ### Reconciliation
//!
//! [`ReconciliationEngine::reconcile`] runs one pass and returns a
//! [`ReconcileReport`] with a [`CollectionOutcome`] per collection.
//!
//! ## Quick Start
//!
//! ```rust
//! use magsync_engine::{
//!     CollectionVersionMap, MemoryStore, ReconciliationEngine, Record, RemoteState,
//!     Result, UpdateOperation,
//! };
//! use serde_json::json;
//!
//! struct Server;
//!
//! impl RemoteState for Server {
//!     async fn fetch_state(&self) -> Result<CollectionVersionMap> {
//!         Ok(CollectionVersionMap::new().with("author", "v3"))
//!     }
//!
//!     async fn fetch_collection(&self, _collection: &str) -> Result<Vec<Record>> {
//!         Ok(vec![Record::new(json!({"_id": "a1", "name": "Homer"}))])
//!     }
//!
//!     async fn fetch_updates(&self, _collection: &str, _since: &str) -> Result<Vec<UpdateOperation>> {
//!         Ok(vec![])
//!     }
//! }
//!
//! let mut engine = ReconciliationEngine::new(MemoryStore::new(), Server);
//! let report = futures::executor::block_on(engine.reconcile()).unwrap();
//!
//! assert!(report.is_complete());
//! assert_eq!(engine.store().collection("author").unwrap().len(), 1);
//! ```

pub mod error;
pub mod operation;
pub mod reconcile;
pub mod record;
pub mod remote;
pub mod schema;
pub mod store;
pub mod version;

// Re-export main types at crate root
pub use error::{Error, Result};
pub use operation::{OperationKind, UpdateOperation};
pub use reconcile::{
    CollectionOutcome, Phase, ReconcileReport, ReconciliationEngine, ReconciliationInfo,
};
pub use record::{Record, DEFAULT_KEY_PATH};
pub use remote::{CollectionResponse, RemoteState, StateResponse};
pub use schema::{validate_collection_name, CollectionSpec, SchemaUpgrade, StoreSchema};
pub use store::{Collection, KeyValueStore, MemoryStore, StoreWrite};
pub use version::{CollectionVersionMap, META_COLLECTION, META_KEY_PATH, STATE_KEY};

/// Type aliases for clarity
pub type CollectionName = String;
pub type RecordKey = String;
pub type VersionToken = String;
pub type SchemaVersion = u32;
