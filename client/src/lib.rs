//! # magsync client
//!
//! Durable storage and transport for the magsync engine: a SQLite-backed
//! [`SqliteStore`], an HTTP [`HttpRemote`], and environment configuration.
//!
//! [`sync_once`] wires them together for a single reconciliation pass.
//! [`sync_store`] does the same for a store opened by the caller.

pub mod config;
pub mod db;
pub mod error;
pub mod http;

pub use config::{Config, ConfigError};
pub use db::{create_pool, run_migrations, Pool, SqliteStore};
pub use error::{AppError, Result};
pub use http::HttpRemote;

use magsync_engine::{ReconcileReport, ReconciliationEngine};

/// Open the local mirror named by `config`, bringing its tables up to date.
pub async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = create_pool(&config.database_url, 5).await?;

    tracing::info!("Running database migrations...");
    run_migrations(&pool).await?;

    Ok(SqliteStore::new(pool))
}

/// Run one reconciliation pass against the configured site.
pub async fn sync_once(config: &Config) -> Result<ReconcileReport> {
    let remote = HttpRemote::from_config(config)?;
    let store = open_store(config).await?;

    sync_store(store, remote, &config.key_path).await
}

/// Run one pass over `store`, closing its pool afterwards.
pub async fn sync_store(
    store: SqliteStore,
    remote: HttpRemote,
    key_path: &str,
) -> Result<ReconcileReport> {
    let mut engine = ReconciliationEngine::new(store, remote).with_key_path(key_path);
    let result = engine.reconcile().await;

    engine.store().pool().close().await;
    Ok(result?)
}
