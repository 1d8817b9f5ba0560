//! SQLite-backed key-value store for the local mirror.

use super::Pool;
use chrono::Utc;
use magsync_engine::{
    CollectionName, Error, KeyValueStore, Record, Result, SchemaUpgrade, SchemaVersion,
    StoreSchema, StoreWrite,
};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::SqliteConnection;

/// [`KeyValueStore`] persisting collections in a SQLite database.
///
/// Every upgrade and write batch runs in one SQL transaction, so a failing
/// operation leaves the database as it was. A multi-collection batch shares
/// that transaction.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    /// Wrap a migrated pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn store_error(err: sqlx::Error) -> Error {
    Error::Store(err.to_string())
}

async fn load_schema(conn: &mut SqliteConnection) -> Result<StoreSchema> {
    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM store_schema WHERE id = 1")
        .fetch_optional(&mut *conn)
        .await
        .map_err(store_error)?;
    let version = SchemaVersion::try_from(version.unwrap_or(0))
        .map_err(|_| Error::Store(format!("corrupt schema version {:?}", version)))?;

    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT name, key_path FROM collections ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .map_err(store_error)?;

    let mut schema = StoreSchema::new(version);
    schema.collections = rows.into_iter().collect();
    Ok(schema)
}

async fn key_path(conn: &mut SqliteConnection, collection: &str) -> Result<String> {
    sqlx::query_scalar("SELECT key_path FROM collections WHERE name = ?")
        .bind(collection)
        .fetch_optional(&mut *conn)
        .await
        .map_err(store_error)?
        .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))
}

async fn apply(
    conn: &mut SqliteConnection,
    collection: &str,
    key_path: &str,
    write: StoreWrite,
) -> Result<()> {
    match write {
        StoreWrite::Add(record) => {
            let key = record.key(key_path)?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO records (collection, key, document, updated_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(collection)
            .bind(&key)
            .bind(Json(record.as_value()))
            .bind(Utc::now())
            .execute(&mut *conn)
            .await;

            if let Err(err) = inserted {
                let conflict = err
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation());
                return Err(if conflict {
                    Error::RecordConflict {
                        collection: collection.to_string(),
                        key,
                    }
                } else {
                    store_error(err)
                });
            }
        }
        StoreWrite::Put(record) => {
            let key = record.key(key_path)?;
            sqlx::query(
                r#"
                INSERT INTO records (collection, key, document, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (collection, key) DO UPDATE SET
                    document = excluded.document,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(collection)
            .bind(&key)
            .bind(Json(record.as_value()))
            .bind(Utc::now())
            .execute(&mut *conn)
            .await
            .map_err(store_error)?;
        }
        StoreWrite::Delete(key) => {
            sqlx::query("DELETE FROM records WHERE collection = ? AND key = ?")
                .bind(collection)
                .bind(&key)
                .execute(&mut *conn)
                .await
                .map_err(store_error)?;
        }
        StoreWrite::Clear => {
            sqlx::query("DELETE FROM records WHERE collection = ?")
                .bind(collection)
                .execute(&mut *conn)
                .await
                .map_err(store_error)?;
        }
    }
    Ok(())
}

impl KeyValueStore for SqliteStore {
    async fn schema(&self) -> Result<StoreSchema> {
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        load_schema(&mut conn).await
    }

    async fn upgrade(&mut self, upgrade: &SchemaUpgrade) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let mut schema = load_schema(&mut tx).await?;
        schema.apply_upgrade(upgrade)?;

        for spec in &upgrade.create {
            sqlx::query("INSERT INTO collections (name, key_path) VALUES (?, ?)")
                .bind(&spec.name)
                .bind(&spec.key_path)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }

        sqlx::query(
            r#"
            INSERT INTO store_schema (id, version) VALUES (1, ?)
            ON CONFLICT (id) DO UPDATE SET version = excluded.version
            "#,
        )
        .bind(i64::from(schema.version))
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        tracing::debug!(version = schema.version, "Local schema upgraded");
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        key_path(&mut conn, collection).await?;

        let document: Option<Json<Value>> =
            sqlx::query_scalar("SELECT document FROM records WHERE collection = ? AND key = ?")
                .bind(collection)
                .bind(key)
                .fetch_optional(&mut *conn)
                .await
                .map_err(store_error)?;

        Ok(document.map(|Json(value)| Record::new(value)))
    }

    async fn all(&self, collection: &str) -> Result<Vec<Record>> {
        let mut conn = self.pool.acquire().await.map_err(store_error)?;
        key_path(&mut conn, collection).await?;

        let documents: Vec<Json<Value>> =
            sqlx::query_scalar("SELECT document FROM records WHERE collection = ? ORDER BY key")
                .bind(collection)
                .fetch_all(&mut *conn)
                .await
                .map_err(store_error)?;

        Ok(documents
            .into_iter()
            .map(|Json(value)| Record::new(value))
            .collect())
    }

    async fn write_many(&mut self, batches: Vec<(CollectionName, Vec<StoreWrite>)>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let mut count = 0;
        for (collection, writes) in batches {
            let key_path = key_path(&mut tx, &collection).await?;
            count += writes.len();
            for write in writes {
                // Dropping the transaction rolls it back
                apply(&mut tx, &collection, &key_path, write).await?;
            }
        }

        tx.commit().await.map_err(store_error)?;
        tracing::trace!(count, "Write batch committed");
        Ok(())
    }
}
