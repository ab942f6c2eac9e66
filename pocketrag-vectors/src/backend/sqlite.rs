//! SQLite backend
//!
//! ```sql
//! collections (name TEXT PRIMARY KEY, dim INTEGER, created_at TIMESTAMP)
//! embeddings  (collection TEXT, row_id INTEGER, vector BLOB,
//!              PRIMARY KEY (collection, row_id))
//! ```
//!
//! Vectors are stored as raw `f32` blobs in native byte order. Every value
//! reaches SQLite through parameter binding; no statement text is ever built
//! from data.

use super::{RowVisitor, TableBackend};
use crate::error::{Result, VectorError};
use crate::types::{CollectionInfo, EmbeddingRecord, RowId};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;
        tracing::debug!(path = %path.display(), "opened vector database");
        Self::with_pool(pool).await
    }

    /// A private in-memory database, for tests.
    pub async fn open_memory() -> Result<Self> {
        // Every connection to :memory: sees its own database, so pin one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
            .await?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool, creating the tables if needed.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let backend = Self { pool };
        backend.ensure_schema().await?;
        Ok(backend)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn require(&self, collection: &str) -> Result<()> {
        match self.collection_dim(collection).await? {
            Some(_) => Ok(()),
            None => Err(VectorError::UnknownCollection {
                name: collection.to_string(),
            }),
        }
    }
}

fn encode(vector: &[f32]) -> &[u8] {
    bytemuck::cast_slice(vector)
}

fn decode(collection: &str, rowid: RowId, bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % size_of::<f32>() != 0 {
        return Err(VectorError::Corrupt {
            collection: collection.to_string(),
            rowid,
            message: format!("blob of {} bytes is not a whole number of f32s", bytes.len()),
        });
    }
    // Copies into a fresh Vec, so blob alignment does not matter
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

#[async_trait]
impl TableBackend for SqliteBackend {
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dim INTEGER NOT NULL CHECK (dim > 0),
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
                row_id INTEGER NOT NULL,
                vector BLOB NOT NULL,
                PRIMARY KEY (collection, row_id)
            ) WITHOUT ROWID
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn collection_dim(&self, name: &str) -> Result<Option<usize>> {
        let dim = sqlx::query_scalar::<_, i64>("SELECT dim FROM collections WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(dim.map(|d| d as usize))
    }

    async fn create_collection(&self, name: &str, dim: usize) -> Result<()> {
        sqlx::query("INSERT INTO collections (name, dim) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .bind(dim as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_rows(&self, collection: &str, rows: &[EmbeddingRecord]) -> Result<()> {
        self.require(collection).await?;
        let mut tx = self.pool.begin().await?;

        for row in rows {
            let inserted = sqlx::query(
                r#"
                INSERT INTO embeddings (collection, row_id, vector)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(collection, row_id) DO NOTHING
                "#,
            )
            .bind(collection)
            .bind(row.rowid)
            .bind(encode(&row.vector))
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if inserted == 0 {
                tx.rollback().await?;
                return Err(VectorError::DuplicateKey {
                    collection: collection.to_string(),
                    rowid: row.rowid,
                });
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_rows(&self, collection: &str, rows: &[EmbeddingRecord]) -> Result<()> {
        self.require(collection).await?;
        let mut tx = self.pool.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO embeddings (collection, row_id, vector)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(collection, row_id) DO UPDATE SET vector = excluded.vector
                "#,
            )
            .bind(collection)
            .bind(row.rowid)
            .bind(encode(&row.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_row(&self, collection: &str, rowid: RowId) -> Result<Option<Vec<f32>>> {
        self.require(collection).await?;
        let blob = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT vector FROM embeddings WHERE collection = ?1 AND row_id = ?2",
        )
        .bind(collection)
        .bind(rowid)
        .fetch_optional(&self.pool)
        .await?;
        blob.map(|bytes| decode(collection, rowid, &bytes)).transpose()
    }

    async fn count_rows(&self, collection: &str) -> Result<u64> {
        self.require(collection).await?;
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM embeddings WHERE collection = ?1",
        )
        .bind(collection)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn scan(&self, collection: &str, visit: &mut RowVisitor<'_>) -> Result<()> {
        self.require(collection).await?;
        let mut rows = sqlx::query(
            "SELECT row_id, vector FROM embeddings WHERE collection = ?1 ORDER BY row_id",
        )
        .bind(collection)
        .fetch(&self.pool);

        while let Some(row) = rows.try_next().await? {
            let rowid: i64 = row.try_get("row_id")?;
            let bytes: &[u8] = row.try_get("vector")?;
            let vector = decode(collection, rowid, bytes)?;
            visit(rowid, &vector)?;
        }
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let rows = sqlx::query("SELECT name, dim FROM collections ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(CollectionInfo {
                    name: row.try_get("name")?,
                    dim: row.try_get::<i64, _>("dim")? as usize,
                })
            })
            .collect()
    }
}
