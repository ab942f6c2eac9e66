//! Backing table stores
//!
//! [`TableBackend`] is the storage contract the vector store is built on: a
//! catalogue of collections with their dimensions, and per-collection rows of
//! `(rowid, vector)`. It needs nothing beyond create, insert and scan, so any
//! table-structured or key-value store can implement it.
//!
//! - [`SqliteBackend`]: persistent, via `sqlx`
//! - [`MemoryBackend`]: process-local maps, for tests and throwaway stores

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::Result;
use crate::types::{CollectionInfo, EmbeddingRecord, RowId};
use async_trait::async_trait;

/// Callback handed each stored row during a [`TableBackend::scan`].
pub type RowVisitor<'a> = dyn FnMut(RowId, &[f32]) -> Result<()> + Send + 'a;

#[async_trait]
pub trait TableBackend: Send + Sync {
    /// Create tables if they are missing. Idempotent.
    async fn ensure_schema(&self) -> Result<()>;

    /// Declared dimension of `name`, or `None` if no such collection exists.
    async fn collection_dim(&self, name: &str) -> Result<Option<usize>>;

    /// Record `name` with dimension `dim`. Does nothing if `name` already exists.
    async fn create_collection(&self, name: &str, dim: usize) -> Result<()>;

    /// Insert every row or none of them.
    ///
    /// If any rowid already exists, or appears twice in `rows`, nothing is
    /// written and [`VectorError::DuplicateKey`](crate::VectorError::DuplicateKey)
    /// names the first offender.
    async fn insert_rows(&self, collection: &str, rows: &[EmbeddingRecord]) -> Result<()>;

    /// Insert or overwrite every row, atomically.
    async fn upsert_rows(&self, collection: &str, rows: &[EmbeddingRecord]) -> Result<()>;

    async fn get_row(&self, collection: &str, rowid: RowId) -> Result<Option<Vec<f32>>>;

    async fn count_rows(&self, collection: &str) -> Result<u64>;

    /// Visit every row of `collection` in ascending rowid order.
    async fn scan(&self, collection: &str, visit: &mut RowVisitor<'_>) -> Result<()>;

    /// All collections, ordered by name.
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;
}
