use super::{RowVisitor, TableBackend};
use crate::error::{Result, VectorError};
use crate::types::{CollectionInfo, EmbeddingRecord, RowId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Table {
    dim: usize,
    rows: BTreeMap<RowId, Vec<f32>>,
}

/// In-process backend. Contents vanish with the value.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unknown(name: &str) -> VectorError {
    VectorError::UnknownCollection {
        name: name.to_string(),
    }
}

#[async_trait]
impl TableBackend for MemoryBackend {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn collection_dim(&self, name: &str) -> Result<Option<usize>> {
        Ok(self.tables.read().await.get(name).map(|t| t.dim))
    }

    async fn create_collection(&self, name: &str, dim: usize) -> Result<()> {
        self.tables
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Table {
                dim,
                rows: BTreeMap::new(),
            });
        Ok(())
    }

    async fn insert_rows(&self, collection: &str, rows: &[EmbeddingRecord]) -> Result<()> {
        let mut tables = self.tables.write().await;
        let table = tables.get_mut(collection).ok_or_else(|| unknown(collection))?;

        let mut seen = HashSet::with_capacity(rows.len());
        for row in rows {
            if table.rows.contains_key(&row.rowid) || !seen.insert(row.rowid) {
                return Err(VectorError::DuplicateKey {
                    collection: collection.to_string(),
                    rowid: row.rowid,
                });
            }
        }
        for row in rows {
            table.rows.insert(row.rowid, row.vector.clone());
        }
        Ok(())
    }

    async fn upsert_rows(&self, collection: &str, rows: &[EmbeddingRecord]) -> Result<()> {
        let mut tables = self.tables.write().await;
        let table = tables.get_mut(collection).ok_or_else(|| unknown(collection))?;
        for row in rows {
            table.rows.insert(row.rowid, row.vector.clone());
        }
        Ok(())
    }

    async fn get_row(&self, collection: &str, rowid: RowId) -> Result<Option<Vec<f32>>> {
        let tables = self.tables.read().await;
        let table = tables.get(collection).ok_or_else(|| unknown(collection))?;
        Ok(table.rows.get(&rowid).cloned())
    }

    async fn count_rows(&self, collection: &str) -> Result<u64> {
        let tables = self.tables.read().await;
        let table = tables.get(collection).ok_or_else(|| unknown(collection))?;
        Ok(table.rows.len() as u64)
    }

    async fn scan(&self, collection: &str, visit: &mut RowVisitor<'_>) -> Result<()> {
        let tables = self.tables.read().await;
        let table = tables.get(collection).ok_or_else(|| unknown(collection))?;
        for (rowid, vector) in &table.rows {
            visit(*rowid, vector)?;
        }
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        Ok(self
            .tables
            .read()
            .await
            .iter()
            .map(|(name, table)| CollectionInfo {
                name: name.clone(),
                dim: table.dim,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_inside_batch_writes_nothing() {
        let backend = MemoryBackend::new();
        backend.create_collection("c", 1).await.unwrap();
        let rows = vec![
            EmbeddingRecord::new(1, vec![1.0]),
            EmbeddingRecord::new(2, vec![2.0]),
            EmbeddingRecord::new(1, vec![3.0]),
        ];
        let err = backend.insert_rows("c", &rows).await.unwrap_err();
        assert!(matches!(err, VectorError::DuplicateKey { rowid: 1, .. }));
        assert_eq!(backend.count_rows("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_collection_keeps_first_dimension() {
        let backend = MemoryBackend::new();
        backend.create_collection("c", 3).await.unwrap();
        backend.create_collection("c", 5).await.unwrap();
        assert_eq!(backend.collection_dim("c").await.unwrap(), Some(3));
    }
}
