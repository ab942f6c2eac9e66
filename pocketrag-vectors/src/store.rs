//! The vector store
//!
//! [`VectorStore`] validates every request against the collection's declared
//! dimension before touching the backend, serialises writers per collection,
//! and answers k-nearest-neighbour queries with an exact linear scan.

use crate::backend::{SqliteBackend, TableBackend};
use crate::error::{Result, VectorError};
use crate::search::TopK;
use crate::types::{
    CollectionInfo, EmbeddingRecord, Metric, RowId, SimilarityResult, validate_collection_name,
    validate_vector,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

/// Fixed-dimension vector collections with exact nearest-neighbour search.
///
/// Writers to one collection hold that collection's write lock; queries hold
/// the read lock. Different collections never contend.
pub struct VectorStore<B = SqliteBackend> {
    backend: B,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl<B: TableBackend> VectorStore<B> {
    /// Wrap `backend`, creating its tables if needed.
    pub async fn new(backend: B) -> Result<Self> {
        backend.ensure_schema().await?;
        Ok(Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Lock for `name`, which the caller has already validated.
    fn lock_entry(&self, name: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Lock for a collection that exists in the backend.
    ///
    /// Invalid or unknown names are rejected before an entry is created.
    async fn collection_lock(&self, name: &str) -> Result<Arc<RwLock<()>>> {
        validate_collection_name(name)?;
        let known = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        if let Some(lock) = known {
            return Ok(lock);
        }
        if self.backend.collection_dim(name).await?.is_none() {
            return Err(VectorError::UnknownCollection {
                name: name.to_string(),
            });
        }
        Ok(self.lock_entry(name))
    }

    /// Declare `name` with vectors of `dim` components.
    ///
    /// Declaring an existing collection again with the same dimension is a
    /// no-op; a different dimension is a [`VectorError::DimensionMismatch`].
    pub async fn create_collection(&self, name: &str, dim: usize) -> Result<CollectionInfo> {
        validate_collection_name(name)?;
        if dim == 0 {
            return Err(VectorError::InvalidDimension { dim });
        }

        let lock = self.lock_entry(name);
        let _guard = lock.write().await;
        match self.backend.collection_dim(name).await? {
            Some(existing) if existing == dim => {
                tracing::debug!(collection = %name, dim, "collection already exists");
            }
            Some(existing) => {
                return Err(VectorError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: existing,
                    actual: dim,
                });
            }
            None => {
                self.backend.create_collection(name, dim).await?;
                tracing::info!(collection = %name, dim, "created collection");
            }
        }
        Ok(CollectionInfo {
            name: name.to_string(),
            dim,
        })
    }

    /// Declared dimension of `collection`.
    pub async fn dimension(&self, collection: &str) -> Result<usize> {
        validate_collection_name(collection)?;
        self.backend
            .collection_dim(collection)
            .await?
            .ok_or_else(|| VectorError::UnknownCollection {
                name: collection.to_string(),
            })
    }

    /// Insert one vector. Fails with [`VectorError::DuplicateKey`] if `rowid`
    /// is taken; use [`upsert`](Self::upsert) to overwrite.
    pub async fn insert(&self, collection: &str, rowid: RowId, vector: Vec<f32>) -> Result<()> {
        self.insert_many(collection, &[EmbeddingRecord::new(rowid, vector)])
            .await
    }

    /// Insert a batch, all or nothing.
    pub async fn insert_many(&self, collection: &str, records: &[EmbeddingRecord]) -> Result<()> {
        let lock = self.collection_lock(collection).await?;
        let _guard = lock.write().await;
        let dim = self.dimension(collection).await?;
        check_records(collection, dim, records)?;

        self.backend.insert_rows(collection, records).await?;
        tracing::debug!(collection = %collection, rows = records.len(), "inserted vectors");
        Ok(())
    }

    /// Insert or overwrite one vector.
    pub async fn upsert(&self, collection: &str, rowid: RowId, vector: Vec<f32>) -> Result<()> {
        let records = [EmbeddingRecord::new(rowid, vector)];
        let lock = self.collection_lock(collection).await?;
        let _guard = lock.write().await;
        let dim = self.dimension(collection).await?;
        check_records(collection, dim, &records)?;

        self.backend.upsert_rows(collection, &records).await?;
        tracing::debug!(collection = %collection, rowid, "upserted vector");
        Ok(())
    }

    /// The `k` stored vectors nearest to `query` under `metric`.
    ///
    /// Results are ascending by distance with ties broken by ascending rowid,
    /// and never more than `k` long.
    pub async fn query(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<Vec<SimilarityResult>> {
        let lock = self.collection_lock(collection).await?;
        let _guard = lock.read().await;
        let dim = self.dimension(collection).await?;
        check_vector(collection, dim, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut top = TopK::new(k);
        let mut scanned = 0usize;
        self.backend
            .scan(collection, &mut |rowid, vector| {
                if vector.len() != dim {
                    return Err(VectorError::Corrupt {
                        collection: collection.to_string(),
                        rowid,
                        message: format!("stored vector has {} components, expected {dim}", vector.len()),
                    });
                }
                top.offer(rowid, metric.distance(query, vector));
                scanned += 1;
                Ok(())
            })
            .await?;

        let results = top.into_sorted();
        tracing::debug!(
            collection = %collection,
            %metric,
            k,
            scanned,
            returned = results.len(),
            "answered query"
        );
        Ok(results)
    }

    pub async fn get(&self, collection: &str, rowid: RowId) -> Result<Option<Vec<f32>>> {
        let lock = self.collection_lock(collection).await?;
        let _guard = lock.read().await;
        self.dimension(collection).await?;
        self.backend.get_row(collection, rowid).await
    }

    /// Number of vectors in `collection`.
    pub async fn len(&self, collection: &str) -> Result<u64> {
        let lock = self.collection_lock(collection).await?;
        let _guard = lock.read().await;
        self.dimension(collection).await?;
        self.backend.count_rows(collection).await
    }

    pub async fn collections(&self) -> Result<Vec<CollectionInfo>> {
        self.backend.list_collections().await
    }
}

fn check_vector(collection: &str, dim: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != dim {
        return Err(VectorError::DimensionMismatch {
            collection: collection.to_string(),
            expected: dim,
            actual: vector.len(),
        });
    }
    validate_vector(vector)
}

fn check_records(collection: &str, dim: usize, records: &[EmbeddingRecord]) -> Result<()> {
    records
        .iter()
        .try_for_each(|record| check_vector(collection, dim, &record.vector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use tracing_test::traced_test;

    async fn store_with(dim: usize) -> VectorStore<MemoryBackend> {
        let store = VectorStore::new(MemoryBackend::new()).await.unwrap();
        store.create_collection("docs", dim).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_collection_is_idempotent_for_same_dim() {
        let store = store_with(4).await;
        assert!(store.create_collection("docs", 4).await.is_ok());
        assert!(matches!(
            store.create_collection("docs", 5).await,
            Err(VectorError::DimensionMismatch {
                expected: 4,
                actual: 5,
                ..
            })
        ));
        assert_eq!(store.dimension("docs").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_create_collection_rejects_zero_dim_and_bad_names() {
        let store = VectorStore::new(MemoryBackend::new()).await.unwrap();
        assert!(matches!(
            store.create_collection("docs", 0).await,
            Err(VectorError::InvalidDimension { dim: 0 })
        ));
        assert!(matches!(
            store.create_collection("docs; DROP TABLE x", 3).await,
            Err(VectorError::InvalidCollectionName { .. })
        ));
        assert!(store.collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_length_leaves_collection_unchanged() {
        let store = store_with(3).await;
        store.insert("docs", 1, vec![1.0, 2.0, 3.0]).await.unwrap();

        let err = store.insert("docs", 2, vec![1.0, 2.0]).await.unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch {
                expected: 3,
                actual: 2,
                ..
            }
        ));
        assert_eq!(store.len("docs").await.unwrap(), 1);
        assert_eq!(store.get("docs", 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_finite_vector_rejected() {
        let store = store_with(2).await;
        let err = store
            .insert("docs", 1, vec![f32::NAN, 0.0])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::InvalidVector { index: 0, .. }));
        assert!(
            store
                .query("docs", &[0.0, f32::INFINITY], 1, Metric::L2)
                .await
                .is_err()
        );
        assert_eq!(store.len("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_with_one_bad_vector_writes_nothing() {
        let store = store_with(2).await;
        let batch = vec![
            EmbeddingRecord::new(1, vec![0.0, 1.0]),
            EmbeddingRecord::new(2, vec![0.0, f32::NAN]),
        ];
        assert!(store.insert_many("docs", &batch).await.is_err());
        assert_eq!(store.len("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_and_upsert() {
        let store = store_with(1).await;
        store.insert("docs", 7, vec![1.0]).await.unwrap();
        assert!(matches!(
            store.insert("docs", 7, vec![2.0]).await,
            Err(VectorError::DuplicateKey { rowid: 7, .. })
        ));
        assert_eq!(store.get("docs", 7).await.unwrap(), Some(vec![1.0]));

        store.upsert("docs", 7, vec![2.0]).await.unwrap();
        assert_eq!(store.get("docs", 7).await.unwrap(), Some(vec![2.0]));
        assert_eq!(store.len("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let store = VectorStore::new(MemoryBackend::new()).await.unwrap();
        assert!(matches!(
            store.insert("ghost", 1, vec![1.0]).await,
            Err(VectorError::UnknownCollection { .. })
        ));
        assert!(matches!(
            store.query("ghost", &[1.0], 1, Metric::L2).await,
            Err(VectorError::UnknownCollection { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_names_do_not_grow_lock_table() {
        let store = store_with(2).await;
        assert!(store.insert("missing", 1, vec![0.0, 1.0]).await.is_err());
        assert!(store.query("bad name!", &[0.0, 1.0], 1, Metric::L2).await.is_err());
        assert!(store.len("missing").await.is_err());
        assert!(store.get("also-missing", 1).await.is_err());

        store.insert("docs", 1, vec![0.0, 1.0]).await.unwrap();
        let tracked: Vec<String> = store
            .locks
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(tracked, vec!["docs".to_string()]);
    }

    #[tokio::test]
    async fn test_k_larger_than_collection_and_zero_k() {
        let store = store_with(1).await;
        store.insert("docs", 1, vec![1.0]).await.unwrap();
        store.insert("docs", 2, vec![3.0]).await.unwrap();

        let all = store.query("docs", &[0.0], 10, Metric::L2).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(store.query("docs", &[0.0], 0, Metric::L2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cosine_is_explicit() {
        let store = store_with(2).await;
        store.insert("docs", 1, vec![10.0, 0.0]).await.unwrap();
        store.insert("docs", 2, vec![0.9, 0.1]).await.unwrap();

        // L2 prefers the nearby point, cosine the one pointing the same way
        let l2 = store.query("docs", &[1.0, 0.0], 1, Metric::L2).await.unwrap();
        assert_eq!(l2[0].rowid, 2);
        let cos = store
            .query("docs", &[1.0, 0.0], 1, Metric::Cosine)
            .await
            .unwrap();
        assert_eq!(cos[0].rowid, 1);
        assert_eq!(cos[0].distance, 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_interleave() {
        let store = Arc::new(store_with(2).await);
        let mut tasks = Vec::new();
        for writer in 0..8i64 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let batch: Vec<_> = (0..25)
                    .map(|i| EmbeddingRecord::new(writer * 100 + i, vec![writer as f32, i as f32]))
                    .collect();
                store.insert_many("docs", &batch).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.len("docs").await.unwrap(), 200);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_create_collection_is_logged() {
        let _store = store_with(3).await;
        assert!(logs_contain("created collection"));
    }
}
