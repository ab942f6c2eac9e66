//! Nearest-neighbour behaviour against both backends.

use pocketrag_vectors::{
    MemoryBackend, Metric, SqliteBackend, TableBackend, VectorError, VectorStore,
};
use proptest::prelude::*;

async fn unit_axes<B: TableBackend>(backend: B) -> VectorStore<B> {
    let store = VectorStore::new(backend).await.unwrap();
    store.create_collection("axes", 3).await.unwrap();
    store.insert("axes", 1, vec![1.0, 0.0, 0.0]).await.unwrap();
    store.insert("axes", 2, vec![0.0, 1.0, 0.0]).await.unwrap();
    store.insert("axes", 3, vec![0.0, 0.0, 1.0]).await.unwrap();
    store
}

async fn check_axes<B: TableBackend>(store: &VectorStore<B>) {
    let hits = store
        .query("axes", &[1.0, 0.0, 0.0], 2, Metric::L2)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].rowid, 1);
    assert_eq!(hits[0].distance, 0.0);
    // Rows 2 and 3 tie at sqrt(2); the lower rowid wins
    assert_eq!(hits[1].rowid, 2);
    assert!((hits[1].distance - 2.0f32.sqrt()).abs() < 1e-6);
}

#[tokio::test]
async fn orthogonal_axes_on_sqlite() {
    let store = unit_axes(SqliteBackend::open_memory().await.unwrap()).await;
    check_axes(&store).await;
}

#[tokio::test]
async fn orthogonal_axes_in_memory() {
    let store = unit_axes(MemoryBackend::new()).await;
    check_axes(&store).await;
}

#[tokio::test]
async fn tie_break_ignores_insertion_order() {
    let store = VectorStore::new(SqliteBackend::open_memory().await.unwrap())
        .await
        .unwrap();
    store.create_collection("axes", 3).await.unwrap();
    store.insert("axes", 30, vec![0.0, 0.0, 1.0]).await.unwrap();
    store.insert("axes", 20, vec![0.0, 1.0, 0.0]).await.unwrap();
    store.insert("axes", 10, vec![1.0, 0.0, 0.0]).await.unwrap();

    let hits = store
        .query("axes", &[1.0, 0.0, 0.0], 3, Metric::L2)
        .await
        .unwrap();
    let rows: Vec<_> = hits.iter().map(|h| h.rowid).collect();
    assert_eq!(rows, vec![10, 20, 30]);
}

#[tokio::test]
async fn dimension_mismatch_on_sqlite_writes_nothing() {
    let store = unit_axes(SqliteBackend::open_memory().await.unwrap()).await;
    let err = store
        .insert("axes", 4, vec![1.0, 1.0, 1.0, 1.0])
        .await
        .unwrap_err();
    assert!(matches!(err, VectorError::DimensionMismatch { .. }));
    assert!(err.is_validation());
    assert_eq!(store.len("axes").await.unwrap(), 3);
}

#[tokio::test]
async fn collections_are_listed_by_name() {
    let store = VectorStore::new(SqliteBackend::open_memory().await.unwrap())
        .await
        .unwrap();
    store.create_collection("zeta", 2).await.unwrap();
    store.create_collection("alpha", 768).await.unwrap();
    let names: Vec<_> = store
        .collections()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.name, c.dim))
        .collect();
    assert_eq!(
        names,
        vec![("alpha".to_string(), 768), ("zeta".to_string(), 2)]
    );
}

fn vectors(dim: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-100.0f32..100.0, dim), 1..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn inserted_vector_is_its_own_nearest_neighbour(rows in vectors(4), pick in any::<prop::sample::Index>()) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let store = VectorStore::new(MemoryBackend::new()).await.unwrap();
            store.create_collection("p", 4).await.unwrap();
            for (rowid, v) in rows.iter().enumerate() {
                store.insert("p", rowid as i64, v.clone()).await.unwrap();
            }
            let target = pick.index(rows.len());
            let hits = store.query("p", &rows[target], 1, Metric::L2).await.unwrap();
            prop_assert_eq!(hits.len(), 1);
            prop_assert_eq!(hits[0].distance, 0.0);
            // Exact duplicates may rank an earlier rowid first
            prop_assert_eq!(&rows[hits[0].rowid as usize], &rows[target]);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn results_are_bounded_and_sorted(rows in vectors(3), query in prop::collection::vec(-100.0f32..100.0, 3), k in 0usize..10) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let store = VectorStore::new(MemoryBackend::new()).await.unwrap();
            store.create_collection("p", 3).await.unwrap();
            for (rowid, v) in rows.iter().enumerate() {
                store.insert("p", rowid as i64, v.clone()).await.unwrap();
            }
            for metric in [Metric::L2, Metric::Cosine] {
                let hits = store.query("p", &query, k, metric).await.unwrap();
                prop_assert!(hits.len() <= k);
                prop_assert_eq!(hits.len(), k.min(rows.len()));
                for pair in hits.windows(2) {
                    prop_assert!(
                        pair[0].distance < pair[1].distance
                            || (pair[0].distance == pair[1].distance && pair[0].rowid < pair[1].rowid)
                    );
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
