//! Fetch, load, embed, store, search
//!
//! [`prepare`] turns a [`PipelineConfig`] into a ready [`RetrievalPipeline`]:
//!
//! ```text
//! model.url ──fetch──▶ model.path ──load──▶ context ──create──▶ collection
//! ```
//!
//! Afterwards [`RetrievalPipeline::index`] and [`RetrievalPipeline::search`]
//! embed text and hand the vectors to the store. Each step names the stage
//! that failed in its [`PipelineError`].

use crate::config::PipelineConfig;
use pocketrag_embed::{EmbedError, InferenceContext, LoadMode, ModelLoader};
use pocketrag_fetch::{ArtifactCache, FetchError, FetchEvent, HttpSource, RemoteSource};
use pocketrag_vectors::{
    EmbeddingRecord, Metric, RowId, SimilarityResult, TableBackend, VectorError, VectorStore,
};
use pocketrag_worklet::ChannelError;
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Load,
    Embed,
    Store,
    Channel,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Load => "load",
            Stage::Embed => "embed",
            Stage::Store => "store",
            Stage::Channel => "channel",
        })
    }
}

/// A failure, tagged with the stage it happened in.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl PipelineError {
    pub fn new<E>(stage: Stage, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            stage,
            source: source.into(),
        }
    }

    /// True if the failure was a cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source.downcast_ref::<FetchError>(), Some(FetchError::Cancelled))
            || matches!(self.source.downcast_ref::<EmbedError>(), Some(EmbedError::Cancelled))
    }
}

impl From<FetchError> for PipelineError {
    fn from(e: FetchError) -> Self {
        Self::new(Stage::Fetch, e)
    }
}

impl From<VectorError> for PipelineError {
    fn from(e: VectorError) -> Self {
        Self::new(Stage::Store, e)
    }
}

impl From<ChannelError> for PipelineError {
    fn from(e: ChannelError) -> Self {
        Self::new(Stage::Channel, e)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

fn embed_error(e: EmbedError) -> PipelineError {
    PipelineError::new(Stage::Embed, e)
}

fn load_error(e: EmbedError) -> PipelineError {
    PipelineError::new(Stage::Load, e)
}

fn cancelled(stage: Stage) -> PipelineError {
    match stage {
        Stage::Fetch => PipelineError::new(stage, FetchError::Cancelled),
        _ => PipelineError::new(stage, EmbedError::Cancelled),
    }
}

/// Build the artifact cache described by `config.fetch`.
pub fn artifact_cache(config: &PipelineConfig) -> Result<ArtifactCache<HttpSource>> {
    let source = HttpSource::new(&config.fetch.user_agent, config.fetch.timeout())?;
    Ok(ArtifactCache::new(source, config.fetch.cache_options()))
}

/// Make the configured model artifact local and return its path.
pub async fn fetch_model<S: RemoteSource>(
    cache: &ArtifactCache<S>,
    config: &PipelineConfig,
    progress: Option<flume::Sender<FetchEvent>>,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let mut request = config.model.request().with_cancellation(cancel.clone());
    if let Some(progress) = progress {
        request = request.with_progress(progress);
    }
    let path = cache.ensure_local(&request).await?;
    debug!(path = %path.display(), "model artifact is local");
    Ok(path)
}

/// Load the artifact at `path` for embedding.
pub async fn load_model<L: ModelLoader>(
    loader: &L,
    path: &std::path::Path,
    cancel: &CancellationToken,
) -> Result<L::Context> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled(Stage::Load)),
        loaded = loader.load(path, LoadMode::Embedding) => loaded.map_err(load_error),
    }
}

/// Run fetch, load and collection setup for `config`.
pub async fn prepare<S, L, B>(
    config: &PipelineConfig,
    cache: &ArtifactCache<S>,
    loader: &L,
    backend: B,
    progress: Option<flume::Sender<FetchEvent>>,
    cancel: &CancellationToken,
) -> Result<RetrievalPipeline<L::Context, B>>
where
    S: RemoteSource,
    L: ModelLoader,
    B: TableBackend,
{
    let path = fetch_model(cache, config, progress, cancel).await?;
    let context = load_model(loader, &path, cancel).await?;
    let store = VectorStore::new(backend).await?;
    RetrievalPipeline::new(context, store, &config.store.collection, config.store.metric).await
}

/// An inference context and a vector store wired to one collection.
///
/// Owns both; dropping the pipeline (or calling [`release`](Self::release))
/// releases the model.
pub struct RetrievalPipeline<C, B> {
    context: C,
    store: VectorStore<B>,
    collection: String,
    metric: Metric,
}

impl<C: fmt::Debug, B> fmt::Debug for RetrievalPipeline<C, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalPipeline")
            .field("context", &self.context)
            .field("collection", &self.collection)
            .field("metric", &self.metric)
            .finish()
    }
}

impl<C: InferenceContext, B: TableBackend> RetrievalPipeline<C, B> {
    /// Create (or reopen) `collection` with the context's dimension.
    pub async fn new(
        context: C,
        store: VectorStore<B>,
        collection: &str,
        metric: Metric,
    ) -> Result<Self> {
        let info = store.create_collection(collection, context.dimension()).await?;
        info!(
            collection = %info.name,
            dim = info.dim,
            model = context.model_name(),
            %metric,
            "pipeline ready"
        );
        Ok(Self {
            context,
            store,
            collection: info.name,
            metric,
        })
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn store(&self) -> &VectorStore<B> {
        &self.store
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Embed `text` and store it under `rowid`.
    pub async fn index(&self, rowid: RowId, text: &str, cancel: &CancellationToken) -> Result<()> {
        let vector = self
            .context
            .embed_cancellable(text, cancel)
            .await
            .map_err(embed_error)?;
        if cancel.is_cancelled() {
            return Err(cancelled(Stage::Embed));
        }
        self.store.insert(&self.collection, rowid, vector).await?;
        Ok(())
    }

    /// Embed `text` and store it under `rowid`, replacing any row already there.
    pub async fn upsert(&self, rowid: RowId, text: &str, cancel: &CancellationToken) -> Result<()> {
        let vector = self
            .context
            .embed_cancellable(text, cancel)
            .await
            .map_err(embed_error)?;
        if cancel.is_cancelled() {
            return Err(cancelled(Stage::Embed));
        }
        self.store.upsert(&self.collection, rowid, vector).await?;
        Ok(())
    }

    /// Embed every text, then store them all or none.
    pub async fn index_many(
        &self,
        rows: &[(RowId, String)],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let texts: Vec<String> = rows.iter().map(|(_, text)| text.clone()).collect();
        let vectors = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(Stage::Embed)),
            vectors = self.context.embed_batch(&texts) => vectors.map_err(embed_error)?,
        };
        if vectors.len() != rows.len() {
            return Err(embed_error(EmbedError::embedding(format!(
                "model returned {} vectors for {} texts",
                vectors.len(),
                rows.len()
            ))));
        }
        let records: Vec<EmbeddingRecord> = rows
            .iter()
            .zip(vectors)
            .map(|((rowid, _), vector)| EmbeddingRecord::new(*rowid, vector))
            .collect();
        self.store.insert_many(&self.collection, &records).await?;
        info!(collection = %self.collection, rows = records.len(), "indexed");
        Ok(records.len())
    }

    /// The `k` stored rows nearest to `text` under the pipeline's metric.
    pub async fn search(
        &self,
        text: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SimilarityResult>> {
        self.search_with(text, k, self.metric, cancel).await
    }

    pub async fn search_with(
        &self,
        text: &str,
        k: usize,
        metric: Metric,
        cancel: &CancellationToken,
    ) -> Result<Vec<SimilarityResult>> {
        let vector = self
            .context
            .embed_cancellable(text, cancel)
            .await
            .map_err(embed_error)?;
        let results = self.store.query(&self.collection, &vector, k, metric).await?;
        debug!(collection = %self.collection, k, hits = results.len(), "searched");
        Ok(results)
    }

    /// Give back the context and store.
    pub fn release(self) -> (C, VectorStore<B>) {
        (self.context, self.store)
    }
}
