//! Worklet probe and the end-to-end demo
//!
//! The demo runs two things at once: a round trip through the worklet channel
//! and the retrieval pipeline over a handful of built-in sentences.

use crate::config::PipelineConfig;
use crate::pipeline::{self, PipelineError, Result, Stage};
use bytes::Bytes;
use pocketrag_embed::ModelLoader;
use pocketrag_fetch::{ArtifactCache, FetchEvent, RemoteSource};
use pocketrag_vectors::{SimilarityResult, TableBackend};
use pocketrag_worklet::{ChannelError, Worklet};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs when no script is configured. Greets the host, then acknowledges
/// every message it receives.
pub const DEFAULT_SCRIPT: &str = r#"
IPC.on('data', function(msg)
  log.info('host says: ' .. msg)
  IPC.write('ack: ' .. msg)
end)

IPC.write('Hello from the worklet!')
"#;

pub const DEFAULT_MESSAGE: &str = "Hello from the host!";

/// How long the probe waits for another message before it stops listening
pub const QUIET_PERIOD: Duration = Duration::from_millis(500);

pub const SENTENCES: &[&str] = &[
    "The cat sat on the warm windowsill all afternoon.",
    "Rust guarantees memory safety without a garbage collector.",
    "Sourdough bread needs a lively starter and a long proof.",
    "SQLite in WAL mode lets readers run alongside a writer.",
    "A resumable download continues from the bytes already on disk.",
    "The dog chased the cat around the garden.",
];

/// The demo keeps its sentences apart from indexed user data. Rows are
/// upserted, so repeated runs against one database see the same six rows.
pub const DEMO_COLLECTION: &str = "demo";

pub const QUERY: &str = "Which animal sat by the window?";

/// Load the worklet source named by `config.worklet.script`, or the default.
pub async fn worklet_source(config: &PipelineConfig) -> anyhow::Result<String> {
    use anyhow::Context;
    match &config.worklet.script {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read worklet script: {}", path.display())),
        None => Ok(DEFAULT_SCRIPT.to_string()),
    }
}

/// Start a worklet, write `message`, and collect what it sends back.
///
/// Listening ends once the worklet has been silent for `quiet`, or when it
/// exits. The worklet is stopped before returning.
pub async fn probe(
    entry_point: &str,
    source: &str,
    message: &str,
    quiet: Duration,
) -> Result<Vec<Bytes>> {
    let worklet = Worklet::start(entry_point, source).await?;

    let (tx, replies) = flume::unbounded();
    let delivery = worklet.on_data(move |bytes| {
        let _ = tx.send(bytes);
    })?;
    worklet.write(message.to_string())?;

    let mut received = Vec::new();
    while let Ok(Ok(bytes)) = tokio::time::timeout(quiet, replies.recv_async()).await {
        debug!(entry_point, bytes = bytes.len(), "worklet replied");
        received.push(bytes);
    }

    // Read before stopping: stop overwrites the crashed state
    let crash = worklet.crash_reason();
    worklet.stop().await?;
    delivery
        .await
        .map_err(|e| PipelineError::new(Stage::Channel, e))?;
    match crash {
        Some(reason) => Err(PipelineError::from(ChannelError::PeerUnavailable { reason })),
        None => Ok(received),
    }
}

/// One search hit with the sentence it points at.
#[derive(Debug, Clone, Serialize)]
pub struct DemoHit {
    #[serde(flatten)]
    pub result: SimilarityResult,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    /// Everything the worklet sent, decoded lossily as UTF-8
    pub worklet: Vec<String>,
    pub query: String,
    pub hits: Vec<DemoHit>,
}

/// Run the probe and the retrieval pipeline concurrently.
pub async fn run_demo<S, L, B>(
    config: &PipelineConfig,
    cache: &ArtifactCache<S>,
    loader: &L,
    backend: B,
    progress: Option<flume::Sender<FetchEvent>>,
    cancel: &CancellationToken,
) -> Result<DemoReport>
where
    S: RemoteSource,
    L: ModelLoader,
    B: TableBackend,
{
    let source = worklet_source(config)
        .await
        .map_err(|e| PipelineError::new(Stage::Channel, e))?;
    let channel = probe(
        &config.worklet.entry_point,
        &source,
        DEFAULT_MESSAGE,
        QUIET_PERIOD,
    );

    let mut demo_config = config.clone();
    demo_config.store.collection = DEMO_COLLECTION.to_string();
    let retrieval = async {
        let pipeline =
            pipeline::prepare(&demo_config, cache, loader, backend, progress, cancel).await?;
        for (text, rowid) in SENTENCES.iter().zip(1..) {
            pipeline.upsert(rowid, text, cancel).await?;
        }
        pipeline.search(QUERY, 3, cancel).await
    };

    let (replies, results) = tokio::join!(channel, retrieval);
    let replies = replies?;
    let results = results?;
    info!(replies = replies.len(), hits = results.len(), "demo finished");

    let hits = results
        .into_iter()
        .map(|result| DemoHit {
            text: usize::try_from(result.rowid - 1)
                .ok()
                .and_then(|i| SENTENCES.get(i))
                .map(|s| s.to_string())
                .unwrap_or_default(),
            result,
        })
        .collect();
    Ok(DemoReport {
        worklet: replies
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect(),
        query: QUERY.to_string(),
        hits,
    })
}
