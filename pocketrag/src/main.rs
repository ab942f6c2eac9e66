use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use pocketrag::config::{PipelineConfig, load_config};
use pocketrag::demo::{self, DEFAULT_MESSAGE, QUIET_PERIOD};
use pocketrag::model::ConfiguredLoader;
use pocketrag::pipeline::{self, artifact_cache};
use pocketrag_fetch::{FetchEvent, FetchRequest};
use pocketrag_vectors::{Metric, SimilarityResult, SqliteBackend, VectorStore};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Fetch an embedding model, index text with it, and search it on-device.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overriding the configuration
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Make a remote artifact available locally, resuming if interrupted
    Fetch {
        url: String,
        dest: PathBuf,
        /// Expected blake3 digest (hex)
        #[arg(long)]
        blake3: Option<String>,
    },
    /// Create the database and collection
    Init,
    /// Embed each non-empty line of a file; the rowid is the line number
    Index { file: PathBuf },
    /// Search the collection for the rows nearest to some text
    Query {
        text: String,
        #[arg(short, default_value_t = 5)]
        k: usize,
        /// Distance metric (l2 or cosine)
        #[arg(long)]
        metric: Option<Metric>,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Start a worklet, send it a message and print the replies
    Probe {
        /// Lua script to run instead of the built-in one
        #[arg(long)]
        script: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_MESSAGE)]
        message: String,
    },
    /// Run the worklet probe and the retrieval pipeline together
    Demo {
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct QueryOutput<'a> {
    collection: &'a str,
    metric: Metric,
    results: &'a [SimilarityResult],
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(database) = args.database {
        config.store.database = database;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match args.command {
        Commands::Fetch { url, dest, blake3 } => {
            let cache = artifact_cache(&config)?;
            let (events, progress) = flume::unbounded();
            let mut request = FetchRequest::new(url, &dest)
                .with_progress(events)
                .with_cancellation(cancel.clone());
            if let Some(digest) = blake3 {
                request = request.with_expected_digest(digest);
            }
            let printer = tokio::spawn(print_progress(progress));
            let result = cache.ensure_local(&request).await;
            drop(request);
            let _ = printer.await;
            let path = result?;
            println!("{}", path.display());
        }

        Commands::Init => {
            let backend = SqliteBackend::open(&config.store.database)
                .await
                .with_context(|| {
                    format!("Failed to open database {}", config.store.database.display())
                })?;
            let store = VectorStore::new(backend).await?;
            let info = store
                .create_collection(&config.store.collection, config.model.dimension)
                .await?;
            println!(
                "Initialized collection '{}' ({} dimensions) in {}",
                info.name,
                info.dim,
                config.store.database.display()
            );
        }

        Commands::Index { file } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let rows: Vec<(i64, String)> = content
                .lines()
                .zip(1..)
                .filter(|(line, _)| !line.trim().is_empty())
                .map(|(line, n)| (n, line.to_string()))
                .collect();

            let pipeline = open_pipeline(&config, &cancel).await?;
            let indexed = pipeline.index_many(&rows, &cancel).await?;
            println!(
                "Indexed {indexed} lines from {} into '{}'",
                file.display(),
                pipeline.collection()
            );
        }

        Commands::Query {
            text,
            k,
            metric,
            format,
        } => {
            let pipeline = open_pipeline(&config, &cancel).await?;
            let metric = metric.unwrap_or(pipeline.metric());
            let results = pipeline.search_with(&text, k, metric, &cancel).await?;

            match format {
                OutputFormat::Json => {
                    let output = QueryOutput {
                        collection: pipeline.collection(),
                        metric,
                        results: &results,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary => {
                    if results.is_empty() {
                        println!("No rows in '{}'", pipeline.collection());
                    }
                    for (rank, hit) in results.iter().enumerate() {
                        println!("{:>3}. row {:<8} distance {:.6}", rank + 1, hit.rowid, hit.distance);
                    }
                }
            }
        }

        Commands::Probe { script, message } => {
            if let Some(script) = script {
                config.worklet.script = Some(script);
            }
            let source = demo::worklet_source(&config).await?;
            let replies =
                demo::probe(&config.worklet.entry_point, &source, &message, QUIET_PERIOD).await?;
            if replies.is_empty() {
                println!("(no reply from {})", config.worklet.entry_point);
            }
            for reply in replies {
                println!("{}", String::from_utf8_lossy(&reply));
            }
        }

        Commands::Demo { format } => {
            let cache = artifact_cache(&config)?;
            let loader = ConfiguredLoader::new(config.model.provider, config.model.dimension);
            let backend = SqliteBackend::open(&config.store.database).await?;
            let (events, progress) = flume::unbounded();
            let printer = tokio::spawn(print_progress(progress));
            let report =
                demo::run_demo(&config, &cache, &loader, backend, Some(events), &cancel).await;
            let _ = printer.await;
            let report = report?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Summary => {
                    println!("Worklet:");
                    for message in &report.worklet {
                        println!("  {message}");
                    }
                    println!("Query: {}", report.query);
                    for hit in &report.hits {
                        println!("  row {} ({:.4}): {}", hit.result.rowid, hit.result.distance, hit.text);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Fetch (if needed), load and open the configured pipeline.
async fn open_pipeline(
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<pipeline::RetrievalPipeline<pocketrag::model::EmbeddingModel, SqliteBackend>> {
    let cache = artifact_cache(config)?;
    let loader = ConfiguredLoader::new(config.model.provider, config.model.dimension);
    let backend = SqliteBackend::open(&config.store.database)
        .await
        .with_context(|| format!("Failed to open database {}", config.store.database.display()))?;
    let (events, progress) = flume::unbounded();
    let printer = tokio::spawn(print_progress(progress));
    let pipeline = pipeline::prepare(config, &cache, &loader, backend, Some(events), cancel).await;
    let _ = printer.await;
    Ok(pipeline?)
}

/// Print fetch progress to stderr until the sender side is dropped.
async fn print_progress(events: flume::Receiver<FetchEvent>) {
    while let Ok(event) = events.recv_async().await {
        match event {
            FetchEvent::Started {
                resumed_from,
                total,
            } => match total {
                Some(total) => eprintln!("Downloading {total} bytes (from {resumed_from})"),
                None => eprintln!("Downloading (from {resumed_from})"),
            },
            FetchEvent::Progress { downloaded, total } => match total {
                Some(total) if total > 0 => {
                    eprint!("\r{:>5.1}% {downloaded}/{total}", downloaded as f64 * 100.0 / total as f64)
                }
                _ => eprint!("\r{downloaded} bytes"),
            },
            FetchEvent::Retrying { attempt, error } => {
                eprintln!("\nRetry {attempt}: {error}")
            }
            FetchEvent::Finished { bytes, cached } => {
                if cached {
                    eprintln!("Using cached artifact ({bytes} bytes)");
                } else {
                    eprintln!("\nDownloaded {bytes} bytes");
                }
            }
        }
    }
}
