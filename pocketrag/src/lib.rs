//! # pocketrag
//!
//! On-device retrieval: fetch an embedding model once, embed text with it,
//! store the vectors in SQLite and search them by distance. A sandboxed
//! worklet runs alongside and talks to the host over a byte channel.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pocketrag::config::PipelineConfig;
//! use pocketrag::model::ConfiguredLoader;
//! use pocketrag::pipeline::{artifact_cache, prepare};
//! use pocketrag_vectors::SqliteBackend;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::default();
//! let cache = artifact_cache(&config)?;
//! let loader = ConfiguredLoader::new(config.model.provider, config.model.dimension);
//! let backend = SqliteBackend::open(&config.store.database).await?;
//! let cancel = CancellationToken::new();
//!
//! let pipeline = prepare(&config, &cache, &loader, backend, None, &cancel).await?;
//! pipeline.index(1, "The cat sat on the mat.", &cancel).await?;
//! for hit in pipeline.search("where is the cat?", 5, &cancel).await? {
//!     println!("{} {:.4}", hit.rowid, hit.distance);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`]: TOML configuration
//! - [`model`]: provider selection
//! - [`pipeline`]: fetch, load, index and search with per-stage errors
//! - [`demo`]: worklet probe and the concurrent end-to-end run

pub mod config;
pub mod demo;
pub mod model;
pub mod pipeline;

pub use config::{PipelineConfig, load_config};
pub use pipeline::{PipelineError, RetrievalPipeline, Stage};
