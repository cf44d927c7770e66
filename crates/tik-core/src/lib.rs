//! # tik-core
//!
//! **Tiered Indexing Kernel** – core engine library.
//!
//! This crate turns a source corpus into a three-tier code knowledge index
//! and answers hybrid retrieval queries over it. It is designed to be
//! consumed by the `tik` CLI and other Rust tools.
//!
//! ## Main Types
//!
//! - [`IndexEngine`] – owns the tier stores and publishes index snapshots
//! - [`IndexSnapshot`] – immutable entities, graph, tiers and embeddings
//! - [`IndexConfig`] – YAML configuration
//! - [`IndexError`] – domain-specific error type
//!
//! ## Modules
//!
//! - [`corpus`] – source readers (directory walk, in-memory)
//! - [`extractor`] – Python entity extraction with tree-sitter
//! - [`graph`] – reference resolution, dependency graph, centrality
//! - [`polish`] – optional edge polishing and edge-tier reconciliation
//! - [`descriptor`] – descriptor generation with deterministic fallback
//! - [`embedding`] – persisted per-entity vectors
//! - [`retrieval`] – hybrid scoring
//! - [`context`] – context rendering for retrieved entities
//! - [`engine`] – the pipeline and snapshot lifecycle
//!
//! ## Example
//!
//! ```ignore
//! use tik_core::{DirectoryCorpus, IndexConfig, IndexEngine};
//!
//! let config = IndexConfig::default().with_data_dir("data");
//! let corpus = DirectoryCorpus::new("src", &config.extraction);
//! let engine = IndexEngine::initialize(config, &corpus)?;
//!
//! let hits = engine.retrieve("how are edges polished", Some(3));
//! println!("{}", engine.build_context("how are edges polished", &hits));
//! ```

// Modules
pub mod config;
pub mod context;
pub mod corpus;
pub mod descriptor;
pub mod embedding;
pub mod engine;
pub mod entity;
pub mod errors;
pub mod extractor;
pub mod graph;
pub mod polish;
pub mod retrieval;

// Re-exports for convenience
pub use config::{
    CacheConfig, DescriptorConfig, EdgeConfig, ExtractionConfig, IndexConfig, RetrievalConfig,
    DEFAULT_CONFIG_FILE, DEFAULT_DATA_DIR,
};
pub use context::{render_context, ContextEntry, ContextLevels};
pub use corpus::{CorpusReader, DirectoryCorpus, InMemoryCorpus, SourceFile};
pub use descriptor::{fallback_descriptor, DescriptorGenerator, DescriptorSummary};
pub use embedding::{cosine_similarity, EmbeddingStore};
pub use engine::{EntityView, IndexEngine, IndexSnapshot, InitReport};
pub use entity::{Contract, Entity, ManualEntity};
pub use errors::IndexError;
pub use extractor::{EntityExtractor, Extraction};
pub use graph::{DependencyGraph, GraphBuildSummary, GraphSummary, KeyResolver};
pub use polish::{reconcile_edges, EdgePolisher, ReconcileSummary};
pub use retrieval::{HybridRetriever, RetrievalHit};

// Storage and capability types used in the public API
pub use tik_db::{Tier, TierStats};
pub use tik_model::{EmbeddingModel, GenerationCapability};
