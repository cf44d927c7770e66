//! TIK Engine – the orchestrator of the indexing pipeline.
//!
//! The [`IndexEngine`] owns the three tier stores, the embedding and
//! generation capabilities, and the currently published [`IndexSnapshot`].
//!
//! ## Pipeline
//!
//! A build runs these steps in order, against one corpus:
//!
//! 1. extract entities, snippets and raw adjacency (snippet tier merged per file)
//! 2. register manual entities
//! 3. build the static graph, reconcile it with the cached edge tier, merge
//! 4. rebuild the graph from the reconciled edge records
//! 5. describe entities without a cached descriptor, merge once
//! 6. embed entities without a vector, persist the snapshot
//! 7. compute centrality and publish the snapshot
//!
//! Storage faults on write are logged and counted in
//! [`InitReport::storage_faults`]; the in-memory result is still published.
//!
//! ## Snapshots
//!
//! A snapshot is immutable once published. Readers clone the `Arc` and never
//! hold the lock while they work, so a rebuild never blocks queries and a
//! query never sees a half-built index.
//!
//! ## Example
//!
//! ```ignore
//! use tik_core::{DirectoryCorpus, IndexConfig, IndexEngine};
//!
//! let config = IndexConfig::from_path("tik.yaml".as_ref())?;
//! let corpus = DirectoryCorpus::new(".", &config.extraction);
//! let engine = IndexEngine::initialize(config, &corpus)?;
//! for hit in engine.retrieve("where is the config parsed", None) {
//!     println!("{} {:.3}", hit.key, hit.score);
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tik_db::{
    tier_stats, Descriptor, DescriptorRecord, EdgeRecord, EdgeRef, SnapshotFile, SnippetRecord,
    Tier, TierRecord, TierStats, TierStore,
};
#[cfg(feature = "http")]
use tik_model::HttpGenerationClient;
use tik_model::{create_embedding_model, EmbeddingModel, GenerationCapability, GenerationConfig};

use crate::config::{check_manual, validate_manual, IndexConfig, RetrievalConfig};
use crate::context::{render_context, ContextEntry, ContextLevels};
use crate::corpus::CorpusReader;
use crate::descriptor::{fallback_descriptor, DescriptorGenerator, DescriptorSummary};
use crate::embedding::EmbeddingStore;
use crate::entity::{Entity, ManualEntity};
use crate::errors::IndexError;
use crate::extractor::{EntityExtractor, Extraction};
use crate::graph::{DependencyGraph, GraphBuildSummary};
use crate::polish::{reconcile_edges, EdgePolisher, ReconcileSummary};
use crate::retrieval::{HybridRetriever, RetrievalHit};

// ============================================================================
// Reports and views
// ============================================================================

/// Counts from one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    pub files: usize,
    pub entities: usize,
    pub graph: GraphBuildSummary,
    pub edges: ReconcileSummary,
    pub descriptors: DescriptorSummary,
    /// Vectors computed in this build.
    pub embedded: usize,
    /// Tier or snapshot writes that failed.
    pub storage_faults: usize,
    /// True when the build did not write any tier.
    pub read_only: bool,
}

/// One entity with every tier attachment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityView {
    pub entity: Entity,
    pub snippet: Option<SnippetRecord>,
    pub edges: Option<EdgeRecord>,
    pub descriptor: Option<DescriptorRecord>,
    pub has_embedding: bool,
    pub centrality: f64,
}

// ============================================================================
// IndexSnapshot
// ============================================================================

/// Everything a query needs, built once and never mutated.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub entities: BTreeMap<String, Entity>,
    pub graph: DependencyGraph,
    pub snippets: BTreeMap<String, SnippetRecord>,
    pub edges: BTreeMap<String, EdgeRecord>,
    pub descriptors: BTreeMap<String, DescriptorRecord>,
    pub embeddings: EmbeddingStore,
    pub pagerank: HashMap<String, f64>,
    pub report: InitReport,
}

impl IndexSnapshot {
    pub fn retriever<'a>(&'a self, config: &'a RetrievalConfig) -> HybridRetriever<'a> {
        HybridRetriever {
            entities: &self.entities,
            graph: &self.graph,
            embeddings: &self.embeddings,
            pagerank: &self.pagerank,
            config,
        }
    }

    pub fn snippet(&self, key: &str) -> Option<&str> {
        self.snippets.get(key).map(|s| s.snippet.as_str())
    }

    pub fn edge_refs(&self, key: &str) -> &[EdgeRef] {
        self.edges
            .get(key)
            .map(|r| r.edges.as_slice())
            .unwrap_or(&[])
    }

    pub fn centrality(&self, key: &str) -> f64 {
        self.pagerank.get(key).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildMode {
    /// Write every tier and the embedding snapshot; call the generation
    /// capability.
    Persist,
    /// Read the tiers only. Missing descriptors fall back in memory and
    /// missing vectors are computed but not saved.
    ReadOnly,
}

// ============================================================================
// IndexEngine
// ============================================================================

/// Owns the tier stores and capabilities of one index.
///
/// Several engines can coexist, one per corpus and data directory.
#[derive(Debug)]
pub struct IndexEngine {
    config: IndexConfig,
    snippets: TierStore<SnippetRecord>,
    edges: TierStore<EdgeRecord>,
    descriptors: TierStore<DescriptorRecord>,
    extractor: EntityExtractor,
    generation: Option<Arc<dyn GenerationCapability>>,
    embedding_model: Arc<dyn EmbeddingModel>,
    manual: Vec<ManualEntity>,
    current: RwLock<Option<Arc<IndexSnapshot>>>,
}

impl IndexEngine {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create an engine from a configuration. No tier is touched.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidConfiguration`] if the configuration does
    /// not validate, or a model error if a configured capability cannot be
    /// constructed.
    pub fn new(config: IndexConfig) -> Result<Self, IndexError> {
        for warning in config.validate()? {
            tracing::warn!("Config warning: {}", warning);
        }

        let embedding_model: Arc<dyn EmbeddingModel> =
            Arc::from(create_embedding_model(&config.embedding)?);
        let generation = connect_generation(&config.generation)?;

        Ok(Self {
            snippets: TierStore::new(config.cache.snippet_path.clone()),
            edges: TierStore::new(config.cache.edges_path.clone()),
            descriptors: TierStore::new(config.cache.descriptor_path.clone()),
            extractor: EntityExtractor::new(config.extraction.denylist.iter().cloned()),
            generation,
            embedding_model,
            manual: config.manual_entities.clone(),
            current: RwLock::new(None),
            config,
        })
    }

    /// Create an engine and run a full build over `corpus`.
    pub fn initialize(config: IndexConfig, corpus: &dyn CorpusReader) -> Result<Self, IndexError> {
        let engine = Self::new(config)?;
        engine.rebuild(corpus)?;
        Ok(engine)
    }

    /// Use `capability` for descriptors and edge polishing.
    pub fn with_generation(mut self, capability: Arc<dyn GenerationCapability>) -> Self {
        self.generation = Some(capability);
        self
    }

    /// Never call a generation service; every descriptor falls back.
    pub fn without_generation(mut self) -> Self {
        self.generation = None;
        self
    }

    pub fn with_embedding_model(mut self, model: Arc<dyn EmbeddingModel>) -> Self {
        self.embedding_model = model;
        self
    }

    /// Entities registered by hand, added to every build after those from
    /// `manualEntities`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidConfiguration`] if an entity has an empty
    /// key or snippet, a bad weight, or a key already registered.
    pub fn with_manual_entities(
        mut self,
        entities: impl IntoIterator<Item = ManualEntity>,
    ) -> Result<Self, IndexError> {
        self.manual.extend(entities);
        validate_manual(&self.manual)?;
        Ok(self)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn has_generation(&self) -> bool {
        self.generation.is_some()
    }

    // -------------------------------------------------------------------------
    // Builds
    // -------------------------------------------------------------------------

    /// Run the full pipeline over `corpus`, writing every tier, and publish
    /// the result.
    ///
    /// # Errors
    ///
    /// Only corpus and parse failures abort a build; every other fault is
    /// recovered and counted in the returned report.
    pub fn rebuild(&self, corpus: &dyn CorpusReader) -> Result<InitReport, IndexError> {
        let snapshot = self.build(corpus, BuildMode::Persist)?;
        Ok(snapshot.report.clone())
    }

    /// Build from the cached tiers without writing anything and without
    /// calling the generation service, then publish the result.
    pub fn load(&self, corpus: &dyn CorpusReader) -> Result<InitReport, IndexError> {
        let snapshot = self.build(corpus, BuildMode::ReadOnly)?;
        Ok(snapshot.report.clone())
    }

    fn build(
        &self,
        corpus: &dyn CorpusReader,
        mode: BuildMode,
    ) -> Result<Arc<IndexSnapshot>, IndexError> {
        let persist = mode == BuildMode::Persist;
        let mut report = InitReport {
            read_only: !persist,
            ..InitReport::default()
        };

        // Step 1-2: entities and snippets
        let Extraction {
            mut entities,
            mut snippets,
            adjacency,
            files,
            storage_faults,
        } = self
            .extractor
            .extract_corpus(corpus, persist.then_some(&self.snippets))?;
        report.files = files;
        report.storage_faults += storage_faults;

        let manual = self.register_manual(&mut entities);
        if persist && !manual.is_empty() {
            merge_tier(&self.snippets, manual.clone(), &mut report);
        }
        snippets.extend(manual);

        // Step 3-4: edges
        let (static_graph, graph_summary) = DependencyGraph::build(&entities, &adjacency);
        report.graph = graph_summary;
        let cached_edges = self.edges.load();
        let polisher = match &self.generation {
            Some(capability) if persist && self.config.edges.polish => Some(EdgePolisher::new(
                capability.as_ref(),
                &self.config.generation,
                &self.config.edges,
            )),
            _ => None,
        };
        let (reconciled, edge_summary) = reconcile_edges(
            &entities,
            static_graph.edge_records(&entities),
            &cached_edges,
            polisher.as_ref(),
            &snippets,
            &adjacency,
        );
        report.edges = edge_summary;

        let edges: BTreeMap<String, EdgeRecord> = reconciled
            .into_iter()
            .filter(|(key, record)| {
                match record.ensure_targets(key, |k| entities.contains_key(k)) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("Rejected edge record: {e}");
                        false
                    }
                }
            })
            .collect();
        if persist {
            merge_tier(&self.edges, edges.clone(), &mut report);
        }
        let graph = DependencyGraph::from_edge_records(&entities, &edges);

        // Step 5: descriptors
        let mut descriptors = self.descriptors.load();
        descriptors.retain(|key, _| entities.contains_key(key));
        let capability = if persist {
            self.generation.as_deref()
        } else {
            None
        };
        let generator = DescriptorGenerator::new(
            capability,
            &self.config.generation,
            &self.config.descriptors,
        );
        let (fresh, descriptor_summary) =
            generator.describe_missing(&entities, &snippets, &edges, &descriptors);
        report.descriptors = descriptor_summary;
        if persist && !fresh.is_empty() {
            merge_tier(&self.descriptors, fresh.clone(), &mut report);
        }
        descriptors.extend(fresh);

        // Step 6: embeddings
        let mut embeddings = EmbeddingStore::open(
            Arc::clone(&self.embedding_model),
            SnapshotFile::new(self.config.cache.embeddings_path.clone()),
            &self.config.embedding,
        );
        let texts: BTreeMap<String, String> = entities
            .iter()
            .map(|(key, entity)| {
                let text = descriptors
                    .get(key)
                    .map(|d| d.descriptor.purpose.clone())
                    .unwrap_or_else(|| entity.embedding_text().to_string());
                (key.clone(), text)
            })
            .collect();
        let before = embeddings.len();
        if let Err(e) = embeddings.embed_missing(&texts) {
            tracing::warn!("Embedding incomplete, unembedded entities score no similarity: {e}");
        }
        report.embedded = embeddings.len() - before;
        if persist && report.embedded > 0 {
            if let Err(e) = embeddings.persist() {
                tracing::error!("Failed to persist embeddings: {e}");
                report.storage_faults += 1;
            }
        }

        // Step 7: centrality and publication
        let pagerank = graph.pagerank(self.config.retrieval.damping);
        report.entities = entities.len();

        let snapshot = Arc::new(IndexSnapshot {
            entities,
            graph,
            snippets,
            edges,
            descriptors,
            embeddings,
            pagerank,
            report,
        });
        self.publish(Arc::clone(&snapshot));
        tracing::info!(
            entities = snapshot.entities.len(),
            edges = snapshot.graph.edge_count(),
            descriptors = snapshot.descriptors.len(),
            embeddings = snapshot.embeddings.len(),
            storage_faults = snapshot.report.storage_faults,
            read_only = snapshot.report.read_only,
            "Published index snapshot"
        );
        Ok(snapshot)
    }

    /// Add manual entities that do not collide with extracted ones and
    /// return their snippet records.
    fn register_manual(
        &self,
        entities: &mut BTreeMap<String, Entity>,
    ) -> BTreeMap<String, SnippetRecord> {
        let mut snippets = BTreeMap::new();
        for manual in &self.manual {
            if let Err(e) = check_manual(manual) {
                tracing::warn!(key = %manual.key, "Skipping manual entity: {e}");
                continue;
            }
            if entities.contains_key(&manual.key) {
                tracing::warn!(key = %manual.key, "Manual entity shadows an extracted one, skipping");
                continue;
            }
            snippets.insert(
                manual.key.clone(),
                SnippetRecord::manual(&manual.snippet, manual.kind, &manual.container_path),
            );
            entities.insert(manual.key.clone(), manual.to_entity());
        }
        snippets
    }

    fn publish(&self, snapshot: Arc<IndexSnapshot>) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(snapshot);
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// The published snapshot, if a build has completed.
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rank entities for `query`. `top_k` defaults to `retrieval.topK`.
    ///
    /// Returns an empty list before the first build.
    pub fn retrieve(&self, query: &str, top_k: Option<usize>) -> Vec<RetrievalHit> {
        let Some(snapshot) = self.snapshot() else {
            return Vec::new();
        };
        let top_k = top_k.unwrap_or(self.config.retrieval.top_k);
        snapshot
            .retriever(&self.config.retrieval)
            .retrieve(query, top_k)
    }

    /// Look up one entity with its tier attachments.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EntityNotFound`] if `key` is not indexed.
    pub fn get_entity(&self, key: &str) -> Result<EntityView, IndexError> {
        let snapshot = self
            .snapshot()
            .ok_or_else(|| IndexError::EntityNotFound(key.to_string()))?;
        let entity = snapshot
            .entities
            .get(key)
            .ok_or_else(|| IndexError::EntityNotFound(key.to_string()))?;
        Ok(EntityView {
            entity: entity.clone(),
            snippet: snapshot.snippets.get(key).cloned(),
            edges: snapshot.edges.get(key).cloned(),
            descriptor: snapshot.descriptors.get(key).cloned(),
            has_embedding: snapshot.embeddings.contains(key),
            centrality: snapshot.centrality(key),
        })
    }

    /// Render the context of `hits`, choosing tiers from the wording of
    /// `query`.
    pub fn build_context(&self, query: &str, hits: &[RetrievalHit]) -> String {
        self.build_context_with(hits, ContextLevels::for_query(query))
    }

    /// Render the context of `hits` with explicit tiers. Entities without a
    /// descriptor get a fallback computed on the fly.
    pub fn build_context_with(&self, hits: &[RetrievalHit], levels: ContextLevels) -> String {
        let Some(snapshot) = self.snapshot() else {
            return String::new();
        };

        let fallbacks: HashMap<&str, Descriptor> = hits
            .iter()
            .filter(|hit| !snapshot.descriptors.contains_key(&hit.key))
            .filter_map(|hit| snapshot.entities.get(&hit.key))
            .map(|entity| {
                let descriptor = fallback_descriptor(
                    entity,
                    snapshot.snippet(&entity.key).unwrap_or(""),
                    snapshot.edge_refs(&entity.key),
                );
                (entity.key.as_str(), descriptor)
            })
            .collect();

        let entries: Vec<ContextEntry<'_>> = hits
            .iter()
            .filter(|hit| snapshot.entities.contains_key(&hit.key))
            .map(|hit| ContextEntry {
                key: &hit.key,
                descriptor: snapshot
                    .descriptors
                    .get(&hit.key)
                    .map(|r| &r.descriptor)
                    .or_else(|| fallbacks.get(hit.key.as_str())),
                edges: snapshot.edge_refs(&hit.key),
                snippet: snapshot.snippet(&hit.key),
            })
            .collect();
        render_context(&entries, levels)
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Statistics of one tier as stored on disk.
    pub fn cache_stats(&self, tier: Tier) -> TierStats {
        match tier {
            Tier::Snippet => tier_stats(&self.snippets.load()),
            Tier::Edges => tier_stats(&self.edges.load()),
            Tier::Descriptor => tier_stats(&self.descriptors.load()),
        }
    }

    /// Delete the embedding snapshot so the next build recomputes every
    /// vector. The published snapshot keeps its vectors until then.
    ///
    /// Returns whether a snapshot file existed.
    pub fn clear_embeddings(&self) -> Result<bool, IndexError> {
        let removed =
            SnapshotFile::new(self.config.cache.embeddings_path.clone()).remove()?;
        if removed {
            tracing::info!(
                "Removed embedding snapshot {}",
                self.config.cache.embeddings_path.display()
            );
        }
        Ok(removed)
    }
}

/// Merge `records` into `store`, counting a failure as a storage fault.
fn merge_tier<R: TierRecord>(
    store: &TierStore<R>,
    records: BTreeMap<String, R>,
    report: &mut InitReport,
) {
    if let Err(e) = store.merge(records) {
        tracing::error!(tier = %store.tier(), "Failed to merge tier: {e}");
        report.storage_faults += 1;
    }
}

#[cfg(feature = "http")]
fn connect_generation(
    config: &GenerationConfig,
) -> Result<Option<Arc<dyn GenerationCapability>>, IndexError> {
    match config.endpoint.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(_) => Ok(Some(Arc::new(HttpGenerationClient::new(config)?))),
    }
}

#[cfg(not(feature = "http"))]
fn connect_generation(
    config: &GenerationConfig,
) -> Result<Option<Arc<dyn GenerationCapability>>, IndexError> {
    if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        tracing::warn!("Generation endpoint {endpoint} ignored: built without the `http` feature");
    }
    Ok(None)
}
