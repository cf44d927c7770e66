//! Configuration types for TIK.
//!
//! [`IndexConfig`] is loaded from a YAML file (default `tik.yaml`). Every
//! section and field has a default, so a missing file or a partial file is
//! always accepted. Sections:
//!
//! - `cache`: the three tier file paths and the embedding snapshot path
//! - `extraction`: file extensions, extra denylist names, file size limit
//! - `generation`: endpoint, model selector, timeout, retry policy
//! - `descriptors`: batch size, worker count, dry-run flag
//! - `edges`: optional edge polishing through the generation service
//! - `embedding`: embedding endpoint, dimension, batch size, text prefixes
//! - `retrieval`: hybrid scoring constants
//! - `manualEntities`: entities registered by hand, added to every build
//!
//! ```yaml
//! cache:
//!   snippetPath: data/snippet_tier.json
//! generation:
//!   endpoint: http://localhost:8080/generate
//! retrieval:
//!   topK: 4
//!   minWeight: 0.8
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tik_model::{EmbeddingConfig, GenerationConfig};

use crate::entity::ManualEntity;
use crate::errors::IndexError;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tik.yaml";

/// Default directory holding the tier files and embedding snapshot.
pub const DEFAULT_DATA_DIR: &str = "data";

const SNIPPET_TIER_FILE: &str = "snippet_tier.json";
const EDGE_TIER_FILE: &str = "edge_tier.json";
const DESCRIPTOR_TIER_FILE: &str = "descriptor_tier.json";
const EMBEDDINGS_FILE: &str = "embeddings.bin";

// ============================================================================
// IndexConfig
// ============================================================================

/// Process-wide configuration for one index engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub descriptors: DescriptorConfig,

    #[serde(default)]
    pub edges: EdgeConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub manual_entities: Vec<ManualEntity>,
}

impl IndexConfig {
    /// Load configuration from a specific path.
    ///
    /// If the file does not exist, returns a default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidConfig`] if the file exists but cannot be parsed.
    /// Returns [`IndexError::InvalidConfiguration`] if validation fails.
    pub fn from_path(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            tracing::debug!("Config not found at {}, using defaults", path.display());
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            IndexError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                IndexError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
            })?
        };

        let warnings = config.validate()?;
        for warning in warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(config)
    }

    /// Relocate every cache file under `dir`, keeping the default file names.
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache = CacheConfig::under(dir.as_ref());
        self
    }

    /// Validate all sections.
    ///
    /// Returns non-fatal warnings; fatal problems are returned as
    /// [`IndexError::InvalidConfiguration`].
    pub fn validate(&self) -> Result<Vec<String>, IndexError> {
        let mut warnings = Vec::new();
        self.cache.validate()?;
        warnings.extend(self.extraction.validate()?);
        warnings.extend(self.descriptors.validate()?);
        warnings.extend(self.retrieval.validate()?);
        validate_generation(&self.generation)?;
        validate_embedding(&self.embedding)?;
        validate_manual(&self.manual_entities)?;

        if self.edges.polish && self.generation.endpoint.is_none() {
            warnings.push(
                "edges.polish is enabled but generation.endpoint is not set; static edges will be used"
                    .to_string(),
            );
        }
        Ok(warnings)
    }
}

fn validate_generation(config: &GenerationConfig) -> Result<(), IndexError> {
    if let Some(endpoint) = &config.endpoint {
        if endpoint.trim().is_empty() {
            return Err(IndexError::invalid_configuration(
                "generation.endpoint is empty",
                "Remove the key to disable generation, or set a URL",
            ));
        }
    }
    if config.max_retries == 0 {
        return Err(IndexError::invalid_configuration(
            "generation.maxRetries cannot be 0",
            "Set maxRetries to at least 1 (default: 3)",
        ));
    }
    if config.model.trim().is_empty() {
        return Err(IndexError::invalid_configuration(
            "generation.model is empty",
            "Set a model selector (default: FAST)",
        ));
    }
    Ok(())
}

/// Check a list of manual entities: each entry on its own, then key
/// uniqueness across the list.
pub(crate) fn validate_manual(entities: &[ManualEntity]) -> Result<(), IndexError> {
    let mut seen = std::collections::HashSet::new();
    for entity in entities {
        check_manual(entity)?;
        if !seen.insert(entity.key.as_str()) {
            return Err(IndexError::invalid_configuration(
                format!("manualEntities repeats key '{}'", entity.key),
                "Give every manual entity a unique key",
            ));
        }
    }
    Ok(())
}

/// Reject a manual entity the snippet tier could not store.
pub(crate) fn check_manual(entity: &ManualEntity) -> Result<(), IndexError> {
    if entity.key.trim().is_empty() {
        return Err(IndexError::invalid_configuration(
            "manualEntities contains an entry with an empty key",
            "Give every manual entity a unique key",
        ));
    }
    if entity.snippet.trim().is_empty() {
        return Err(IndexError::invalid_configuration(
            format!("manualEntities['{}'].snippet is empty", entity.key),
            "Give every manual entity the source text it stands for",
        ));
    }
    if !entity.weight.is_finite() || entity.weight < 0.0 {
        return Err(IndexError::invalid_configuration(
            format!("manualEntities['{}'].weight must be a non-negative number", entity.key),
            "Use 2.0 for classes and 1.5 for functions",
        ));
    }
    Ok(())
}

fn validate_embedding(config: &EmbeddingConfig) -> Result<(), IndexError> {
    if config.dimension == 0 {
        return Err(IndexError::invalid_configuration(
            "embedding.dimension cannot be 0",
            "Set dimension to the model's vector size (default: 384)",
        ));
    }
    if config.batch_size == 0 {
        return Err(IndexError::invalid_configuration(
            "embedding.batchSize cannot be 0",
            "Set batchSize to at least 1 (default: 32)",
        ));
    }
    if let Some(endpoint) = &config.endpoint {
        if endpoint.trim().is_empty() {
            return Err(IndexError::invalid_configuration(
                "embedding.endpoint is empty",
                "Remove the key to use placeholder vectors, or set a URL",
            ));
        }
    }
    Ok(())
}

// ============================================================================
// CacheConfig
// ============================================================================

/// Locations of the persisted tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    pub snippet_path: PathBuf,
    pub edges_path: PathBuf,
    pub descriptor_path: PathBuf,
    pub embeddings_path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::under(Path::new(DEFAULT_DATA_DIR))
    }
}

impl CacheConfig {
    pub fn under(dir: &Path) -> Self {
        Self {
            snippet_path: dir.join(SNIPPET_TIER_FILE),
            edges_path: dir.join(EDGE_TIER_FILE),
            descriptor_path: dir.join(DESCRIPTOR_TIER_FILE),
            embeddings_path: dir.join(EMBEDDINGS_FILE),
        }
    }

    fn validate(&self) -> Result<(), IndexError> {
        let paths = [
            ("cache.snippetPath", &self.snippet_path),
            ("cache.edgesPath", &self.edges_path),
            ("cache.descriptorPath", &self.descriptor_path),
            ("cache.embeddingsPath", &self.embeddings_path),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(IndexError::invalid_configuration(
                    format!("{name} is empty"),
                    "Set a file path or remove the key to use the default",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// ExtractionConfig
// ============================================================================

/// Default maximum source file size in bytes (1 MB).
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionConfig {
    /// File extensions (without dot) read from the corpus.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Names excluded from raw references, on top of the built-in list.
    #[serde(default)]
    pub denylist: Vec<String>,

    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
}

fn default_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE_BYTES
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            denylist: Vec::new(),
            max_file_size_bytes: default_max_file_size(),
        }
    }
}

impl ExtractionConfig {
    fn validate(&self) -> Result<Vec<String>, IndexError> {
        if self.extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(IndexError::invalid_configuration(
                "extraction.extensions is empty",
                "List at least one extension, e.g. [py]",
            ));
        }
        let mut warnings = Vec::new();
        if self.max_file_size_bytes < 1024 {
            warnings.push(format!(
                "extraction.maxFileSizeBytes={} bytes is very restrictive; most source files will be skipped",
                self.max_file_size_bytes
            ));
        }
        Ok(warnings)
    }
}

// ============================================================================
// DescriptorConfig
// ============================================================================

/// Default entities per generation batch.
pub const DEFAULT_DESCRIPTOR_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorConfig {
    /// Entities submitted per generation call.
    #[serde(default = "default_descriptor_batch_size")]
    pub batch_size: usize,

    /// Maximum concurrent generation calls.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Never call the generation service; every descriptor falls back.
    #[serde(default)]
    pub dry_run: bool,

    /// Snippet characters included in each prompt.
    #[serde(default = "default_descriptor_snippet_chars")]
    pub prompt_snippet_chars: usize,
}

fn default_descriptor_batch_size() -> usize {
    DEFAULT_DESCRIPTOR_BATCH_SIZE
}

fn default_workers() -> usize {
    4
}

fn default_descriptor_snippet_chars() -> usize {
    300
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_descriptor_batch_size(),
            workers: default_workers(),
            dry_run: false,
            prompt_snippet_chars: default_descriptor_snippet_chars(),
        }
    }
}

impl DescriptorConfig {
    fn validate(&self) -> Result<Vec<String>, IndexError> {
        if self.batch_size == 0 {
            return Err(IndexError::invalid_configuration(
                "descriptors.batchSize cannot be 0",
                "Set batchSize to at least 1 (default: 5)",
            ));
        }
        if self.workers == 0 {
            return Err(IndexError::invalid_configuration(
                "descriptors.workers cannot be 0",
                "Set workers to at least 1 (default: 4)",
            ));
        }
        let mut warnings = Vec::new();
        if self.batch_size > 20 {
            warnings.push(format!(
                "descriptors.batchSize={} is large; one malformed reply sends the whole batch to fallback",
                self.batch_size
            ));
        }
        Ok(warnings)
    }
}

// ============================================================================
// EdgeConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeConfig {
    /// Ask the generation service to refine static edges.
    #[serde(default)]
    pub polish: bool,

    /// Snippet characters included in each polishing prompt.
    #[serde(default = "default_edge_snippet_chars")]
    pub prompt_snippet_chars: usize,
}

fn default_edge_snippet_chars() -> usize {
    200
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            polish: false,
            prompt_snippet_chars: default_edge_snippet_chars(),
        }
    }
}

// ============================================================================
// RetrievalConfig
// ============================================================================

/// Default number of results.
pub const DEFAULT_TOP_K: usize = 4;
/// Default minimum entity weight.
pub const DEFAULT_MIN_WEIGHT: f64 = 0.8;
/// Default flat keyword boost.
pub const DEFAULT_KEYWORD_BOOST: f64 = 0.5;
/// Default centrality multiplier for graph expansion.
pub const DEFAULT_EXPANSION_FACTOR: f64 = 0.15;
/// Default number of descendants expanded per survivor.
pub const DEFAULT_DESCENDANT_LIMIT: usize = 5;
/// Default PageRank damping.
pub const DEFAULT_DAMPING: f64 = 0.85;

/// Hybrid scoring constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Entities with a lower static weight are dropped before expansion.
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,

    /// Flat boost added when any query token is in an entity's patterns.
    #[serde(default = "default_keyword_boost")]
    pub keyword_boost: f64,

    /// Multiplier applied to descendant centrality.
    #[serde(default = "default_expansion_factor")]
    pub expansion_factor: f64,

    /// Descendants expanded per surviving entity, in traversal order.
    #[serde(default = "default_descendant_limit")]
    pub descendant_limit: usize,

    /// PageRank damping factor.
    #[serde(default = "default_damping")]
    pub damping: f64,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_min_weight() -> f64 {
    DEFAULT_MIN_WEIGHT
}

fn default_keyword_boost() -> f64 {
    DEFAULT_KEYWORD_BOOST
}

fn default_expansion_factor() -> f64 {
    DEFAULT_EXPANSION_FACTOR
}

fn default_descendant_limit() -> usize {
    DEFAULT_DESCENDANT_LIMIT
}

fn default_damping() -> f64 {
    DEFAULT_DAMPING
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_weight: default_min_weight(),
            keyword_boost: default_keyword_boost(),
            expansion_factor: default_expansion_factor(),
            descendant_limit: default_descendant_limit(),
            damping: default_damping(),
        }
    }
}

impl RetrievalConfig {
    fn validate(&self) -> Result<Vec<String>, IndexError> {
        if self.top_k == 0 {
            return Err(IndexError::invalid_configuration(
                "retrieval.topK cannot be 0",
                "Set topK to at least 1 (default: 4)",
            ));
        }
        if !(0.0..1.0).contains(&self.damping) {
            return Err(IndexError::invalid_configuration(
                format!("retrieval.damping={} is out of range", self.damping),
                "Use a value in [0, 1) (default: 0.85)",
            ));
        }
        for (name, value) in [
            ("retrieval.minWeight", self.min_weight),
            ("retrieval.keywordBoost", self.keyword_boost),
            ("retrieval.expansionFactor", self.expansion_factor),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(IndexError::invalid_configuration(
                    format!("{name}={value} must be a non-negative number"),
                    "Remove the key to use the default",
                ));
            }
        }
        let mut warnings = Vec::new();
        if self.top_k > 50 {
            warnings.push(format!(
                "retrieval.topK={} is large for context assembly",
                self.top_k
            ));
        }
        Ok(warnings)
    }
}
