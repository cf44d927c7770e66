//! Embedding store.
//!
//! Holds one vector per entity key, computed lazily by the configured
//! [`EmbeddingModel`] and persisted as a wholesale [`EmbeddingSnapshot`].
//! A stored vector is never overwritten; [`EmbeddingStore::invalidate`] and
//! [`EmbeddingStore::invalidate_all`] are the only ways to regenerate one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tik_db::{EmbeddingSnapshot, SnapshotFile};
use tik_model::{EmbeddingConfig, EmbeddingModel, ModelError};

use crate::errors::IndexError;

/// In-memory vectors plus their snapshot file.
#[derive(Debug)]
pub struct EmbeddingStore {
    model: Arc<dyn EmbeddingModel>,
    file: SnapshotFile,
    passage_prefix: String,
    query_prefix: String,
    batch_size: usize,
    vectors: HashMap<String, Vec<f32>>,
    texts: HashMap<String, String>,
}

impl EmbeddingStore {
    /// Open the store, loading the snapshot at `file` when it was written by
    /// the active model: same model id and dimension.
    pub fn open(
        model: Arc<dyn EmbeddingModel>,
        file: SnapshotFile,
        config: &EmbeddingConfig,
    ) -> Self {
        if model.is_placeholder() {
            tracing::warn!(
                "No embedding model configured, using placeholder vectors; similarity scores are not semantic"
            );
        }

        let mut vectors = HashMap::new();
        let mut texts = HashMap::new();
        match file.load() {
            Ok(Some(snapshot)) if snapshot.dimension as usize != model.dimension() => {
                tracing::warn!(
                    "Ignoring embedding snapshot with dimension {} (model {} has {})",
                    snapshot.dimension,
                    model.model_id(),
                    model.dimension()
                );
            }
            Ok(Some(snapshot)) if snapshot.model_id != model.model_id() => {
                tracing::warn!(
                    "Ignoring embedding snapshot of model '{}' (active model is '{}')",
                    snapshot.model_id,
                    model.model_id()
                );
            }
            Ok(Some(snapshot)) => {
                for ((id, text), vector) in snapshot
                    .ids
                    .into_iter()
                    .zip(snapshot.texts)
                    .zip(snapshot.vectors)
                {
                    texts.insert(id.clone(), text);
                    vectors.insert(id, vector);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("{e}; starting with no embeddings"),
        }

        Self {
            model,
            file,
            passage_prefix: config.passage_prefix.clone(),
            query_prefix: config.query_prefix.clone(),
            batch_size: config.batch_size.max(1),
            vectors,
            texts,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vectors.contains_key(key)
    }

    pub fn vector(&self, key: &str) -> Option<&[f32]> {
        self.vectors.get(key).map(Vec::as_slice)
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn is_degraded(&self) -> bool {
        self.model.is_placeholder()
    }

    /// Embed every entity of `texts` (key to source text) that has no vector
    /// yet, then persist the snapshot. Returns the number of new vectors.
    pub fn add_entities(&mut self, texts: &BTreeMap<String, String>) -> Result<usize, IndexError> {
        let added = self.embed_missing(texts)?;
        if added > 0 {
            self.persist()?;
        }
        Ok(added)
    }

    /// Embed missing entities in memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if the model fails or returns a vector count other
    /// than its batch size; vectors of earlier batches are kept.
    pub fn embed_missing(&mut self, texts: &BTreeMap<String, String>) -> Result<usize, IndexError> {
        let missing: Vec<(&String, &String)> = texts
            .iter()
            .filter(|(key, _)| !self.vectors.contains_key(key.as_str()))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        for chunk in missing.chunks(self.batch_size) {
            let inputs: Vec<String> = chunk
                .iter()
                .map(|(_, text)| format!("{}{}", self.passage_prefix, text))
                .collect();
            let embedded = self.model.embed_batch(&inputs)?;
            if embedded.len() != chunk.len() {
                return Err(ModelError::EmbeddingFailed {
                    model_id: self.model.model_id().to_string(),
                    message: format!(
                        "returned {} vectors for {} inputs",
                        embedded.len(),
                        chunk.len()
                    ),
                }
                .into());
            }
            for ((key, text), vector) in chunk.iter().zip(embedded) {
                self.texts.insert((*key).clone(), (*text).clone());
                self.vectors.insert((*key).clone(), vector);
            }
        }
        tracing::debug!(added = missing.len(), total = self.len(), "Embedded entities");
        Ok(missing.len())
    }

    /// Drop the vectors of `keys`. Returns how many existed.
    pub fn invalidate<'k>(&mut self, keys: impl IntoIterator<Item = &'k str>) -> usize {
        let mut removed = 0;
        for key in keys {
            if self.vectors.remove(key).is_some() {
                removed += 1;
            }
            self.texts.remove(key);
        }
        removed
    }

    /// Drop every vector.
    pub fn invalidate_all(&mut self) -> usize {
        let removed = self.vectors.len();
        self.vectors.clear();
        self.texts.clear();
        removed
    }

    /// Write the current vectors as a new snapshot, in key order.
    pub fn persist(&self) -> Result<(), IndexError> {
        let mut snapshot = EmbeddingSnapshot::new(self.model.model_id(), self.model.dimension());
        let mut keys: Vec<&String> = self.vectors.keys().collect();
        keys.sort();
        for key in keys {
            let text = self.texts.get(key).cloned().unwrap_or_default();
            snapshot.push(key.clone(), text, self.vectors[key].clone());
        }
        self.file.save(&snapshot)?;
        Ok(())
    }

    /// Embed a query with the query prefix.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>, IndexError> {
        let input = format!("{}{}", self.query_prefix, query);
        let mut vectors = self.model.embed(&[input.as_str()])?;
        Ok(vectors.pop().unwrap_or_default())
    }

    /// Cosine similarity of `query` with each candidate, aligned with
    /// `candidates`. Keys without a vector score 0.
    pub fn similarity<S: AsRef<str>>(&self, query: &[f32], candidates: &[S]) -> Vec<f64> {
        candidates
            .iter()
            .map(|key| {
                self.vectors
                    .get(key.as_ref())
                    .map(|v| cosine_similarity(query, v))
                    .unwrap_or(0.0)
            })
            .collect()
    }
}

/// Cosine similarity, 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tik_model::{HashEmbeddingModel, ModelInfo, ModelResult};

    /// Constant vectors under a chosen model id; optionally one short.
    #[derive(Debug)]
    struct FixedModel {
        info: ModelInfo,
        short: bool,
    }

    impl FixedModel {
        fn new(model_id: &str, dimension: usize) -> Self {
            Self {
                info: ModelInfo::new(model_id, dimension),
                short: false,
            }
        }
    }

    impl EmbeddingModel for FixedModel {
        fn embed(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>> {
            let count = if self.short {
                texts.len().saturating_sub(1)
            } else {
                texts.len()
            };
            Ok(vec![vec![1.0; self.info.dimension]; count])
        }

        fn dimension(&self) -> usize {
            self.info.dimension
        }

        fn model_info(&self) -> &ModelInfo {
            &self.info
        }
    }

    fn texts(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn open(dir: &TempDir, dimension: usize) -> EmbeddingStore {
        let config = EmbeddingConfig::default().with_dimension(dimension);
        EmbeddingStore::open(
            Arc::new(HashEmbeddingModel::new(dimension)),
            SnapshotFile::new(dir.path().join("embeddings.bin")),
            &config,
        )
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_add_entities_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 16);
        let added = store
            .add_entities(&texts(&[("a", "parses input"), ("b", "writes output")]))
            .unwrap();
        assert_eq!(added, 2);
        let vector_a = store.vector("a").unwrap().to_vec();

        let reopened = open(&dir, 16);
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.vector("a").unwrap(), vector_a.as_slice());
    }

    #[test]
    fn test_existing_vectors_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 8);
        store.add_entities(&texts(&[("a", "old text")])).unwrap();
        let before = store.vector("a").unwrap().to_vec();

        let added = store.add_entities(&texts(&[("a", "new text")])).unwrap();
        assert_eq!(added, 0);
        assert_eq!(store.vector("a").unwrap(), before.as_slice());

        assert_eq!(store.invalidate(["a"]), 1);
        store.add_entities(&texts(&[("a", "new text")])).unwrap();
        assert_ne!(store.vector("a").unwrap(), before.as_slice());
    }

    #[test]
    fn test_dimension_mismatch_snapshot_ignored() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 8);
        store.add_entities(&texts(&[("a", "text")])).unwrap();

        let other = open(&dir, 4);
        assert!(other.is_empty());
    }

    #[test]
    fn test_snapshot_of_other_model_ignored() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 8);
        store.add_entities(&texts(&[("a", "text")])).unwrap();

        let config = EmbeddingConfig::default().with_dimension(8);
        let mut other = EmbeddingStore::open(
            Arc::new(FixedModel::new("intfloat/e5-small-v2", 8)),
            SnapshotFile::new(dir.path().join("embeddings.bin")),
            &config,
        );
        assert!(other.is_empty());
        assert_eq!(other.add_entities(&texts(&[("a", "text")])).unwrap(), 1);
        assert_eq!(other.vector("a").unwrap(), vec![1.0; 8].as_slice());

        let reopened = EmbeddingStore::open(
            Arc::new(FixedModel::new("intfloat/e5-small-v2", 8)),
            SnapshotFile::new(dir.path().join("embeddings.bin")),
            &config,
        );
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_short_model_output_is_error() {
        let dir = TempDir::new().unwrap();
        let config = EmbeddingConfig::default().with_dimension(4);
        let mut store = EmbeddingStore::open(
            Arc::new(FixedModel {
                short: true,
                ..FixedModel::new("short", 4)
            }),
            SnapshotFile::new(dir.path().join("embeddings.bin")),
            &config,
        );

        let err = store
            .add_entities(&texts(&[("a", "alpha"), ("b", "beta")]))
            .unwrap_err();
        assert!(err.to_string().contains("returned 1 vectors for 2 inputs"));
        assert!(store.is_empty());
        assert!(!dir.path().join("embeddings.bin").exists());
    }

    #[test]
    fn test_similarity_aligned_with_candidates() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 8);
        store.add_entities(&texts(&[("a", "alpha")])).unwrap();
        let query = store.vector("a").unwrap().to_vec();

        let scores = store.similarity(&query, &["missing", "a", "also_missing"]);
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0], 0.0);
        assert!((scores[1] - 1.0).abs() < 1e-6);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_invalidate_all() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 8);
        store
            .add_entities(&texts(&[("a", "x"), ("b", "y")]))
            .unwrap();
        assert_eq!(store.invalidate_all(), 2);
        assert!(store.is_empty());
        assert_eq!(store.embed_query("q").unwrap().len(), 8);
    }
}
