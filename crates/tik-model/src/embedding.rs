//! Embedding model implementations.
//!
//! - [`HashEmbeddingModel`]: deterministic placeholder, seeded by a content
//!   hash. Vectors carry no semantics; callers treat them as degraded.
//! - [`HttpEmbeddingModel`] (feature `http`): remote model speaking the
//!   `{model, input} -> {embeddings}` protocol.

use crate::config::{EmbeddingConfig, ModelInfo};
use crate::error::{ModelError, ModelResult};
use crate::EmbeddingModel;

/// Model ID recorded for placeholder vectors.
pub const PLACEHOLDER_MODEL_ID: &str = "hash-placeholder";

// ============================================================================
// HashEmbeddingModel
// ============================================================================

/// Deterministic, semantics-free embedding model.
///
/// Identical text always yields the identical unit vector, across processes
/// and toolchains (the seed is FNV-1a, not the std hasher).
#[derive(Debug, Clone)]
pub struct HashEmbeddingModel {
    info: ModelInfo,
}

impl HashEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self {
            info: ModelInfo::new(PLACEHOLDER_MODEL_ID, dimension),
        }
    }

    fn seed(text: &str) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
        text.bytes().fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
    }

    fn hash_to_embedding(&self, text: &str) -> Vec<f32> {
        let mut state = Self::seed(text);
        let mut embedding = Vec::with_capacity(self.info.dimension);

        for _ in 0..self.info.dimension {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let value = ((state >> 33) as f32 / (u32::MAX as f32 / 2.0)) - 1.0;
            embedding.push(value);
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

impl EmbeddingModel for HashEmbeddingModel {
    fn embed(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.hash_to_embedding(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.info.dimension
    }

    fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}

// ============================================================================
// HttpEmbeddingModel
// ============================================================================

#[cfg(feature = "http")]
pub use http::HttpEmbeddingModel;

#[cfg(feature = "http")]
mod http {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::generation::map_transport_error;

    #[derive(Serialize)]
    struct EmbedRequest<'a> {
        model: &'a str,
        input: &'a [&'a str],
    }

    #[derive(Deserialize)]
    struct EmbedResponse {
        embeddings: Vec<Vec<f32>>,
    }

    /// Embedding model served over HTTP.
    #[derive(Debug)]
    pub struct HttpEmbeddingModel {
        endpoint: String,
        timeout_secs: u64,
        info: ModelInfo,
        client: reqwest::blocking::Client,
    }

    impl HttpEmbeddingModel {
        pub fn new(config: &EmbeddingConfig) -> ModelResult<Self> {
            let endpoint = config
                .endpoint
                .clone()
                .filter(|e| !e.trim().is_empty())
                .ok_or_else(|| ModelError::InvalidConfig {
                    message: "embedding endpoint is not set".to_string(),
                })?;
            let client = reqwest::blocking::Client::builder()
                .timeout(config.timeout())
                .build()
                .map_err(|e| ModelError::InvalidConfig {
                    message: format!("failed to build HTTP client: {e}"),
                })?;
            Ok(Self {
                endpoint,
                timeout_secs: config.timeout_secs,
                info: ModelInfo::new(config.model_id.clone(), config.dimension),
                client,
            })
        }
    }

    impl EmbeddingModel for HttpEmbeddingModel {
        fn embed(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>> {
            let body = EmbedRequest {
                model: &self.info.model_id,
                input: texts,
            };
            let response = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .map_err(|e| map_transport_error(&self.endpoint, self.timeout_secs, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ModelError::embedding_failed(
                    &self.info.model_id,
                    format!("HTTP {status}"),
                ));
            }
            let parsed: EmbedResponse = response.json().map_err(|e| {
                ModelError::embedding_failed(&self.info.model_id, format!("bad response: {e}"))
            })?;

            if parsed.embeddings.len() != texts.len() {
                return Err(ModelError::embedding_failed(
                    &self.info.model_id,
                    format!(
                        "expected {} vectors, got {}",
                        texts.len(),
                        parsed.embeddings.len()
                    ),
                ));
            }
            if let Some(v) = parsed
                .embeddings
                .iter()
                .find(|v| v.len() != self.info.dimension)
            {
                return Err(ModelError::DimensionMismatch {
                    expected: self.info.dimension,
                    actual: v.len(),
                });
            }
            Ok(parsed.embeddings)
        }

        fn dimension(&self) -> usize {
            self.info.dimension
        }

        fn model_info(&self) -> &ModelInfo {
            &self.info
        }
    }
}

/// Build the configured embedding model, or the placeholder when no
/// endpoint is set.
pub fn create_embedding_model(config: &EmbeddingConfig) -> ModelResult<Box<dyn EmbeddingModel>> {
    match config.endpoint.as_deref().map(str::trim) {
        None | Some("") => Ok(Box::new(HashEmbeddingModel::new(config.dimension))),
        #[cfg(feature = "http")]
        Some(_) => Ok(Box::new(HttpEmbeddingModel::new(config)?)),
        #[cfg(not(feature = "http"))]
        Some(endpoint) => Err(ModelError::InvalidConfig {
            message: format!("embedding endpoint '{endpoint}' requires the `http` feature"),
        }),
    }
}
