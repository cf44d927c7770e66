//! # tik-model
//!
//! Capability layer for TIK - embeddings and text generation.
//!
//! Both capabilities are pluggable traits; the index engine never assumes a
//! particular model or backend. This crate provides:
//!
//! - **Embedding models**: [`EmbeddingModel`] trait, a deterministic
//!   placeholder ([`HashEmbeddingModel`]) and an HTTP model
//! - **Generation**: [`GenerationCapability`] trait and a blocking HTTP client
//! - **Retry**: [`RetryPolicy`], the single retryable-call abstraction used by
//!   every generation caller
//!
//! ## Features
//!
//! - `http` (default): remote embedding/generation over HTTP via `reqwest`
//!
//! ## Usage
//!
//! ```ignore
//! use tik_model::{create_embedding_model, EmbeddingConfig, EmbeddingModel};
//!
//! let model = create_embedding_model(&EmbeddingConfig::default())?;
//! let vectors = model.embed(&["query: parse config"])?;
//! assert_eq!(vectors[0].len(), model.dimension());
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod retry;

pub use config::{EmbeddingConfig, GenerationConfig, ModelInfo};
pub use embedding::{create_embedding_model, HashEmbeddingModel, PLACEHOLDER_MODEL_ID};
#[cfg(feature = "http")]
pub use embedding::HttpEmbeddingModel;
pub use error::{ModelError, ModelResult};
#[cfg(feature = "http")]
pub use generation::HttpGenerationClient;
pub use generation::{
    parse_json_array, parse_json_object, GenerationCapability, GenerationRequest,
    GenerationResponse,
};
pub use retry::RetryPolicy;

/// Default embedding model ID recorded when no remote model is configured.
pub const DEFAULT_EMBEDDING_MODEL_ID: &str = "intfloat/e5-small-v2";

// ============================================================================
// Embedding Model Trait
// ============================================================================

/// Trait for embedding models.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow use across threads.
pub trait EmbeddingModel: Send + Sync + std::fmt::Debug {
    /// Generate embeddings for a batch of texts.
    ///
    /// Returns one vector of length `dimension()` per input text.
    fn embed(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>>;

    /// Generate embeddings for owned strings.
    fn embed_batch(&self, texts: &[String]) -> ModelResult<Vec<Vec<f32>>> {
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        self.embed(&refs)
    }

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get model information (ID, dimension).
    fn model_info(&self) -> &ModelInfo;

    /// Get the model ID.
    fn model_id(&self) -> &str {
        &self.model_info().model_id
    }

    /// True for models whose vectors carry no semantics.
    fn is_placeholder(&self) -> bool {
        false
    }
}
