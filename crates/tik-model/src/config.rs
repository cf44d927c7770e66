//! Configuration types for the embedding and generation capabilities.
//!
//! Both sections deserialize with every field defaulted so a partial YAML
//! block is always accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

// ============================================================================
// ModelInfo
// ============================================================================

/// Information about an embedding model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier.
    pub model_id: String,
    /// Embedding dimension.
    pub dimension: usize,
}

impl ModelInfo {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
        }
    }
}

// ============================================================================
// EmbeddingConfig
// ============================================================================

/// Configuration for the embedding capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    /// Remote embedding endpoint. When unset the placeholder model is used.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model ID sent to the endpoint and recorded in the snapshot.
    #[serde(default = "default_embedding_model_id")]
    pub model_id: String,

    /// Vector dimension.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Texts per embedding call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Prefix for entity texts (e5-style models expect `passage: `).
    #[serde(default = "default_passage_prefix")]
    pub passage_prefix: String,

    /// Prefix for query texts.
    #[serde(default = "default_query_prefix")]
    pub query_prefix: String,

    /// Per-call timeout in seconds for the remote endpoint.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_model_id() -> String {
    crate::DEFAULT_EMBEDDING_MODEL_ID.to_string()
}

fn default_dimension() -> usize {
    384
}

fn default_batch_size() -> usize {
    32
}

fn default_passage_prefix() -> String {
    "passage: ".to_string()
}

fn default_query_prefix() -> String {
    "query: ".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model_id: default_embedding_model_id(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            passage_prefix: default_passage_prefix(),
            query_prefix: default_query_prefix(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// GenerationConfig
// ============================================================================

/// Configuration for the text generation capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Generation endpoint URL. `None` disables generation entirely.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model selector passed through to the service.
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per call, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff unit between attempts, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_generation_model() -> String {
    "FAST".to_string()
}

fn default_generation_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    crate::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    crate::retry::DEFAULT_BACKOFF.as_millis() as u64
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_generation_model(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl GenerationConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_default() {
        let config = GenerationConfig::default();
        assert!(config.endpoint.is_none());
        assert_eq!(config.model, "FAST");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Duration::from_secs(2));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EmbeddingConfig = serde_json::from_str(r#"{"dimension": 8}"#).unwrap();
        assert_eq!(config.dimension, 8);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.query_prefix, "query: ");
    }
}
