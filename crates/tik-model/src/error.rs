//! Error types for tik-model.
//!
//! Every generation failure is classified as retryable or fatal through
//! [`ModelError::is_retryable`], which drives [`crate::RetryPolicy`].

use thiserror::Error;

/// Result type alias for tik-model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur in tik-model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    // ========================================================================
    // Embedding errors
    // ========================================================================
    /// Embedding generation failed.
    #[error("Embedding failed for model '{model_id}': {message}")]
    EmbeddingFailed { model_id: String, message: String },

    /// Model returned vectors of the wrong size.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // ========================================================================
    // Generation errors
    // ========================================================================
    /// The generation endpoint could not be reached.
    #[error("Generation service unavailable at {endpoint}: {message}")]
    GenerationUnavailable { endpoint: String, message: String },

    /// The generation call exceeded its timeout.
    #[error("Generation call to {endpoint} timed out after {timeout_secs}s")]
    GenerationTimeout { endpoint: String, timeout_secs: u64 },

    /// The service answered with a non-success HTTP status.
    #[error("Generation service returned HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// The service answered `success: false`.
    #[error("Generation rejected: {message}")]
    GenerationRejected { message: String },

    /// Content was not the strict JSON shape that was asked for.
    #[error("Malformed generation content: {message}")]
    MalformedContent { message: String },

    // ========================================================================
    // Configuration errors
    // ========================================================================
    /// Client could not be constructed from its configuration.
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    // ========================================================================
    // I/O errors
    // ========================================================================
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Create a malformed content error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedContent {
            message: message.into(),
        }
    }

    /// Create an embedding failed error.
    pub fn embedding_failed(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EmbeddingFailed {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Client errors (4xx other than 429) and configuration problems are
    /// fatal; everything transient or content-related is retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::GenerationUnavailable { .. }
            | Self::GenerationTimeout { .. }
            | Self::GenerationRejected { .. }
            | Self::MalformedContent { .. }
            | Self::Json(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::EmbeddingFailed { .. }
            | Self::DimensionMismatch { .. }
            | Self::InvalidConfig { .. }
            | Self::Io(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ModelError::malformed("prose").is_retryable());
        assert!(ModelError::HttpStatus {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(ModelError::HttpStatus {
            status: 429,
            message: String::new()
        }
        .is_retryable());
        assert!(!ModelError::HttpStatus {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!ModelError::InvalidConfig {
            message: String::new()
        }
        .is_retryable());
    }
}
