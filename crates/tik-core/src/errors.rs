//! Error types for tik-core.

use std::path::PathBuf;

use thiserror::Error;
use tik_db::DbError;
use tik_model::ModelError;

/// Domain-specific errors for index operations.
///
/// Only configuration errors stop initialization; storage faults on read,
/// unresolved references and generation failures are all recovered inside
/// the pipeline.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Configuration file exists but cannot be read or parsed.
    #[error("Config invalid: {0}")]
    InvalidConfig(String),

    /// A configuration value is invalid.
    ///
    /// Raised by [`crate::IndexConfig::validate`] before any tier is touched.
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfiguration {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    /// The requested entity key is not indexed.
    #[error("Entity `{0}` not found.")]
    EntityNotFound(String),

    /// A source file could not be parsed.
    #[error("Failed to parse {path}: {message}")]
    Extraction {
        /// Source file being parsed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The corpus root could not be walked.
    #[error("Corpus error at {path}: {message}")]
    Corpus {
        /// Root or file that failed.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Tier store or snapshot failure.
    #[error(transparent)]
    Storage(#[from] DbError),

    /// Embedding or generation capability failure.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IndexError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// True for the only fault class that prevents startup.
    pub fn is_config_fault(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::InvalidConfiguration { .. }
        )
    }
}
