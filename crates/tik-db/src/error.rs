//! Error types for tik-db.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tik-db operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in tik-db operations.
#[derive(Debug, Error)]
pub enum DbError {
    // ========================================================================
    // Tier store errors
    // ========================================================================
    /// Tier file could not be read or written.
    #[error("Tier store I/O error at {path}: {message}")]
    TierIo { path: PathBuf, message: String },

    /// Tier file content is not a keyed record mapping.
    #[error("Tier store parse error at {path}: {message}")]
    TierParse { path: PathBuf, message: String },

    /// A record failed required-field or enum checks.
    #[error("Invalid record '{key}': {message}")]
    Validation { key: String, message: String },

    /// An edge points at a key outside the entity set.
    #[error("Edge record '{key}' references unknown entity '{to}'")]
    DanglingEdge { key: String, to: String },

    /// An edge record lists the same (to, relation) pair twice.
    #[error("Edge record '{key}' repeats edge to '{to}' ({relation})")]
    DuplicateEdge {
        key: String,
        to: String,
        relation: String,
    },

    // ========================================================================
    // Embedding snapshot errors
    // ========================================================================
    /// Snapshot file could not be read or written.
    #[error("Embedding snapshot I/O error at {path}: {message}")]
    SnapshotIo { path: PathBuf, message: String },

    /// Snapshot file could not be decoded, or its columns are misaligned.
    #[error("Embedding snapshot parse error at {path}: {message}")]
    SnapshotParse { path: PathBuf, message: String },

    // ========================================================================
    // General errors
    // ========================================================================
    /// IO error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Create a tier I/O error.
    pub fn tier_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::TierIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a tier parse error.
    pub fn tier_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::TierParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a validation error for one record.
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a snapshot I/O error.
    pub fn snapshot_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SnapshotIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a snapshot parse error.
    pub fn snapshot_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SnapshotParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for faults caused by unreadable or corrupt backing files.
    pub fn is_storage_fault(&self) -> bool {
        matches!(
            self,
            Self::TierIo { .. }
                | Self::TierParse { .. }
                | Self::SnapshotIo { .. }
                | Self::SnapshotParse { .. }
                | Self::Io(_)
        )
    }
}
