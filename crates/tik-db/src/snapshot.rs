//! Embedding snapshot file.
//!
//! Uses bincode v2 for a compact binary encoding of the aligned
//! `{ids, texts, vectors}` columns. The snapshot is loaded wholesale at
//! startup and replaced wholesale (atomic rename) on every update.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use bincode::{config, Decode, Encode};

use crate::error::{DbError, DbResult};
use crate::tier::write_atomic;

/// Persisted embedding vectors with their source texts.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct EmbeddingSnapshot {
    /// Format version for compatibility checks.
    pub version: u32,
    /// Model that produced the vectors.
    pub model_id: String,
    pub dimension: u32,
    /// Unix epoch seconds of the last write.
    pub built_at: i64,
    pub ids: Vec<String>,
    pub texts: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
}

impl EmbeddingSnapshot {
    /// Current snapshot version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            model_id: model_id.into(),
            dimension: dimension as u32,
            built_at: chrono::Utc::now().timestamp(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, id: impl Into<String>, text: impl Into<String>, vector: Vec<f32>) {
        self.ids.push(id.into());
        self.texts.push(text.into());
        self.vectors.push(vector);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Columns have equal length and every vector has the declared dimension.
    fn check_alignment(&self) -> Result<(), String> {
        if self.ids.len() != self.texts.len() || self.ids.len() != self.vectors.len() {
            return Err(format!(
                "misaligned columns: {} ids, {} texts, {} vectors",
                self.ids.len(),
                self.texts.len(),
                self.vectors.len()
            ));
        }
        if let Some((i, v)) = self
            .vectors
            .iter()
            .enumerate()
            .find(|(_, v)| v.len() != self.dimension as usize)
        {
            return Err(format!(
                "vector for '{}' has dimension {}, expected {}",
                self.ids[i],
                v.len(),
                self.dimension
            ));
        }
        Ok(())
    }
}

/// Location of the snapshot on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the snapshot.
    ///
    /// Returns `None` when no snapshot exists or its version is outdated.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be decoded.
    pub fn load(&self) -> DbResult<Option<EmbeddingSnapshot>> {
        if !self.path.exists() {
            tracing::debug!("No embedding snapshot found at {}", self.path.display());
            return Ok(None);
        }

        let file = fs::File::open(&self.path).map_err(|e| {
            DbError::snapshot_io(&self.path, format!("Failed to open snapshot: {}", e))
        })?;
        let mut reader = BufReader::new(file);
        let snapshot: EmbeddingSnapshot =
            bincode::decode_from_std_read(&mut reader, config::standard()).map_err(|e| {
                DbError::snapshot_parse(&self.path, format!("Failed to decode snapshot: {}", e))
            })?;

        if snapshot.version != EmbeddingSnapshot::CURRENT_VERSION {
            tracing::warn!(
                "Embedding snapshot version mismatch: found {}, expected {}. Vectors will be rebuilt.",
                snapshot.version,
                EmbeddingSnapshot::CURRENT_VERSION
            );
            return Ok(None);
        }
        snapshot
            .check_alignment()
            .map_err(|message| DbError::snapshot_parse(&self.path, message))?;

        tracing::debug!(
            "Loaded embedding snapshot from {}: {} vectors",
            self.path.display(),
            snapshot.len()
        );
        Ok(Some(snapshot))
    }

    /// Replace the snapshot on disk.
    pub fn save(&self, snapshot: &EmbeddingSnapshot) -> DbResult<()> {
        snapshot
            .check_alignment()
            .map_err(|message| DbError::snapshot_parse(&self.path, message))?;
        let bytes = bincode::encode_to_vec(snapshot, config::standard()).map_err(|e| {
            DbError::snapshot_parse(&self.path, format!("Failed to encode snapshot: {}", e))
        })?;
        write_atomic(&self.path, &bytes).map_err(|e| {
            DbError::snapshot_io(&self.path, format!("Failed to write snapshot: {}", e))
        })?;
        tracing::debug!(
            "Saved embedding snapshot to {}: {} vectors",
            self.path.display(),
            snapshot.len()
        );
        Ok(())
    }

    /// Delete the snapshot. Returns whether a file was removed.
    pub fn remove(&self) -> DbResult<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path).map_err(|e| {
            DbError::snapshot_io(&self.path, format!("Failed to remove snapshot: {}", e))
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> EmbeddingSnapshot {
        let mut snapshot = EmbeddingSnapshot::new("hash-placeholder", 3);
        snapshot.push("A", "parses input", vec![1.0, 0.0, 0.0]);
        snapshot.push("B", "writes output", vec![0.0, 1.0, 0.0]);
        snapshot
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(dir.path().join("embeddings.bin"));
        assert!(file.load().unwrap().is_none());
        assert!(!file.remove().unwrap());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(dir.path().join("data").join("embeddings.bin"));
        let snapshot = sample();
        file.save(&snapshot).unwrap();

        let loaded = file.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(file.remove().unwrap());
        assert!(!file.exists());
    }

    #[test]
    fn test_misaligned_snapshot_rejected_on_save() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(dir.path().join("embeddings.bin"));
        let mut snapshot = sample();
        snapshot.texts.pop();
        assert!(matches!(
            file.save(&snapshot),
            Err(DbError::SnapshotParse { .. })
        ));
        assert!(!file.exists());
    }

    #[test]
    fn test_corrupt_snapshot_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("embeddings.bin");
        fs::write(&path, [0xff, 0xff, 0xff]).unwrap();
        let err = SnapshotFile::new(&path).load().unwrap_err();
        assert!(err.is_storage_fault());
    }

    #[test]
    fn test_old_version_is_ignored() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(dir.path().join("embeddings.bin"));
        let mut snapshot = sample();
        snapshot.version = 0;
        file.save(&snapshot).unwrap();
        assert!(file.load().unwrap().is_none());
    }
}
