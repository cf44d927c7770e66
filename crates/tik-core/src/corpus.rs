//! Corpus source readers.
//!
//! The engine never assumes where its input comes from: it consumes any
//! [`CorpusReader`]. Two readers are provided:
//!
//! - [`DirectoryCorpus`]: walks a directory tree, honouring `.gitignore`
//!   and `.tikignore`, filtered by extension and size
//! - [`InMemoryCorpus`]: fixed `(path, text)` pairs, for tests and embedding

use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::config::ExtractionConfig;
use crate::errors::IndexError;

/// Custom ignore file honoured by [`DirectoryCorpus`].
pub const TIK_IGNORE_FILENAME: &str = ".tikignore";

/// Directories that are never read, whatever the ignore files say.
pub const ALWAYS_IGNORED_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".mypy_cache",
    ".pytest_cache",
    ".tox",
];

/// One source file of the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the corpus root, `/`-separated.
    pub path: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// Supplies raw text per file.
pub trait CorpusReader: Send + Sync {
    /// All source files, sorted by path.
    fn read_sources(&self) -> Result<Vec<SourceFile>, IndexError>;

    /// Human-readable description for log lines.
    fn describe(&self) -> String;
}

// ============================================================================
// DirectoryCorpus
// ============================================================================

/// Reads source files below a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryCorpus {
    root: PathBuf,
    extensions: Vec<String>,
    max_file_size_bytes: u64,
}

impl DirectoryCorpus {
    pub fn new(root: impl Into<PathBuf>, config: &ExtractionConfig) -> Self {
        Self {
            root: root.into(),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            max_file_size_bytes: config.max_file_size_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn wanted(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|x| *x == ext))
    }

    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl CorpusReader for DirectoryCorpus {
    fn read_sources(&self) -> Result<Vec<SourceFile>, IndexError> {
        if !self.root.is_dir() {
            return Err(IndexError::Corpus {
                path: self.root.clone(),
                message: "corpus root is not a directory".to_string(),
            });
        }

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false)
            .add_custom_ignore_filename(TIK_IGNORE_FILENAME)
            .follow_links(false)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !ALWAYS_IGNORED_DIRS.contains(&name.as_ref())
            })
            .build();

        let mut sources = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) || !self.wanted(path) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.max_file_size_bytes {
                tracing::warn!(
                    "Skipping {} ({} bytes exceeds limit of {})",
                    path.display(),
                    size,
                    self.max_file_size_bytes
                );
                continue;
            }

            match fs::read_to_string(path) {
                Ok(text) => sources.push(SourceFile::new(self.relative(path), text)),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        sources.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(
            "Read {} source files from {}",
            sources.len(),
            self.root.display()
        );
        Ok(sources)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

// ============================================================================
// InMemoryCorpus
// ============================================================================

/// Fixed set of sources held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    sources: Vec<SourceFile>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.sources.push(SourceFile::new(path, text));
        self
    }
}

impl CorpusReader for InMemoryCorpus {
    fn read_sources(&self) -> Result<Vec<SourceFile>, IndexError> {
        let mut sources = self.sources.clone();
        sources.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(sources)
    }

    fn describe(&self) -> String {
        format!("{} in-memory sources", self.sources.len())
    }
}
