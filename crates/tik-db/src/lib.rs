//! # tik-db
//!
//! Storage layer for TIK - the three record cache tiers and the embedding
//! snapshot file.
//!
//! This crate owns everything that touches disk. The domain logic in
//! `tik-core` only sees typed records and never reads tier files directly.
//!
//! ## Architecture
//!
//! ```text
//! tik-cli → tik-core → tik-db (tier stores, snapshot file)
//!                    → tik-model (embedding / generation capabilities)
//! ```
//!
//! ## Tiers
//!
//! | Tier         | Record             | Provenance               |
//! |--------------|--------------------|--------------------------|
//! | `snippet`    | [`SnippetRecord`]    | `AST`, `Manual`            |
//! | `edges`      | [`EdgeRecord`]       | `AST`, `GenerationService` |
//! | `descriptor` | [`DescriptorRecord`] | `GenerationService`, `Fallback` |
//!
//! ## Usage
//!
//! ```ignore
//! use tik_db::{SnippetRecord, TierStore};
//!
//! let store: TierStore<SnippetRecord> = TierStore::new("data/snippet_tier.json");
//! let records = store.load();
//! let merged = store.merge(new_records)?;
//! ```

pub mod error;
pub mod records;
pub mod snapshot;
pub mod tier;

pub use error::{DbError, DbResult};
pub use records::{
    Descriptor, DescriptorRecord, EdgeDirection, EdgeRecord, EdgeRef, EntityKind, Provenance,
    Relation, SnippetRecord, TierRecord,
};
pub use snapshot::{EmbeddingSnapshot, SnapshotFile};
pub use tier::{diff, tier_stats, validate_raw, validate_records, Tier, TierDiff, TierStats, TierStore};
