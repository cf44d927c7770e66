//! Tier record schemas.
//!
//! One concrete record type per cache tier:
//! - [`SnippetRecord`] - exact source text of an entity
//! - [`EdgeRecord`] - resolved neighbors of an entity
//! - [`DescriptorRecord`] - semantic summary of an entity
//!
//! All records are keyed by entity key (e.g. `"Container.method"`) in the tier
//! file and share the `kind`, `containerPath` and `provenance` fields.
//!
//! ## JSON Field Names
//!
//! All structs use camelCase for JSON serialization. Descriptors written by
//! older tooling with `edge_cases` are still accepted on read.
//!
//! ## Example
//!
//! ```json
//! {
//!   "Parser.parse": {
//!     "edges": [{"to": "Parser.tokenize", "relation": "calls", "direction": "outgoing"}],
//!     "kind": "function",
//!     "containerPath": "src/parser.py",
//!     "provenance": "AST"
//!   }
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::tier::Tier;

// ============================================================================
// Shared enums
// ============================================================================

/// Structural kind of an indexed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Class,
    Function,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record came from.
///
/// Each tier accepts only a subset, see [`TierRecord::PROVENANCES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provenance {
    /// Static analysis of the syntax tree.
    #[serde(rename = "AST")]
    Ast,
    /// Registered by hand through the engine API.
    Manual,
    /// Produced by the external generation capability.
    GenerationService,
    /// Deterministic construction from static facts.
    Fallback,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ast => "AST",
            Self::Manual => "Manual",
            Self::GenerationService => "GenerationService",
            Self::Fallback => "Fallback",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed relation carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Calls,
    Contains,
    Assigns,
    Imports,
    Unknown,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Contains => "contains",
            Self::Assigns => "assigns",
            Self::Imports => "imports",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a relation tag as written in raw adjacency suffixes or by the
    /// generation service. Anything unrecognized maps to `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "" | "call" | "calls" => Self::Calls,
            "contain" | "contains" => Self::Contains,
            "assign" | "assigns" => Self::Assigns,
            "import" | "imports" => Self::Imports,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::from_tag(s) {
            Self::Unknown if !s.trim().eq_ignore_ascii_case("unknown") => {
                Err(format!("unknown relation '{s}'"))
            }
            relation => Ok(relation),
        }
    }
}

/// Orientation of an edge relative to the record owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    /// The record owner points at `to`.
    #[default]
    Outgoing,
    /// `to` points at the record owner.
    Incoming,
}

impl EdgeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
        }
    }
}

// ============================================================================
// TierRecord
// ============================================================================

/// Common contract of the three tier record types.
///
/// The store is generic over this trait; everything tier-specific (required
/// fields, allowed provenance, the length used for statistics) lives here.
pub trait TierRecord:
    Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync
{
    /// Tier this record type belongs to.
    const TIER: Tier;

    /// JSON fields every record must carry.
    const REQUIRED_FIELDS: &'static [&'static str];

    /// Provenance values allowed in this tier.
    const PROVENANCES: &'static [Provenance];

    fn kind(&self) -> EntityKind;

    fn container_path(&self) -> &str;

    fn provenance(&self) -> Provenance;

    /// Size of the tier's payload field, averaged by tier statistics.
    fn field_length(&self) -> usize;

    /// Tier-specific invariants beyond what deserialization enforces.
    fn check_payload(&self) -> Result<(), String>;

    /// Check all record invariants, tagging failures with `key`.
    fn check(&self, key: &str) -> DbResult<()> {
        if !Self::PROVENANCES.contains(&self.provenance()) {
            return Err(DbError::validation(
                key,
                format!(
                    "provenance '{}' not allowed in {} tier",
                    self.provenance(),
                    Self::TIER
                ),
            ));
        }
        self.check_payload()
            .map_err(|message| DbError::validation(key, message))
    }
}

// ============================================================================
// SnippetRecord
// ============================================================================

/// Tier 1: the exact source text of an entity.
///
/// The snippet is never truncated in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetRecord {
    pub snippet: String,
    pub kind: EntityKind,
    pub container_path: String,
    pub provenance: Provenance,
}

impl SnippetRecord {
    /// Snippet extracted from the syntax tree.
    pub fn from_source(
        snippet: impl Into<String>,
        kind: EntityKind,
        container_path: impl Into<String>,
    ) -> Self {
        Self {
            snippet: snippet.into(),
            kind,
            container_path: container_path.into(),
            provenance: Provenance::Ast,
        }
    }

    /// Snippet registered by hand.
    pub fn manual(
        snippet: impl Into<String>,
        kind: EntityKind,
        container_path: impl Into<String>,
    ) -> Self {
        Self {
            provenance: Provenance::Manual,
            ..Self::from_source(snippet, kind, container_path)
        }
    }
}

impl TierRecord for SnippetRecord {
    const TIER: Tier = Tier::Snippet;
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["snippet", "kind", "containerPath", "provenance"];
    const PROVENANCES: &'static [Provenance] = &[Provenance::Ast, Provenance::Manual];

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn container_path(&self) -> &str {
        &self.container_path
    }

    fn provenance(&self) -> Provenance {
        self.provenance
    }

    fn field_length(&self) -> usize {
        self.snippet.chars().count()
    }

    fn check_payload(&self) -> Result<(), String> {
        if self.snippet.trim().is_empty() {
            return Err("snippet is empty".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// EdgeRecord
// ============================================================================

/// One neighbor of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRef {
    pub to: String,
    pub relation: Relation,
    #[serde(default)]
    pub direction: EdgeDirection,
    /// Short justification, only set for polished edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EdgeRef {
    pub fn outgoing(to: impl Into<String>, relation: Relation) -> Self {
        Self {
            to: to.into(),
            relation,
            direction: EdgeDirection::Outgoing,
            reason: None,
        }
    }

    pub fn incoming(to: impl Into<String>, relation: Relation) -> Self {
        Self {
            direction: EdgeDirection::Incoming,
            ..Self::outgoing(to, relation)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Tier 2: the resolved, undirected neighbor list of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRecord {
    pub edges: Vec<EdgeRef>,
    pub kind: EntityKind,
    pub container_path: String,
    pub provenance: Provenance,
}

impl EdgeRecord {
    /// Reject the record if any edge targets a key outside the entity set,
    /// or repeats a `(to, relation)` pair.
    pub fn ensure_targets<F>(&self, key: &str, is_known: F) -> DbResult<()>
    where
        F: Fn(&str) -> bool,
    {
        for edge in &self.edges {
            if !is_known(&edge.to) {
                return Err(DbError::DanglingEdge {
                    key: key.to_string(),
                    to: edge.to.clone(),
                });
            }
        }
        match self.first_duplicate() {
            Some(edge) => Err(DbError::DuplicateEdge {
                key: key.to_string(),
                to: edge.to.clone(),
                relation: edge.relation.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn first_duplicate(&self) -> Option<&EdgeRef> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .find(|edge| !seen.insert((edge.to.as_str(), edge.relation)))
    }

    /// Outgoing neighbors only.
    pub fn outgoing(&self) -> impl Iterator<Item = &EdgeRef> {
        self.edges
            .iter()
            .filter(|e| e.direction == EdgeDirection::Outgoing)
    }
}

impl TierRecord for EdgeRecord {
    const TIER: Tier = Tier::Edges;
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["edges", "kind", "containerPath", "provenance"];
    const PROVENANCES: &'static [Provenance] =
        &[Provenance::Ast, Provenance::GenerationService];

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn container_path(&self) -> &str {
        &self.container_path
    }

    fn provenance(&self) -> Provenance {
        self.provenance
    }

    fn field_length(&self) -> usize {
        self.edges.len()
    }

    fn check_payload(&self) -> Result<(), String> {
        if let Some(edge) = self.edges.iter().find(|e| e.to.trim().is_empty()) {
            return Err(format!("edge with empty target ({})", edge.relation));
        }
        match self.first_duplicate() {
            Some(edge) => Err(format!(
                "duplicate edge to '{}' ({})",
                edge.to, edge.relation
            )),
            None => Ok(()),
        }
    }
}

// ============================================================================
// DescriptorRecord
// ============================================================================

/// Semantic summary of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub purpose: String,
    pub uses: Vec<String>,
    pub returns: String,
    #[serde(alias = "edge_cases")]
    pub edge_cases: String,
}

/// Tier 3: the semantic descriptor of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorRecord {
    pub descriptor: Descriptor,
    pub kind: EntityKind,
    pub container_path: String,
    pub provenance: Provenance,
}

impl TierRecord for DescriptorRecord {
    const TIER: Tier = Tier::Descriptor;
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["descriptor", "kind", "containerPath", "provenance"];
    const PROVENANCES: &'static [Provenance] =
        &[Provenance::GenerationService, Provenance::Fallback];

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn container_path(&self) -> &str {
        &self.container_path
    }

    fn provenance(&self) -> Provenance {
        self.provenance
    }

    fn field_length(&self) -> usize {
        self.descriptor.purpose.chars().count()
    }

    fn check_payload(&self) -> Result<(), String> {
        if self.descriptor.purpose.trim().is_empty() {
            return Err("descriptor purpose is empty".to_string());
        }
        Ok(())
    }
}
