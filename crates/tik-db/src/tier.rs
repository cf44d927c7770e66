//! Tier-generic keyed record store.
//!
//! A [`TierStore`] owns one JSON file holding a mapping from entity key to
//! record. The same store is instantiated once per tier with the tier's
//! record type.
//!
//! ## File format
//!
//! UTF-8 JSON object, keys sorted, 2-space indentation, non-ASCII written
//! verbatim. Sorted keys make rewrites of unchanged data byte-identical.
//!
//! ## Read-modify-write discipline
//!
//! Every write is "load full tier, merge new keys, atomic replace". The file is
//! first written to `<path>.tmp`, synced, then renamed over the original, so an
//! interrupted save leaves either the old or the new content on disk.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DbError, DbResult};
use crate::records::TierRecord;

// ============================================================================
// Tier
// ============================================================================

/// The three cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Snippet,
    Edges,
    Descriptor,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Snippet, Tier::Edges, Tier::Descriptor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snippet => "snippet",
            Self::Edges => "edges",
            Self::Descriptor => "descriptor",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "snippet" | "snippets" | "l0" => Ok(Self::Snippet),
            "edges" | "edge" | "l1" => Ok(Self::Edges),
            "descriptor" | "descriptors" | "l2" => Ok(Self::Descriptor),
            other => Err(format!(
                "unknown tier '{other}' (expected snippet, edges or descriptor)"
            )),
        }
    }
}

// ============================================================================
// TierStore
// ============================================================================

/// Keyed record store backed by one JSON file.
#[derive(Debug)]
pub struct TierStore<R> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> R>,
}

impl<R: TierRecord> TierStore<R> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tier(&self) -> Tier {
        R::TIER
    }

    /// Load the tier, recovering from every storage fault.
    ///
    /// A missing or unreadable file yields an empty mapping. Records that fail
    /// validation are skipped individually and logged with their key.
    pub fn load(&self) -> BTreeMap<String, R> {
        match self.try_load() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(tier = %R::TIER, "{e}; treating tier as empty");
                BTreeMap::new()
            }
        }
    }

    /// Load the tier, surfacing storage faults. A missing file is not a fault.
    pub fn try_load(&self) -> DbResult<BTreeMap<String, R>> {
        let raw = self.load_raw()?;
        let mut records = BTreeMap::new();
        for (key, value) in raw {
            match parse_record::<R>(&key, value) {
                Ok(record) => {
                    records.insert(key, record);
                }
                Err(e) => tracing::warn!(tier = %R::TIER, key = %key, "Skipping record: {e}"),
            }
        }
        tracing::debug!(
            tier = %R::TIER,
            count = records.len(),
            "Loaded tier from {}",
            self.path.display()
        );
        Ok(records)
    }

    /// Load the untyped JSON mapping, for validation of on-disk content.
    pub fn load_raw(&self) -> DbResult<Map<String, Value>> {
        if !self.path.exists() {
            tracing::debug!(tier = %R::TIER, "No tier file at {}", self.path.display());
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| {
            DbError::tier_io(&self.path, format!("Failed to read tier file: {}", e))
        })?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str::<Map<String, Value>>(&content).map_err(|e| {
            DbError::tier_parse(&self.path, format!("Failed to parse tier file: {}", e))
        })
    }

    /// Write the full mapping atomically.
    pub fn save(&self, records: &BTreeMap<String, R>) -> DbResult<()> {
        let json = serde_json::to_string_pretty(records).map_err(|e| {
            DbError::tier_parse(&self.path, format!("Failed to serialize tier: {}", e))
        })?;
        write_atomic(&self.path, json.as_bytes())
            .map_err(|e| DbError::tier_io(&self.path, format!("Failed to write tier file: {}", e)))?;
        tracing::debug!(
            tier = %R::TIER,
            count = records.len(),
            "Saved tier to {}",
            self.path.display()
        );
        Ok(())
    }

    /// Overwrite the keys of `new_records` in the stored tier (last writer
    /// wins, no field-level merge), save, and return the merged mapping.
    pub fn merge(&self, new_records: BTreeMap<String, R>) -> DbResult<BTreeMap<String, R>> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // A corrupt tier is replaced on merge rather than blocking every write.
        let mut merged = self.load();
        let incoming = new_records.len();
        merged.extend(new_records);
        self.save(&merged)?;
        tracing::debug!(tier = %R::TIER, incoming, total = merged.len(), "Merged tier");
        Ok(merged)
    }

    pub fn validate(&self, records: &BTreeMap<String, R>) -> bool {
        validate_records(records)
    }

    pub fn stats(&self, records: &BTreeMap<String, R>) -> TierStats {
        tier_stats(records)
    }
}

fn parse_record<R: TierRecord>(key: &str, value: Value) -> DbResult<R> {
    let record: R =
        serde_json::from_value(value).map_err(|e| DbError::validation(key, e.to_string()))?;
    record.check(key)?;
    Ok(record)
}

/// Write `bytes` to `path` through a synced sibling temp file and a rename.
///
/// On failure the temp file is removed and the previous content of `path`
/// is left untouched.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);
    let result = (|| -> std::io::Result<()> {
        let file = fs::File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

// ============================================================================
// Diff
// ============================================================================

/// Key-level difference between two tier mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub changed: BTreeSet<String>,
}

impl TierDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compare two mappings by key and structural equality.
pub fn diff<V: PartialEq>(old: &BTreeMap<String, V>, new: &BTreeMap<String, V>) -> TierDiff {
    let mut result = TierDiff::default();
    for (key, value) in new {
        match old.get(key) {
            None => {
                result.added.insert(key.clone());
            }
            Some(previous) if previous != value => {
                result.changed.insert(key.clone());
            }
            Some(_) => {}
        }
    }
    result.removed = old
        .keys()
        .filter(|k| !new.contains_key(*k))
        .cloned()
        .collect();
    result
}

// ============================================================================
// Validation
// ============================================================================

/// Check every typed record; log the first violation and return false.
pub fn validate_records<R: TierRecord>(records: &BTreeMap<String, R>) -> bool {
    for (key, record) in records {
        if let Err(e) = record.check(key) {
            tracing::warn!(tier = %R::TIER, "Validation failed: {e}");
            return false;
        }
    }
    true
}

/// Check an untyped mapping for required fields and allowed enum values;
/// log the first violation and return false.
pub fn validate_raw<R: TierRecord>(raw: &Map<String, Value>) -> bool {
    for (key, value) in raw {
        let Some(object) = value.as_object() else {
            tracing::warn!(tier = %R::TIER, key = %key, "Validation failed: record is not an object");
            return false;
        };
        if let Some(field) = R::REQUIRED_FIELDS
            .iter()
            .find(|field| !object.contains_key(**field))
        {
            tracing::warn!(
                tier = %R::TIER,
                key = %key,
                "Validation failed: missing required field '{field}'"
            );
            return false;
        }
        if let Err(e) = parse_record::<R>(key, value.clone()) {
            tracing::warn!(tier = %R::TIER, "Validation failed: {e}");
            return false;
        }
    }
    true
}

// ============================================================================
// Stats
// ============================================================================

/// Summary statistics for one tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierStats {
    pub tier: Tier,
    pub count: usize,
    /// Mean of [`TierRecord::field_length`]: snippet chars, edge count, or
    /// purpose chars depending on the tier.
    pub avg_field_length: f64,
    /// Percentage of records per provenance, one decimal place.
    pub provenance_breakdown_pct: BTreeMap<String, f64>,
    pub distinct_containers: usize,
}

pub fn tier_stats<R: TierRecord>(records: &BTreeMap<String, R>) -> TierStats {
    let count = records.len();
    let mut by_provenance: BTreeMap<String, usize> = R::PROVENANCES
        .iter()
        .map(|p| (p.to_string(), 0))
        .collect();
    let mut containers = HashSet::new();
    let mut total_length = 0usize;

    for record in records.values() {
        *by_provenance
            .entry(record.provenance().to_string())
            .or_default() += 1;
        containers.insert(record.container_path());
        total_length += record.field_length();
    }

    let pct = |n: usize| {
        if count == 0 {
            0.0
        } else {
            (n as f64 * 1000.0 / count as f64).round() / 10.0
        }
    };

    TierStats {
        tier: R::TIER,
        count,
        avg_field_length: if count == 0 {
            0.0
        } else {
            total_length as f64 / count as f64
        },
        provenance_breakdown_pct: by_provenance
            .into_iter()
            .map(|(p, n)| (p, pct(n)))
            .collect(),
        distinct_containers: containers.len(),
    }
}
