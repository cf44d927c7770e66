//! Indexed entities.
//!
//! An [`Entity`] is created by the extractor (or registered manually) and
//! never mutated afterwards. Its tier attachments (snippet, edges,
//! descriptor) live in the tier stores and the engine snapshot, not here.

use serde::{Deserialize, Serialize};
use tik_db::EntityKind;

/// Default weight of a class entity.
pub const CLASS_WEIGHT: f64 = 2.0;

/// Default weight of a function entity.
pub const FUNCTION_WEIGHT: f64 = 1.5;

/// Static facts about an entity, known without any generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    /// Base purpose sentence derived from kind, name and location.
    pub purpose: String,
    /// Lowercase tokens matched against query words.
    pub query_patterns: Vec<String>,
    /// Return semantics: annotation text, `instance` or `result`.
    pub returns: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    /// Parameter names, without `self`/`cls`.
    #[serde(default)]
    pub args: Vec<String>,
}

/// One indexed code unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique key, `Container.name` for nested definitions.
    pub key: String,
    pub kind: EntityKind,
    pub weight: f64,
    /// Key of the enclosing class or function, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_key: Option<String>,
    /// Source file the entity was found in.
    pub container_path: String,
    pub contract: Contract,
}

impl Entity {
    /// Short name: the last segment of the key.
    pub fn name(&self) -> &str {
        self.key.rsplit('.').next().unwrap_or(&self.key)
    }

    /// Whether any pattern equals one of the lowercase query tokens.
    pub fn matches_any(&self, tokens: &[String]) -> bool {
        self.contract
            .query_patterns
            .iter()
            .any(|p| tokens.iter().any(|t| t == p))
    }

    /// Text embedded for this entity when no descriptor is available.
    pub fn embedding_text(&self) -> &str {
        &self.contract.purpose
    }
}

/// Default query patterns for a key: the short name and the full key,
/// lowercased and deduplicated.
pub fn default_patterns(key: &str) -> Vec<String> {
    let full = key.to_lowercase();
    let short = full.rsplit('.').next().unwrap_or(&full).to_string();
    if short == full {
        vec![full]
    } else {
        vec![short, full]
    }
}

/// Default weight for a kind.
pub fn default_weight(kind: EntityKind) -> f64 {
    match kind {
        EntityKind::Class => CLASS_WEIGHT,
        EntityKind::Function => FUNCTION_WEIGHT,
    }
}

// ============================================================================
// ManualEntity
// ============================================================================

/// Entity registered through the engine API instead of extracted.
///
/// Its snippet is stored with `Manual` provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEntity {
    pub key: String,
    pub kind: EntityKind,
    pub weight: f64,
    pub snippet: String,
    #[serde(default = "default_manual_path")]
    pub container_path: String,
    #[serde(default)]
    pub query_patterns: Vec<String>,
    #[serde(default)]
    pub purpose: Option<String>,
}

fn default_manual_path() -> String {
    "manual".to_string()
}

impl ManualEntity {
    pub fn new(key: impl Into<String>, kind: EntityKind, snippet: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind,
            weight: default_weight(kind),
            snippet: snippet.into(),
            container_path: default_manual_path(),
            query_patterns: Vec::new(),
            purpose: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn to_entity(&self) -> Entity {
        let patterns = if self.query_patterns.is_empty() {
            default_patterns(&self.key)
        } else {
            self.query_patterns.iter().map(|p| p.to_lowercase()).collect()
        };
        let container_key = self
            .key
            .rsplit_once('.')
            .map(|(container, _)| container.to_string());
        Entity {
            key: self.key.clone(),
            kind: self.kind,
            weight: self.weight,
            container_key,
            container_path: self.container_path.clone(),
            contract: Contract {
                purpose: self.purpose.clone().unwrap_or_else(|| {
                    format!("{} `{}` registered manually.", capitalized(self.kind), self.key)
                }),
                query_patterns: patterns,
                returns: match self.kind {
                    EntityKind::Class => "instance".to_string(),
                    EntityKind::Function => "result".to_string(),
                },
                docstring: None,
                args: Vec::new(),
            },
        }
    }
}

pub(crate) fn capitalized(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Class => "Class",
        EntityKind::Function => "Function",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns() {
        assert_eq!(default_patterns("Parser.Parse"), vec!["parse", "parser.parse"]);
        assert_eq!(default_patterns("main"), vec!["main"]);
    }

    #[test]
    fn test_manual_entity() {
        let entity = ManualEntity::new("Store.save", EntityKind::Function, "def save(self): ...")
            .with_weight(1.0)
            .with_patterns(["Persist"])
            .to_entity();
        assert_eq!(entity.weight, 1.0);
        assert_eq!(entity.container_key.as_deref(), Some("Store"));
        assert_eq!(entity.contract.query_patterns, vec!["persist"]);
        assert!(!entity.contract.purpose.is_empty());
        assert_eq!(entity.name(), "save");
    }

    #[test]
    fn test_matches_any() {
        let entity = ManualEntity::new("A", EntityKind::Class, "class A: pass")
            .with_patterns(["alpha"])
            .to_entity();
        assert!(entity.matches_any(&["find".to_string(), "alpha".to_string()]));
        assert!(!entity.matches_any(&["beta".to_string()]));
    }
}
