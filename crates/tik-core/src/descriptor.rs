//! Descriptor generation (tier 3).
//!
//! Each entity moves through `Uncached -> GenerationAttempted -> {Accepted |
//! Fallback}` exactly once; cached descriptors are never regenerated.
//!
//! ## Batching
//!
//! Pending entities are grouped into batches of `descriptors.batchSize` and
//! the batches run on a bounded `rayon` pool of `descriptors.workers`
//! threads. A batch is one generation call answered with a JSON array of
//! `{id, purpose, uses, returns, edgeCases}` objects. If the reply cannot be
//! parsed after all retries, every entity of the batch falls back; entries
//! missing from a parsed reply fall back individually.
//!
//! Workers never touch the tier: the descriptor tier is merged once, after
//! every batch has finished.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tik_db::{
    Descriptor, DescriptorRecord, EdgeDirection, EdgeRecord, EdgeRef, Provenance, SnippetRecord,
};
use tik_model::{
    parse_json_array, parse_json_object, GenerationCapability, GenerationConfig,
    GenerationRequest, ModelError, ModelResult, RetryPolicy,
};

use crate::config::DescriptorConfig;
use crate::context::excerpt;
use crate::entity::{capitalized, Entity};

const SINGLE_INSTRUCTION: &str = "You summarize one code entity for a retrieval index. \
Reply with a JSON object only, no prose, with exactly these fields: \
\"purpose\" (one sentence), \"uses\" (array of strings), \"returns\" (string), \"edgeCases\" (string).";

const BATCH_INSTRUCTION: &str = "You summarize code entities for a retrieval index. \
Reply with a JSON array only, no prose, one object per entity with exactly these fields: \
\"id\" (the entity ID), \"purpose\" (one sentence), \"uses\" (array of strings), \
\"returns\" (string), \"edgeCases\" (string).";

/// Usage hints kept in a fallback descriptor.
const MAX_USAGE_HINTS: usize = 3;

static EDGE_CASE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\b(if|elif|match)\b", "Conditional logic"),
        (r"\b(try|except|raise)\b", "Error handling"),
        (r"\b(for|while)\b", "Iteration"),
        (r"\b(async|await)\b", "Async execution"),
    ]
    .into_iter()
    .map(|(pattern, tag)| (Regex::new(pattern).expect("Invalid regex"), tag))
    .collect()
});

/// Counts from one generation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorSummary {
    /// Descriptors accepted from the generation capability.
    pub generated: usize,
    /// Deterministic fallbacks.
    pub fallback: usize,
    /// Entities skipped because a descriptor was already cached.
    pub cached: usize,
}

/// What the generator knows about one entity.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorInput<'a> {
    pub entity: &'a Entity,
    pub snippet: &'a str,
    pub edges: &'a [EdgeRef],
}

// ============================================================================
// Fallback
// ============================================================================

/// Deterministic descriptor from static facts. Never fails and never
/// returns an empty purpose.
pub fn fallback_descriptor(entity: &Entity, snippet: &str, edges: &[EdgeRef]) -> Descriptor {
    let mut purpose = entity.contract.purpose.trim().to_string();
    if purpose.is_empty() {
        purpose = format!("{} {}", capitalized(entity.kind), entity.key)
            .trim()
            .to_string();
    }

    if let Some(doc) = entity
        .contract
        .docstring
        .as_deref()
        .and_then(|d| d.lines().map(str::trim).find(|l| !l.is_empty()))
    {
        purpose.push_str(&format!(" (Doc: {})", excerpt(doc, 50)));
    }
    if !entity.contract.args.is_empty() {
        purpose.push_str(&format!(" Args: {}.", entity.contract.args.join(", ")));
    }
    let flat = snippet.split_whitespace().collect::<Vec<_>>().join(" ");
    if !flat.is_empty() {
        purpose.push_str(&format!(" Snippet: {}", excerpt(&flat, 80)));
    }

    let mut uses: Vec<String> = edges
        .iter()
        .take(MAX_USAGE_HINTS)
        .map(|edge| match edge.direction {
            EdgeDirection::Outgoing => format!("Uses {} ({})", edge.to, edge.relation),
            EdgeDirection::Incoming => format!("Used by {}", edge.to),
        })
        .collect();
    if uses.is_empty() {
        uses.push("No known dependencies".to_string());
    }

    let tags: Vec<&str> = EDGE_CASE_PATTERNS
        .iter()
        .filter(|(re, _)| re.is_match(snippet))
        .map(|(_, tag)| *tag)
        .collect();
    let edge_cases = if tags.is_empty() {
        "N/A".to_string()
    } else {
        tags.join("; ")
    };

    Descriptor {
        purpose,
        uses,
        returns: entity.contract.returns.clone(),
        edge_cases,
    }
}

/// Read a descriptor out of a generated object.
///
/// All four fields must be present; `purpose` must be a non-empty string.
fn descriptor_from_object(map: &Map<String, Value>) -> Option<Descriptor> {
    let purpose = map.get("purpose")?.as_str()?.trim();
    if purpose.is_empty() {
        return None;
    }
    let uses = match map.get("uses")? {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?,
        Value::String(s) => vec![s.clone()],
        _ => return None,
    };
    let returns = map.get("returns")?.as_str()?.to_string();
    let edge_cases = map
        .get("edgeCases")
        .or_else(|| map.get("edge_cases"))?
        .as_str()?
        .to_string();
    Some(Descriptor {
        purpose: purpose.to_string(),
        uses,
        returns,
        edge_cases,
    })
}

// ============================================================================
// DescriptorGenerator
// ============================================================================

/// Produces descriptor records for entities that have none.
#[derive(Debug)]
pub struct DescriptorGenerator<'a> {
    capability: Option<&'a dyn GenerationCapability>,
    model: String,
    policy: RetryPolicy,
    config: DescriptorConfig,
}

impl<'a> DescriptorGenerator<'a> {
    pub fn new(
        capability: Option<&'a dyn GenerationCapability>,
        generation: &GenerationConfig,
        config: &DescriptorConfig,
    ) -> Self {
        Self {
            capability,
            model: generation.model.clone(),
            policy: generation.retry_policy(),
            config: config.clone(),
        }
    }

    /// Whether any generation call will be made.
    pub fn is_live(&self) -> bool {
        self.capability.is_some() && !self.config.dry_run
    }

    /// Descriptors for every entity not in `cached`, without persisting.
    pub fn describe_missing(
        &self,
        entities: &BTreeMap<String, Entity>,
        snippets: &BTreeMap<String, SnippetRecord>,
        edges: &BTreeMap<String, EdgeRecord>,
        cached: &BTreeMap<String, DescriptorRecord>,
    ) -> (BTreeMap<String, DescriptorRecord>, DescriptorSummary) {
        let mut summary = DescriptorSummary::default();
        let pending: Vec<DescriptorInput<'_>> = entities
            .values()
            .filter(|entity| {
                let hit = cached.contains_key(&entity.key);
                if hit {
                    summary.cached += 1;
                }
                !hit
            })
            .map(|entity| DescriptorInput {
                entity,
                snippet: snippets
                    .get(&entity.key)
                    .map(|s| s.snippet.as_str())
                    .unwrap_or(""),
                edges: edges
                    .get(&entity.key)
                    .map(|r| r.edges.as_slice())
                    .unwrap_or(&[]),
            })
            .collect();

        if pending.is_empty() {
            return (BTreeMap::new(), summary);
        }

        let described: Vec<(String, DescriptorRecord)> = if self.is_live() {
            let batches: Vec<&[DescriptorInput<'_>]> =
                pending.chunks(self.config.batch_size.max(1)).collect();
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers.max(1))
                .build()
            {
                Ok(pool) => pool.install(|| {
                    batches
                        .par_iter()
                        .flat_map_iter(|batch| self.describe_batch(batch))
                        .collect()
                }),
                Err(e) => {
                    tracing::warn!("Failed to start descriptor workers ({e}), running inline");
                    batches
                        .iter()
                        .flat_map(|batch| self.describe_batch(batch))
                        .collect()
                }
            }
        } else {
            tracing::debug!(
                count = pending.len(),
                "Generation disabled, using fallback descriptors"
            );
            pending
                .iter()
                .map(|input| (input.entity.key.clone(), fallback_record(input)))
                .collect()
        };

        let mut fresh = BTreeMap::new();
        for (key, record) in described {
            match record.provenance {
                Provenance::GenerationService => summary.generated += 1,
                _ => summary.fallback += 1,
            }
            fresh.insert(key, record);
        }
        tracing::info!(
            generated = summary.generated,
            fallback = summary.fallback,
            cached = summary.cached,
            "Descriptor generation finished"
        );
        (fresh, summary)
    }

    fn describe_batch(&self, batch: &[DescriptorInput<'_>]) -> Vec<(String, DescriptorRecord)> {
        let Some(capability) = self.capability else {
            return batch
                .iter()
                .map(|input| (input.entity.key.clone(), fallback_record(input)))
                .collect();
        };

        if self.config.batch_size == 1 {
            return batch
                .iter()
                .map(|input| {
                    let record = match self.describe_single(capability, input) {
                        Ok(descriptor) => accepted_record(input, descriptor),
                        Err(e) => {
                            tracing::debug!(key = %input.entity.key, "Falling back: {e}");
                            fallback_record(input)
                        }
                    };
                    (input.entity.key.clone(), record)
                })
                .collect();
        }

        let replies = match self.request_batch(capability, batch) {
            Ok(replies) => replies,
            Err(e) => {
                tracing::debug!(
                    size = batch.len(),
                    "Batch failed, falling back for every entity: {e}"
                );
                HashMap::new()
            }
        };
        batch
            .iter()
            .map(|input| {
                let record = match replies
                    .get(input.entity.key.as_str())
                    .and_then(descriptor_from_object)
                {
                    Some(descriptor) => accepted_record(input, descriptor),
                    None => {
                        tracing::debug!(key = %input.entity.key, "No usable descriptor in batch reply");
                        fallback_record(input)
                    }
                };
                (input.entity.key.clone(), record)
            })
            .collect()
    }

    fn describe_single(
        &self,
        capability: &dyn GenerationCapability,
        input: &DescriptorInput<'_>,
    ) -> ModelResult<Descriptor> {
        let request = GenerationRequest::new(
            self.model.clone(),
            SINGLE_INSTRUCTION,
            self.entity_block(input),
        );
        let label = format!("descriptor {}", input.entity.key);
        self.policy.run(&label, |_| {
            let content = capability.generate(&request)?.into_content()?;
            let object = parse_json_object(&content)?;
            descriptor_from_object(&object)
                .ok_or_else(|| ModelError::malformed("descriptor fields missing or empty"))
        })
    }

    fn request_batch(
        &self,
        capability: &dyn GenerationCapability,
        batch: &[DescriptorInput<'_>],
    ) -> ModelResult<HashMap<String, Map<String, Value>>> {
        let input_text = batch
            .iter()
            .map(|input| self.entity_block(input))
            .collect::<Vec<_>>()
            .join("\n---\n");
        let request = GenerationRequest::new(self.model.clone(), BATCH_INSTRUCTION, input_text);
        let label = format!("descriptor batch of {}", batch.len());
        self.policy.run(&label, |_| {
            let content = capability.generate(&request)?.into_content()?;
            let mut replies = HashMap::new();
            for item in parse_json_array(&content)? {
                if let Value::Object(map) = item {
                    if let Some(id) = map.get("id").and_then(Value::as_str) {
                        replies.insert(id.to_string(), map);
                    }
                }
            }
            Ok(replies)
        })
    }

    fn entity_block(&self, input: &DescriptorInput<'_>) -> String {
        let contract = &input.entity.contract;
        let args = if contract.args.is_empty() {
            "none".to_string()
        } else {
            contract.args.join(", ")
        };
        let edges = if input.edges.is_empty() {
            "none".to_string()
        } else {
            input
                .edges
                .iter()
                .map(|e| format!("{} ({})", e.to, e.relation))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "ID: {}\nType: {}\nArgs: {}\nDocstring: {}\nSnippet:\n{}\nEdges: {}",
            input.entity.key,
            input.entity.kind,
            args,
            contract.docstring.as_deref().unwrap_or("none"),
            excerpt(input.snippet, self.config.prompt_snippet_chars),
            edges
        )
    }
}

fn accepted_record(input: &DescriptorInput<'_>, descriptor: Descriptor) -> DescriptorRecord {
    DescriptorRecord {
        descriptor,
        kind: input.entity.kind,
        container_path: input.entity.container_path.clone(),
        provenance: Provenance::GenerationService,
    }
}

fn fallback_record(input: &DescriptorInput<'_>) -> DescriptorRecord {
    DescriptorRecord {
        descriptor: fallback_descriptor(input.entity, input.snippet, input.edges),
        kind: input.entity.kind,
        container_path: input.entity.container_path.clone(),
        provenance: Provenance::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Contract, ManualEntity};
    use std::sync::Mutex;
    use tik_db::{EntityKind, Relation};
    use tik_model::GenerationResponse;

    /// Answers every request with a closure.
    struct Scripted {
        reply: Box<dyn Fn(&GenerationRequest) -> ModelResult<GenerationResponse> + Send + Sync>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(
            reply: impl Fn(&GenerationRequest) -> ModelResult<GenerationResponse> + Send + Sync + 'static,
        ) -> Self {
            Self {
                reply: Box::new(reply),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl std::fmt::Debug for Scripted {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Scripted").finish_non_exhaustive()
        }
    }

    impl GenerationCapability for Scripted {
        fn generate(&self, request: &GenerationRequest) -> ModelResult<GenerationResponse> {
            *self.calls.lock().unwrap() += 1;
            (self.reply)(request)
        }
    }

    fn entity(key: &str) -> Entity {
        ManualEntity::new(key, EntityKind::Function, "pass").to_entity()
    }

    fn entities(keys: &[&str]) -> BTreeMap<String, Entity> {
        keys.iter().map(|k| (k.to_string(), entity(k))).collect()
    }

    fn generation() -> GenerationConfig {
        GenerationConfig {
            backoff_ms: 0,
            ..GenerationConfig::default()
        }
    }

    fn descriptor_json(id: &str) -> String {
        format!(
            r#"{{"id": "{id}", "purpose": "Does {id}.", "uses": ["x"], "returns": "None", "edgeCases": "N/A"}}"#
        )
    }

    #[test]
    fn test_fallback_never_empty() {
        let bare = Entity {
            key: String::new(),
            kind: EntityKind::Function,
            weight: 1.0,
            container_key: None,
            container_path: String::new(),
            contract: Contract {
                purpose: String::new(),
                query_patterns: Vec::new(),
                returns: String::new(),
                docstring: None,
                args: Vec::new(),
            },
        };
        let descriptor = fallback_descriptor(&bare, "", &[]);
        assert!(!descriptor.purpose.is_empty());
        assert_eq!(descriptor.edge_cases, "N/A");
        assert_eq!(descriptor.uses, vec!["No known dependencies"]);
    }

    #[test]
    fn test_fallback_enrichment() {
        let mut entity = entity("Loader.load");
        entity.contract.docstring = Some("Load the file.\nMore text.".to_string());
        entity.contract.args = vec!["path".to_string(), "strict".to_string()];
        let snippet = "def load(self, path, strict):\n    try:\n        for line in f:\n            if line: pass\n    except OSError:\n        raise";
        let edges = vec![
            EdgeRef::outgoing("Reader.read", Relation::Calls),
            EdgeRef::incoming("main", Relation::Calls),
        ];

        let descriptor = fallback_descriptor(&entity, snippet, &edges);
        assert!(descriptor.purpose.contains("(Doc: Load the file.)"));
        assert!(descriptor.purpose.contains("Args: path, strict."));
        assert!(descriptor.purpose.contains("Snippet: def load(self, path, strict): try:"));
        assert_eq!(
            descriptor.uses,
            vec!["Uses Reader.read (calls)", "Used by main"]
        );
        assert_eq!(
            descriptor.edge_cases,
            "Conditional logic; Error handling; Iteration"
        );
        assert_eq!(descriptor.returns, "result");
    }

    #[test]
    fn test_edge_case_tags_need_word_boundaries() {
        let descriptor = fallback_descriptor(&entity("f"), "def notify(): format_item()", &[]);
        assert_eq!(descriptor.edge_cases, "N/A");
    }

    #[test]
    fn test_descriptor_from_object_requires_all_fields() {
        let full: Map<String, Value> =
            serde_json::from_str(&descriptor_json("a")).unwrap();
        assert!(descriptor_from_object(&full).is_some());

        for field in ["purpose", "uses", "returns", "edgeCases"] {
            let mut partial = full.clone();
            partial.remove(field);
            assert!(descriptor_from_object(&partial).is_none(), "missing {field}");
        }

        let mut empty = full.clone();
        empty.insert("purpose".to_string(), Value::String("  ".to_string()));
        assert!(descriptor_from_object(&empty).is_none());
    }

    #[test]
    fn test_dry_run_uses_fallback() {
        let capability = Scripted::new(|_| panic!("must not be called"));
        let config = DescriptorConfig {
            dry_run: true,
            ..DescriptorConfig::default()
        };
        let generator = DescriptorGenerator::new(Some(&capability), &generation(), &config);
        let (fresh, summary) = generator.describe_missing(
            &entities(&["a", "b"]),
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        assert_eq!(summary.fallback, 2);
        assert!(fresh.values().all(|r| r.provenance == Provenance::Fallback));
        assert_eq!(capability.calls(), 0);
    }

    #[test]
    fn test_batch_partial_failure() {
        // The reply only describes `a`; `b` falls back on its own.
        let capability = Scripted::new(|_| {
            Ok(GenerationResponse::ok(format!("[{}]", descriptor_json("a"))))
        });
        let generator =
            DescriptorGenerator::new(Some(&capability), &generation(), &DescriptorConfig::default());
        let (fresh, summary) = generator.describe_missing(
            &entities(&["a", "b"]),
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        assert_eq!(summary.generated, 1);
        assert_eq!(summary.fallback, 1);
        assert_eq!(fresh["a"].provenance, Provenance::GenerationService);
        assert_eq!(fresh["a"].descriptor.purpose, "Does a.");
        assert_eq!(fresh["b"].provenance, Provenance::Fallback);
        assert_eq!(capability.calls(), 1);
    }

    #[test]
    fn test_batch_parse_failure_falls_back_whole_batch() {
        let capability = Scripted::new(|_| Ok(GenerationResponse::ok("Here you go: []")));
        let config = DescriptorConfig {
            batch_size: 2,
            workers: 1,
            ..DescriptorConfig::default()
        };
        let generator = DescriptorGenerator::new(Some(&capability), &generation(), &config);
        let (fresh, summary) = generator.describe_missing(
            &entities(&["a", "b", "c"]),
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        assert_eq!(summary.fallback, 3);
        assert_eq!(fresh.len(), 3);
        // Two batches, three attempts each.
        assert_eq!(capability.calls(), 6);
    }

    #[test]
    fn test_single_mode_retry_then_accept() {
        let attempts = Mutex::new(0);
        let capability = Scripted::new(move |_| {
            let mut n = attempts.lock().unwrap();
            *n += 1;
            if *n < 3 {
                Ok(GenerationResponse::ok("{\"purpose\": \"\"}"))
            } else {
                Ok(GenerationResponse::ok(descriptor_json("a")))
            }
        });
        let config = DescriptorConfig {
            batch_size: 1,
            ..DescriptorConfig::default()
        };
        let generator = DescriptorGenerator::new(Some(&capability), &generation(), &config);
        let (fresh, summary) = generator.describe_missing(
            &entities(&["a"]),
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        assert_eq!(summary.generated, 1);
        assert_eq!(fresh["a"].descriptor.purpose, "Does a.");
        assert_eq!(capability.calls(), 3);
    }

    #[test]
    fn test_single_mode_exhaustion_falls_back() {
        let capability = Scripted::new(|_| {
            Err(ModelError::GenerationTimeout {
                endpoint: "scripted".to_string(),
                timeout_secs: 10,
            })
        });
        let config = DescriptorConfig {
            batch_size: 1,
            ..DescriptorConfig::default()
        };
        let generator = DescriptorGenerator::new(Some(&capability), &generation(), &config);
        let (fresh, _) = generator.describe_missing(
            &entities(&["a"]),
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
        );
        assert_eq!(fresh["a"].provenance, Provenance::Fallback);
        assert!(!fresh["a"].descriptor.purpose.is_empty());
        assert_eq!(capability.calls(), 3);
    }

    #[test]
    fn test_cached_entities_skipped() {
        let generator =
            DescriptorGenerator::new(None, &generation(), &DescriptorConfig::default());
        let all = entities(&["a", "b"]);
        let (first, summary) =
            generator.describe_missing(&all, &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(summary.fallback, 2);

        let mut cached = first.clone();
        cached.remove("b");
        let (second, summary) =
            generator.describe_missing(&all, &BTreeMap::new(), &BTreeMap::new(), &cached);
        assert_eq!(summary, DescriptorSummary { generated: 0, fallback: 1, cached: 1 });
        assert_eq!(second.keys().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(second["b"], first["b"]);
    }
}
