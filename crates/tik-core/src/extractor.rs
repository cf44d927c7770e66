//! Entity extraction from Python sources.
//!
//! A single pass over the tree-sitter syntax tree of each file:
//!
//! - `class` definitions become `class` entities; each method is recorded as a
//!   `Class.method (contains)` reference of the class
//! - `def` definitions become `function` entities keyed `Container.name`
//! - calls inside a function are recorded as references; `self.x()` and
//!   `cls.x()` are qualified with the enclosing class key
//! - `x = f()` inside a function records `f (assign)`
//! - imports inside a class or function record `lib.<module> (import)`
//!
//! Names on the denylist (builtins, common container methods, heavy library
//! modules) never become references. References are raw strings; the graph
//! builder resolves them and parses the relation suffix.
//!
//! Each file's snippets are merged into the snippet tier as soon as the file
//! is processed.

use std::collections::{BTreeMap, HashSet};

use tik_db::{EntityKind, SnippetRecord, TierStore};
use tree_sitter::{Node, Parser};

use crate::corpus::{CorpusReader, SourceFile};
use crate::entity::{capitalized, default_patterns, default_weight, Contract, Entity};
use crate::errors::IndexError;

/// Raw adjacency: entity key to unresolved reference strings.
pub type RawAdjacency = BTreeMap<String, Vec<String>>;

/// Names never recorded as references.
pub const BUILTIN_DENYLIST: &[&str] = &[
    // Built-in functions
    "print", "len", "range", "str", "int", "float", "bool", "list", "dict", "set", "tuple",
    "type", "isinstance", "issubclass", "hasattr", "getattr", "setattr", "delattr",
    "open", "input", "format", "repr", "id", "hash", "dir", "vars", "globals", "locals",
    "iter", "next", "enumerate", "zip", "map", "filter", "sorted", "reversed", "min", "max",
    "sum", "abs", "round", "pow", "divmod", "all", "any", "callable", "super", "property",
    "staticmethod", "classmethod", "ord", "chr", "hex", "bin", "oct", "bytes", "bytearray",
    "object", "Exception", "ValueError", "TypeError", "KeyError", "RuntimeError",
    // Common methods
    "append", "extend", "insert", "remove", "pop", "clear", "index", "count", "sort", "reverse",
    "copy", "get", "keys", "values", "items", "update", "setdefault",
    "split", "join", "strip", "lstrip", "rstrip", "lower", "upper", "title", "capitalize",
    "replace", "find", "rfind", "startswith", "endswith", "encode", "decode",
    "read", "write", "readline", "readlines", "close", "flush", "seek", "tell",
    "add", "discard", "union", "intersection", "difference",
    // Standard and numeric library modules
    "os", "sys", "re", "json", "pickle", "math", "time", "typing", "logging", "pathlib",
    "np", "numpy", "torch", "sklearn", "networkx",
];

/// Suffixes encoding non-`calls` relations in raw references.
const CONTAINS_SUFFIX: &str = " (contains)";
const ASSIGN_SUFFIX: &str = " (assign)";
const IMPORT_SUFFIX: &str = " (import)";

// ============================================================================
// Results
// ============================================================================

/// Output of extracting one file.
#[derive(Debug, Clone, Default)]
pub struct FileExtraction {
    pub entities: Vec<Entity>,
    pub snippets: BTreeMap<String, SnippetRecord>,
    pub adjacency: RawAdjacency,
}

/// Output of extracting a whole corpus.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: BTreeMap<String, Entity>,
    pub snippets: BTreeMap<String, SnippetRecord>,
    pub adjacency: RawAdjacency,
    pub files: usize,
    /// Snippet-tier merges that failed; the in-memory snippets remain usable.
    pub storage_faults: usize,
}

#[derive(Debug, Default)]
struct RawRefs {
    contains: Vec<String>,
    calls: Vec<String>,
    assigns: Vec<String>,
    imports: Vec<String>,
}

impl RawRefs {
    fn push(list: &mut Vec<String>, value: String) {
        if !list.contains(&value) {
            list.push(value);
        }
    }

    fn flatten(self) -> Vec<String> {
        let mut out = Vec::with_capacity(
            self.contains.len() + self.calls.len() + self.assigns.len() + self.imports.len(),
        );
        out.extend(self.contains.into_iter().map(|r| format!("{r}{CONTAINS_SUFFIX}")));
        out.extend(self.calls);
        out.extend(self.assigns.into_iter().map(|r| format!("{r}{ASSIGN_SUFFIX}")));
        out.extend(self.imports.into_iter().map(|r| format!("{r}{IMPORT_SUFFIX}")));
        out
    }
}

// ============================================================================
// EntityExtractor
// ============================================================================

/// Extracts entities and raw references from Python sources.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    denylist: HashSet<String>,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl EntityExtractor {
    /// Extractor with the built-in denylist plus `extra` names.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut denylist: HashSet<String> =
            BUILTIN_DENYLIST.iter().map(|s| s.to_string()).collect();
        denylist.extend(extra.into_iter().map(Into::into));
        Self { denylist }
    }

    /// Extract every file of `corpus`, merging each file's snippets into
    /// `snippets` (when given) as soon as the file is done.
    ///
    /// Keys already defined by an earlier file are skipped with a warning.
    pub fn extract_corpus(
        &self,
        corpus: &dyn CorpusReader,
        snippets: Option<&TierStore<SnippetRecord>>,
    ) -> Result<Extraction, IndexError> {
        let sources = corpus.read_sources()?;
        let mut result = Extraction::default();

        for source in &sources {
            let file = self.extract_source(source)?;
            let mut accepted = BTreeMap::new();

            for entity in file.entities {
                if result.entities.contains_key(&entity.key) {
                    tracing::warn!(
                        key = %entity.key,
                        "Duplicate entity in {}, keeping first definition",
                        source.path
                    );
                    continue;
                }
                if let Some(snippet) = file.snippets.get(&entity.key) {
                    accepted.insert(entity.key.clone(), snippet.clone());
                }
                if let Some(refs) = file.adjacency.get(&entity.key) {
                    result.adjacency.insert(entity.key.clone(), refs.clone());
                }
                result.entities.insert(entity.key.clone(), entity);
            }

            if let Some(store) = snippets.filter(|_| !accepted.is_empty()) {
                if let Err(e) = store.merge(accepted.clone()) {
                    tracing::error!("Failed to persist snippets of {}: {}", source.path, e);
                    result.storage_faults += 1;
                }
            }
            result.snippets.extend(accepted);
            result.files += 1;
        }

        tracing::info!(
            entities = result.entities.len(),
            files = result.files,
            "Extracted entities from {}",
            corpus.describe()
        );
        Ok(result)
    }

    /// Extract one file without touching any tier.
    pub fn extract_source(&self, source: &SourceFile) -> Result<FileExtraction, IndexError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| IndexError::Extraction {
                path: source.path.clone().into(),
                message: format!("Failed to set language: {}", e),
            })?;
        let tree = parser
            .parse(source.text.as_bytes(), None)
            .ok_or_else(|| IndexError::Extraction {
                path: source.path.clone().into(),
                message: "parser returned no tree".to_string(),
            })?;

        let root = tree.root_node();
        if root.has_error() {
            tracing::debug!("Syntax errors in {}, extracting best effort", source.path);
        }

        let mut visitor = FileVisitor {
            source: source.text.as_bytes(),
            path: &source.path,
            denylist: &self.denylist,
            scopes: Vec::new(),
            entities: Vec::new(),
            snippets: BTreeMap::new(),
            refs: BTreeMap::new(),
        };
        visitor.visit_children(root);

        Ok(FileExtraction {
            entities: visitor.entities,
            snippets: visitor.snippets,
            adjacency: visitor
                .refs
                .into_iter()
                .map(|(key, refs)| (key, refs.flatten()))
                .collect(),
        })
    }
}

// ============================================================================
// Syntax tree visitor
// ============================================================================

struct Scope {
    key: String,
    kind: EntityKind,
    /// Duplicate definition, or nested in one. Nothing inside is recorded.
    skipped: bool,
}

struct FileVisitor<'a> {
    source: &'a [u8],
    path: &'a str,
    denylist: &'a HashSet<String>,
    scopes: Vec<Scope>,
    entities: Vec<Entity>,
    snippets: BTreeMap<String, SnippetRecord>,
    refs: BTreeMap<String, RawRefs>,
}

impl<'a> FileVisitor<'a> {
    fn text(&self, node: Node) -> &'a str {
        node.utf8_text(self.source).unwrap_or("")
    }

    fn denied(&self, name: &str) -> bool {
        self.denylist.contains(name)
    }

    fn visit(&mut self, node: Node) {
        match node.kind() {
            "class_definition" => self.visit_class(node),
            "function_definition" => self.visit_function(node),
            "call" => {
                self.record_call(node);
                self.visit_children(node);
            }
            "assignment" => {
                self.record_assignment(node);
                self.visit_children(node);
            }
            "import_statement" | "import_from_statement" => self.record_import(node),
            _ => self.visit_children(node),
        }
    }

    fn visit_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn qualify(&self, name: &str) -> String {
        match self.scopes.last() {
            Some(scope) => format!("{}.{}", scope.key, name),
            None => name.to_string(),
        }
    }

    fn current_class(&self) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find(|s| s.kind == EntityKind::Class)
            .map(|s| s.key.as_str())
    }

    /// Innermost scope, if it is a function.
    fn current_function(&self) -> Option<&str> {
        self.scopes
            .last()
            .filter(|s| s.kind == EntityKind::Function && !s.skipped)
            .map(|s| s.key.as_str())
    }

    fn in_skipped_scope(&self) -> bool {
        self.scopes.last().is_some_and(|s| s.skipped)
    }

    /// Decorated definitions keep their decorators in the snippet.
    fn snippet_node(node: Node) -> Node {
        match node.parent() {
            Some(parent) if parent.kind() == "decorated_definition" => parent,
            _ => node,
        }
    }

    /// Register an entity; returns false when the key already exists.
    fn emit(&mut self, entity: Entity, snippet: String) -> bool {
        if self.snippets.contains_key(&entity.key) {
            tracing::warn!(
                key = %entity.key,
                "Duplicate definition in {}, keeping first",
                self.path
            );
            return false;
        }
        self.snippets.insert(
            entity.key.clone(),
            SnippetRecord::from_source(snippet, entity.kind, self.path),
        );
        self.refs.entry(entity.key.clone()).or_default();
        self.entities.push(entity);
        true
    }

    fn visit_class(&mut self, node: Node) {
        let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
            return;
        };
        let key = self.qualify(name);
        let body = node.child_by_field_name("body");

        let entity = Entity {
            key: key.clone(),
            kind: EntityKind::Class,
            weight: default_weight(EntityKind::Class),
            container_key: self.scopes.last().map(|s| s.key.clone()),
            container_path: self.path.to_string(),
            contract: Contract {
                purpose: format!("Class `{}` defined in {}.", key, self.path),
                query_patterns: default_patterns(&key),
                returns: "instance".to_string(),
                docstring: body.and_then(|b| self.docstring(b)),
                args: Vec::new(),
            },
        };
        let snippet = self.text(Self::snippet_node(node)).to_string();
        let emitted = !self.in_skipped_scope() && self.emit(entity, snippet);
        if emitted {
            if let Some(body) = body {
                let methods = self.method_names(body);
                let refs = self.refs.entry(key.clone()).or_default();
                for method in methods {
                    RawRefs::push(&mut refs.contains, format!("{key}.{method}"));
                }
            }
        }

        self.scopes.push(Scope {
            key,
            kind: EntityKind::Class,
            skipped: !emitted,
        });
        if let Some(body) = body {
            self.visit_children(body);
        }
        self.scopes.pop();
    }

    fn method_names(&self, body: Node) -> Vec<&'a str> {
        let mut cursor = body.walk();
        body.named_children(&mut cursor)
            .filter_map(|child| match child.kind() {
                "function_definition" => Some(child),
                "decorated_definition" => child.child_by_field_name("definition"),
                _ => None,
            })
            .filter(|def| def.kind() == "function_definition")
            .filter_map(|def| def.child_by_field_name("name"))
            .map(|n| self.text(n))
            .collect()
    }

    fn visit_function(&mut self, node: Node) {
        let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
            return;
        };
        let key = self.qualify(name);
        let body = node.child_by_field_name("body");
        let label = match self.scopes.last() {
            Some(scope) if scope.kind == EntityKind::Class => "Method",
            _ => capitalized(EntityKind::Function),
        };

        let entity = Entity {
            key: key.clone(),
            kind: EntityKind::Function,
            weight: default_weight(EntityKind::Function),
            container_key: self.scopes.last().map(|s| s.key.clone()),
            container_path: self.path.to_string(),
            contract: Contract {
                purpose: format!("{} `{}` defined in {}.", label, key, self.path),
                query_patterns: default_patterns(&key),
                returns: node
                    .child_by_field_name("return_type")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_else(|| "result".to_string()),
                docstring: body.and_then(|b| self.docstring(b)),
                args: node
                    .child_by_field_name("parameters")
                    .map(|p| self.parameter_names(p))
                    .unwrap_or_default(),
            },
        };
        let snippet = self.text(Self::snippet_node(node)).to_string();
        let emitted = !self.in_skipped_scope() && self.emit(entity, snippet);

        self.scopes.push(Scope {
            key,
            kind: EntityKind::Function,
            skipped: !emitted,
        });
        if let Some(body) = body {
            self.visit_children(body);
        }
        self.scopes.pop();
    }

    fn parameter_names(&self, parameters: Node) -> Vec<String> {
        let mut cursor = parameters.walk();
        parameters
            .named_children(&mut cursor)
            .filter_map(|p| self.parameter_name(p))
            .filter(|name| name != "self" && name != "cls")
            .collect()
    }

    fn parameter_name(&self, node: Node) -> Option<String> {
        match node.kind() {
            "identifier" => Some(self.text(node).to_string()),
            "default_parameter" | "typed_default_parameter" => node
                .child_by_field_name("name")
                .map(|n| self.text(n).to_string()),
            "typed_parameter" => {
                let mut cursor = node.walk();
                let inner = node.named_children(&mut cursor).next()?;
                self.parameter_name(inner)
            }
            "list_splat_pattern" | "dictionary_splat_pattern" => {
                Some(self.text(node).to_string())
            }
            _ => None,
        }
    }

    fn docstring(&self, body: Node) -> Option<String> {
        let mut cursor = body.walk();
        let first = body.named_children(&mut cursor).next()?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let mut inner = first.walk();
        let expr = first.named_children(&mut inner).next()?;
        if expr.kind() != "string" {
            return None;
        }
        clean_docstring(self.text(expr))
    }

    /// Reference text for a call target, or `None` when it is denied or not
    /// a plain name / single attribute access.
    fn callee(&self, function: Node) -> Option<String> {
        match function.kind() {
            "identifier" => {
                let name = self.text(function);
                (!self.denied(name)).then(|| name.to_string())
            }
            "attribute" => {
                let object = function.child_by_field_name("object")?;
                let attribute = self.text(function.child_by_field_name("attribute")?);
                if object.kind() != "identifier" {
                    return None;
                }
                let receiver = self.text(object);
                if receiver == "self" || receiver == "cls" {
                    return Some(match self.current_class() {
                        Some(class) => format!("{class}.{attribute}"),
                        None => attribute.to_string(),
                    });
                }
                let dotted = format!("{receiver}.{attribute}");
                (!self.denied(receiver) && !self.denied(&dotted)).then_some(dotted)
            }
            _ => None,
        }
    }

    fn record_call(&mut self, node: Node) {
        let Some(caller) = self.current_function().map(str::to_string) else {
            return;
        };
        let Some(target) = node
            .child_by_field_name("function")
            .and_then(|f| self.callee(f))
        else {
            return;
        };
        let refs = self.refs.entry(caller).or_default();
        RawRefs::push(&mut refs.calls, target);
    }

    fn record_assignment(&mut self, node: Node) {
        let Some(caller) = self.current_function().map(str::to_string) else {
            return;
        };
        let Some(right) = node.child_by_field_name("right") else {
            return;
        };
        if right.kind() != "call" {
            return;
        }
        let Some(target) = right
            .child_by_field_name("function")
            .and_then(|f| self.callee(f))
        else {
            return;
        };
        let refs = self.refs.entry(caller).or_default();
        RawRefs::push(&mut refs.assigns, target);
    }

    fn record_import(&mut self, node: Node) {
        let owner = match self.scopes.last() {
            Some(scope) if scope.skipped => return,
            Some(scope) => scope.key.clone(),
            None => return,
        };
        let mut targets = Vec::new();
        let mut cursor = node.walk();

        if node.kind() == "import_statement" {
            for name in node.children_by_field_name("name", &mut cursor) {
                let module = self.imported_name(name);
                let head = module.split('.').next().unwrap_or(module);
                if !head.is_empty() && !self.denied(head) {
                    targets.push(format!("lib.{head}"));
                }
            }
        } else {
            let module = node
                .child_by_field_name("module_name")
                .map(|m| self.text(m).trim_start_matches('.'))
                .unwrap_or("");
            let head = match module.split('.').next() {
                Some(h) if !h.is_empty() => h,
                _ => "unknown",
            };
            if self.denied(head) {
                return;
            }
            for name in node.children_by_field_name("name", &mut cursor) {
                let imported = self.imported_name(name);
                if !imported.is_empty() {
                    targets.push(format!("lib.{head}.{imported}"));
                }
            }
        }

        let refs = self.refs.entry(owner).or_default();
        for target in targets {
            RawRefs::push(&mut refs.imports, target);
        }
    }

    fn imported_name(&self, node: Node) -> &'a str {
        match node.kind() {
            "aliased_import" => node
                .child_by_field_name("name")
                .map(|n| self.text(n))
                .unwrap_or(""),
            _ => self.text(node),
        }
    }
}

/// Strip string prefix and quotes, dedent, and drop surrounding blank lines.
fn clean_docstring(raw: &str) -> Option<String> {
    let unprefixed = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let mut body = unprefixed;
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if unprefixed.len() >= 2 * quote.len()
            && unprefixed.starts_with(quote)
            && unprefixed.ends_with(quote)
        {
            body = &unprefixed[quote.len()..unprefixed.len() - quote.len()];
            break;
        }
    }
    let lines: Vec<&str> = body.lines().map(str::trim).collect();
    let cleaned = lines
        .iter()
        .skip_while(|l| l.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = cleaned.trim_end().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::InMemoryCorpus;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
import os
import requests

class Parser:
    """Parses source text.

    Second line.
    """
    import re
    from helpers.text import normalize, tokenize as tok

    def parse(self, text: str, strict=False) -> dict:
        tokens = self.tokenize(text)
        print(tokens)
        result = build_tree(tokens)
        return result

    @staticmethod
    def tokenize(text):
        return text.split()

def build_tree(tokens, *rest, **opts):
    def walk(node):
        return visit(node)
    return walk(tokens)

def visit(node):
    import json
    import numpy as np
    return node
"#;

    fn extract(text: &str) -> FileExtraction {
        EntityExtractor::default()
            .extract_source(&SourceFile::new("src/parser.py", text))
            .unwrap()
    }

    fn keys(file: &FileExtraction) -> Vec<&str> {
        file.entities.iter().map(|e| e.key.as_str()).collect()
    }

    #[test]
    fn test_entities_and_keys() {
        let file = extract(SAMPLE);
        assert_eq!(
            keys(&file),
            vec![
                "Parser",
                "Parser.parse",
                "Parser.tokenize",
                "build_tree",
                "build_tree.walk",
                "visit"
            ]
        );
        let parse = &file.entities[1];
        assert_eq!(parse.kind, EntityKind::Function);
        assert_eq!(parse.container_key.as_deref(), Some("Parser"));
        assert_eq!(parse.weight, 1.5);
        assert_eq!(file.entities[0].weight, 2.0);
    }

    #[test]
    fn test_contract_facts() {
        let file = extract(SAMPLE);
        let class = &file.entities[0];
        assert_eq!(
            class.contract.docstring.as_deref(),
            Some("Parses source text.\n\nSecond line.")
        );
        assert_eq!(class.contract.returns, "instance");
        assert_eq!(class.contract.query_patterns, vec!["parser"]);

        let parse = &file.entities[1];
        assert_eq!(parse.contract.args, vec!["text", "strict"]);
        assert_eq!(parse.contract.returns, "dict");
        assert_eq!(parse.contract.query_patterns, vec!["parse", "parser.parse"]);
        assert!(parse.contract.purpose.contains("Method `Parser.parse`"));

        let build = &file.entities[3];
        assert_eq!(build.contract.args, vec!["tokens", "*rest", "**opts"]);
        assert_eq!(build.contract.returns, "result");
        assert!(build.contract.docstring.is_none());
    }

    #[test]
    fn test_class_contains_methods() {
        let file = extract(SAMPLE);
        let refs = &file.adjacency["Parser"];
        assert!(refs.contains(&"Parser.parse (contains)".to_string()));
        assert!(refs.contains(&"Parser.tokenize (contains)".to_string()));
    }

    #[test]
    fn test_calls_assigns_and_denylist() {
        let file = extract(SAMPLE);
        let refs = &file.adjacency["Parser.parse"];
        assert!(refs.contains(&"Parser.tokenize".to_string()));
        assert!(refs.contains(&"build_tree".to_string()));
        assert!(refs.contains(&"Parser.tokenize (assign)".to_string()));
        assert!(refs.contains(&"build_tree (assign)".to_string()));
        assert!(!refs.iter().any(|r| r.starts_with("print")));

        let tokenize = &file.adjacency["Parser.tokenize"];
        assert!(tokenize.is_empty(), "split() is denied: {tokenize:?}");
    }

    #[test]
    fn test_nested_function_scope() {
        let file = extract(SAMPLE);
        assert_eq!(file.adjacency["build_tree"], vec!["walk".to_string()]);
        assert_eq!(file.adjacency["build_tree.walk"], vec!["visit".to_string()]);
    }

    #[test]
    fn test_imports() {
        let file = extract(SAMPLE);
        let class_refs = &file.adjacency["Parser"];
        assert!(class_refs.contains(&"lib.helpers.normalize (import)".to_string()));
        assert!(class_refs.contains(&"lib.helpers.tokenize (import)".to_string()));
        assert!(!class_refs.iter().any(|r| r.starts_with("lib.re")));

        // json and numpy are denied; module-level imports are not recorded.
        assert!(file.adjacency["visit"].is_empty());
        assert!(!file
            .adjacency
            .values()
            .flatten()
            .any(|r| r.contains("requests")));
    }

    #[test]
    fn test_snippets_exact_and_decorated() {
        let file = extract(SAMPLE);
        let tokenize = &file.snippets["Parser.tokenize"];
        assert!(tokenize.snippet.starts_with("@staticmethod"));
        assert!(tokenize.snippet.ends_with("return text.split()"));
        assert_eq!(tokenize.container_path, "src/parser.py");
        assert_eq!(file.snippets.len(), file.entities.len());
    }

    #[test]
    fn test_duplicate_definition_keeps_first() {
        let file = extract("def f():\n    return 1\n\ndef f():\n    return 2\n");
        assert_eq!(keys(&file), vec!["f"]);
        assert!(file.snippets["f"].snippet.contains("return 1"));
    }

    #[test]
    fn test_extra_denylist() {
        let extractor = EntityExtractor::new(["helper"]);
        let file = extractor
            .extract_source(&SourceFile::new("a.py", "def f():\n    helper()\n    other()\n"))
            .unwrap();
        assert_eq!(file.adjacency["f"], vec!["other".to_string()]);
    }

    #[test]
    fn test_duplicate_definition_refs_discarded() {
        let file = extract(
            "def f():\n    first()\n\ndef f():\n    second()\n    import os\n    def inner():\n        third()\n",
        );
        assert_eq!(keys(&file), vec!["f"]);
        assert_eq!(file.adjacency["f"], vec!["first".to_string()]);
        assert!(file.snippets["f"].snippet.contains("first()"));
        assert!(!file.adjacency.contains_key("f.inner"));
    }

    #[test]
    fn test_extract_corpus_merges_snippets() {
        let dir = TempDir::new().unwrap();
        let store: TierStore<SnippetRecord> = TierStore::new(dir.path().join("snippets.json"));
        let corpus = InMemoryCorpus::new()
            .with_source("a.py", "def shared():\n    pass\n\ndef a():\n    shared()\n")
            .with_source("b.py", "def shared():\n    return 2\n");

        let extraction = EntityExtractor::default()
            .extract_corpus(&corpus, Some(&store))
            .unwrap();

        assert_eq!(extraction.files, 2);
        assert_eq!(extraction.entities.len(), 2);
        assert_eq!(extraction.entities["shared"].container_path, "a.py");
        let stored = store.load();
        assert_eq!(stored.len(), 2);
        assert!(stored["shared"].snippet.contains("pass"));
        assert_eq!(extraction.adjacency["a"], vec!["shared".to_string()]);
    }

    #[test]
    fn test_clean_docstring() {
        assert_eq!(clean_docstring("r'''  raw  '''").as_deref(), Some("raw"));
        assert_eq!(clean_docstring("\"\"").as_deref(), None);
        assert_eq!(clean_docstring("\"one\"").as_deref(), Some("one"));
    }
}
