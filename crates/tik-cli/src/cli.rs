//! CLI definition and command dispatch for TIK.
//!
//! This module defines the command-line interface using `clap` and provides
//! the `run()` function that dispatches commands to the engine.
//!
//! ## Configuration Precedence
//!
//! Configuration is resolved with the following precedence (highest to lowest):
//! 1. CLI flags (e.g., `--data-dir`, `--dry-run`, `--polish-edges`)
//! 2. Environment variables (`TIK_CONFIG`, `TIK_DATA_DIR`, `TIK_VERBOSE`)
//! 3. Config file (`./tik.yaml` or path from `--config`/`TIK_CONFIG`)
//! 4. Built-in defaults

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};

use crate::ui::{format, table, ColorMode, MessageType, Style};

use tik_core::{
    ContextLevels, DirectoryCorpus, IndexConfig, IndexEngine, IndexError, InitReport,
    DEFAULT_CONFIG_FILE,
};
use tik_db::{
    diff, validate_raw, DescriptorRecord, EdgeRecord, SnippetRecord,
    Tier, TierDiff, TierRecord, TierStats, TierStore,
};

// ============================================================================
// CLI Definition
// ============================================================================

/// Version string including git commit hash
const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

/// Tiered Indexing Kernel – code knowledge index with hybrid retrieval
#[derive(Parser, Debug)]
#[command(name = "tik")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, env = "TIK_VERBOSE")]
    pub verbose: bool,

    /// Path to configuration file (default: ./tik.yaml)
    #[arg(long, global = true, env = "TIK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the tier files and embedding snapshot
    #[arg(long, global = true, env = "TIK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Color output mode
    #[arg(long, global = true, env = "TIK_COLOR", value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract entities and build every tier for a source tree
    #[command(after_help = r#"EXAMPLES:
    # Index the current directory
    tik index

    # Index a package into a separate data directory
    tik index --root src/ --data-dir .tik

    # Compute descriptors without calling the generation service
    tik index --dry-run

    # Refine edges through the generation service
    tik index --polish-edges
"#)]
    Index {
        /// Root of the source tree
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Use deterministic fallback descriptors only
        #[arg(long)]
        dry_run: bool,

        /// Ask the generation service to refine edge lists
        #[arg(long)]
        polish_edges: bool,

        /// Never contact the generation service
        #[arg(long)]
        offline: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Retrieve the entities most relevant to a question
    #[command(after_help = r#"EXAMPLES:
    # Ask a question against the index built for the current directory
    tik ask "how are tier files merged"

    # Return more results, with the rendered context
    tik ask "edge polishing" --top-k 8 --context

    # JSON output for scripting
    tik ask "retry policy" --json | jq '.hits[].key'
"#)]
    Ask {
        /// Natural-language query
        query: String,

        /// Root of the indexed source tree
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Number of results (default: retrieval.topK)
        #[arg(long)]
        top_k: Option<usize>,

        /// Also print the context block for the hits
        #[arg(long)]
        context: bool,

        /// Include every tier in the context regardless of query wording
        #[arg(long, requires = "context")]
        full: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show one entity with its snippet, edges and descriptor
    #[command(after_help = r#"EXAMPLES:
    # Show a method
    tik show Store.save

    # Show as JSON
    tik show Store --json
"#)]
    Show {
        /// Entity key, e.g. `Store.save`
        key: String,

        /// Root of the indexed source tree
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Inspect and maintain the tier files
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the embedding snapshot
    Embeddings {
        #[command(subcommand)]
        action: EmbeddingsAction,
    },
}

/// Tier maintenance subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print record counts and provenance per tier
    #[command(after_help = r#"EXAMPLES:
    # All tiers
    tik cache stat

    # One tier as JSON
    tik cache stat --tier descriptor --json
"#)]
    Stat {
        /// Tier to report (snippet, edges, descriptor); all when omitted
        #[arg(long)]
        tier: Option<Tier>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check a tier file for required fields and allowed values
    #[command(after_help = r#"EXAMPLES:
    # Validate every configured tier file
    tik cache validate

    # Validate a hand-edited copy
    tik cache validate --tier edges --file /tmp/edge_tier.json
"#)]
    Validate {
        /// Tier to validate; all when omitted
        #[arg(long)]
        tier: Option<Tier>,

        /// Tier file to check instead of the configured one
        #[arg(long, requires = "tier")]
        file: Option<PathBuf>,
    },

    /// Compare a tier file against another copy
    Diff {
        /// Tier of both files
        tier: Tier,

        /// File compared against the configured tier
        other: PathBuf,

        /// Use this file instead of the configured tier as the old side
        #[arg(long)]
        file: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Merge records from another file into a tier (incoming keys win)
    Merge {
        /// Tier of both files
        tier: Tier,

        /// File whose records are merged in
        other: PathBuf,

        /// Merge into this file instead of the configured tier
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

/// Embedding snapshot subcommands
#[derive(Subcommand, Debug)]
pub enum EmbeddingsAction {
    /// Delete the snapshot so the next build recomputes every vector
    Clear,
}

// ============================================================================
// Entry point
// ============================================================================

/// Parse arguments, configure logging and dispatch the command.
///
/// # Returns
///
/// Returns `ExitCode::SUCCESS` on success, or `ExitCode::FAILURE` on error.
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Warnings always (config issues, skipped records); debug with --verbose
    let log_level = if cli.verbose { "debug" } else { "warn" };
    let filter = format!(
        "tik_core={0},tik_db={0},tik_model={0},tik_cli={0}",
        log_level
    );

    tracing_subscriber::fmt()
        .with_env_filter(&filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let style = Style::new(cli.color);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let engine = load_config(&config_path, cli.data_dir.as_deref(), &cli.command)
        .and_then(|config| build_engine(config, &cli.command));

    let engine = match engine {
        Ok(engine) => engine,
        Err(e) => {
            let hint = if e.is_config_fault() {
                format!("Check your config at {}", config_path.display())
            } else {
                "Run with --verbose for details".to_string()
            };
            eprintln!(
                "{}",
                style.error_with_context(
                    "Failed to initialize TIK engine",
                    Some(&e.to_string()),
                    Some(&hint),
                )
            );
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Index { root, json, .. } => handle_index(&style, &engine, &root, json),
        Command::Ask {
            query,
            root,
            top_k,
            context,
            full,
            json,
        } => handle_ask(&style, &engine, &root, &query, top_k, context, full, json),
        Command::Show { key, root, json } => handle_show(&style, &engine, &root, &key, json),
        Command::Cache { action } => handle_cache(&style, &engine, action),
        Command::Embeddings { action } => handle_embeddings(&style, &engine, action),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style.message(MessageType::Err, &e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Load the config file and apply global and per-command overrides.
fn load_config(
    path: &Path,
    data_dir: Option<&Path>,
    command: &Command,
) -> Result<IndexConfig, IndexError> {
    let mut config = IndexConfig::from_path(path)?;
    if let Some(dir) = data_dir {
        config = config.with_data_dir(dir);
    }
    if let Command::Index {
        dry_run,
        polish_edges,
        ..
    } = command
    {
        config.descriptors.dry_run |= *dry_run;
        config.edges.polish |= *polish_edges;
    }
    Ok(config)
}

fn build_engine(config: IndexConfig, command: &Command) -> Result<IndexEngine, IndexError> {
    let engine = IndexEngine::new(config)?;
    match command {
        Command::Index { offline: true, .. } => Ok(engine.without_generation()),
        _ => Ok(engine),
    }
}

// ============================================================================
// Command handlers
// ============================================================================

fn handle_index(
    style: &Style,
    engine: &IndexEngine,
    root: &Path,
    json: bool,
) -> Result<(), IndexError> {
    let corpus = DirectoryCorpus::new(root, &engine.config().extraction);
    let report = engine.rebuild(&corpus)?;
    let stats: Vec<TierStats> = Tier::ALL.iter().map(|t| engine.cache_stats(*t)).collect();

    if json {
        let output = serde_json::json!({ "report": report, "tiers": stats });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "{}",
        style.message(
            MessageType::Ok,
            &format!(
                "Indexed {} entities from {} files",
                report.entities, report.files
            )
        )
    );
    print_report(style, engine, &report);
    println!();
    println!("{}", table::render_tier_stats(&stats));

    if report.storage_faults > 0 {
        println!();
        println!(
            "{}",
            style.message(
                MessageType::Warn,
                &format!(
                    "{} tier write(s) failed; the index is served from memory",
                    report.storage_faults
                )
            )
        );
    }
    if !engine.has_generation() && report.descriptors.fallback > 0 {
        println!(
            "{}",
            style.message(
                MessageType::Hint,
                "Set generation.endpoint in tik.yaml to generate descriptors"
            )
        );
    }
    Ok(())
}

fn print_report(style: &Style, engine: &IndexEngine, report: &InitReport) {
    println!(
        "{}",
        style.message_detail(
            "References",
            &format!(
                "{} resolved, {} dropped",
                report.graph.resolved, report.graph.dropped
            )
        )
    );
    if let Some(snapshot) = engine.snapshot() {
        let graph = snapshot.graph.summary();
        println!(
            "{}",
            style.message_detail(
                "Graph",
                &format!(
                    "{} nodes, {} edges, {} isolated",
                    graph.nodes, graph.edges, graph.isolated
                )
            )
        );
    }
    println!(
        "{}",
        style.message_detail(
            "Edges",
            &format!(
                "{} kept, {} polished, {} from analysis",
                report.edges.kept, report.edges.polished, report.edges.ast
            )
        )
    );
    println!(
        "{}",
        style.message_detail(
            "Descriptors",
            &format!(
                "{} generated, {} fallback, {} cached",
                report.descriptors.generated, report.descriptors.fallback, report.descriptors.cached
            )
        )
    );
    println!(
        "{}",
        style.message_detail("Embedded", &report.embedded.to_string())
    );
}

#[allow(clippy::too_many_arguments)]
fn handle_ask(
    style: &Style,
    engine: &IndexEngine,
    root: &Path,
    query: &str,
    top_k: Option<usize>,
    context: bool,
    full: bool,
    json: bool,
) -> Result<(), IndexError> {
    let corpus = DirectoryCorpus::new(root, &engine.config().extraction);
    engine.load(&corpus)?;

    let hits = engine.retrieve(query, top_k);
    let rendered = context.then(|| {
        if full {
            engine.build_context_with(&hits, ContextLevels::all())
        } else {
            engine.build_context(query, &hits)
        }
    });

    if json {
        let mut output = serde_json::json!({ "query": query, "hits": hits });
        if let Some(text) = &rendered {
            output["context"] = serde_json::Value::String(text.clone());
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", style.section("QUERY"));
    println!();
    println!("  {}", style.key_value("Query", query));

    if hits.is_empty() {
        println!();
        println!("{}", style.message(MessageType::Info, "No relevant entities found."));
        println!(
            "{}",
            style.message(MessageType::Hint, "Run `tik index` first if the index is empty")
        );
        return Ok(());
    }

    let snapshot = engine.snapshot();
    let rows: Vec<table::HitRow> = hits
        .iter()
        .map(|hit| {
            let entity = snapshot.as_ref().and_then(|s| s.entities.get(&hit.key));
            table::HitRow {
                key: hit.key.clone(),
                kind: entity.map(|e| e.kind.to_string()).unwrap_or_default(),
                score: hit.score,
                path: entity.map(|e| e.container_path.clone()).unwrap_or_default(),
            }
        })
        .collect();

    println!();
    println!("{}", style.section("RESULTS"));
    println!();
    println!("{}", table::render_hits_table(&rows));

    if let Some(text) = rendered {
        println!();
        println!("{}", style.section("CONTEXT"));
        println!();
        println!("{}", text);
    }
    Ok(())
}

fn handle_show(
    style: &Style,
    engine: &IndexEngine,
    root: &Path,
    key: &str,
    json: bool,
) -> Result<(), IndexError> {
    let corpus = DirectoryCorpus::new(root, &engine.config().extraction);
    engine.load(&corpus)?;
    let view = engine.get_entity(key)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let entity = &view.entity;
    println!("{}", style.section(&style.entity_key(&entity.key)));
    println!();
    println!("  {}", style.key_value("Kind", entity.kind.as_str()));
    println!("  {}", style.key_value("File", &entity.container_path));
    if let Some(container) = &entity.container_key {
        println!("  {}", style.key_value("Container", container));
    }
    println!("  {}", style.key_value("Weight", &format!("{:.2}", entity.weight)));
    println!("  {}", style.key_value("Centrality", &style.score(view.centrality)));
    println!(
        "  {}",
        style.key_value("Embedded", if view.has_embedding { "yes" } else { "no" })
    );

    if let Some(record) = &view.descriptor {
        let descriptor = &record.descriptor;
        println!();
        println!(
            "{}",
            style.section(&format!("DESCRIPTOR ({})", record.provenance.as_str()))
        );
        println!();
        println!("  {}", style.key_value("Purpose", &format::single_line(&descriptor.purpose)));
        if !descriptor.uses.is_empty() {
            println!("  {}", style.key_value("Uses", &descriptor.uses.join(", ")));
        }
        println!("  {}", style.key_value("Returns", &descriptor.returns));
        println!("  {}", style.key_value("Edge cases", &descriptor.edge_cases));
    }

    if let Some(record) = &view.edges {
        println!();
        println!(
            "{}",
            style.section(&format!("EDGES ({})", record.provenance.as_str()))
        );
        println!();
        if record.edges.is_empty() {
            println!("  (none)");
        } else {
            println!("{}", table::render_edges_table(&record.edges));
        }
    }

    if let Some(record) = &view.snippet {
        println!();
        println!(
            "{}",
            style.section(&format!("SNIPPET ({})", record.provenance.as_str()))
        );
        println!();
        println!("{}", record.snippet);
    }
    Ok(())
}

fn handle_cache(style: &Style, engine: &IndexEngine, action: CacheAction) -> Result<(), IndexError> {
    match action {
        CacheAction::Stat { tier, json } => handle_cache_stat(style, engine, tier, json),
        CacheAction::Validate { tier, file } => handle_cache_validate(style, engine, tier, file),
        CacheAction::Diff {
            tier,
            other,
            file,
            json,
        } => {
            let path = file.unwrap_or_else(|| tier_path(engine.config(), tier).to_path_buf());
            let result = match tier {
                Tier::Snippet => diff_files::<SnippetRecord>(&path, &other)?,
                Tier::Edges => diff_files::<EdgeRecord>(&path, &other)?,
                Tier::Descriptor => diff_files::<DescriptorRecord>(&path, &other)?,
            };
            print_diff(style, tier, &result, json)
        }
        CacheAction::Merge { tier, other, file } => {
            let path = file.unwrap_or_else(|| tier_path(engine.config(), tier).to_path_buf());
            let (incoming, total) = match tier {
                Tier::Snippet => merge_files::<SnippetRecord>(&path, &other)?,
                Tier::Edges => merge_files::<EdgeRecord>(&path, &other)?,
                Tier::Descriptor => merge_files::<DescriptorRecord>(&path, &other)?,
            };
            println!(
                "{}",
                style.message(
                    MessageType::Ok,
                    &format!(
                        "Merged {} {} record(s) into {} ({} total)",
                        incoming,
                        tier,
                        path.display(),
                        total
                    )
                )
            );
            Ok(())
        }
    }
}

fn handle_cache_stat(
    style: &Style,
    engine: &IndexEngine,
    tier: Option<Tier>,
    json: bool,
) -> Result<(), IndexError> {
    let tiers: Vec<Tier> = tier.map(|t| vec![t]).unwrap_or_else(|| Tier::ALL.to_vec());
    let stats: Vec<TierStats> = tiers.iter().map(|t| engine.cache_stats(*t)).collect();

    if json {
        let by_tier: BTreeMap<&str, &TierStats> =
            stats.iter().map(|s| (s.tier.as_str(), s)).collect();
        println!("{}", serde_json::to_string_pretty(&by_tier)?);
        return Ok(());
    }

    if stats.iter().all(|s| s.count == 0) {
        println!("{}", style.message(MessageType::Info, "Tiers are empty."));
        println!(
            "{}",
            style.message(MessageType::Hint, "Run `tik index` to build them")
        );
        return Ok(());
    }
    println!("{}", table::render_tier_stats(&stats));
    Ok(())
}

fn handle_cache_validate(
    style: &Style,
    engine: &IndexEngine,
    tier: Option<Tier>,
    file: Option<PathBuf>,
) -> Result<(), IndexError> {
    let tiers: Vec<Tier> = tier.map(|t| vec![t]).unwrap_or_else(|| Tier::ALL.to_vec());
    let mut invalid = 0;

    for tier in tiers {
        let path = file
            .clone()
            .unwrap_or_else(|| tier_path(engine.config(), tier).to_path_buf());
        let valid = match tier {
            Tier::Snippet => validate_file::<SnippetRecord>(&path)?,
            Tier::Edges => validate_file::<EdgeRecord>(&path)?,
            Tier::Descriptor => validate_file::<DescriptorRecord>(&path)?,
        };
        if valid {
            println!(
                "{}",
                style.list_item("+", &format!("{} ({})", tier, path.display()))
            );
        } else {
            invalid += 1;
            println!(
                "{}",
                style.list_item("-", &format!("{} ({})", tier, path.display()))
            );
        }
    }

    if invalid > 0 {
        return Err(anyhow!("{} tier file(s) failed validation", invalid).into());
    }
    println!("{}", style.message(MessageType::Ok, "Tier files are valid"));
    Ok(())
}

fn handle_embeddings(
    style: &Style,
    engine: &IndexEngine,
    action: EmbeddingsAction,
) -> Result<(), IndexError> {
    match action {
        EmbeddingsAction::Clear => {
            let path = &engine.config().cache.embeddings_path;
            if engine.clear_embeddings()? {
                println!(
                    "{}",
                    style.message(
                        MessageType::Ok,
                        &format!("Removed embedding snapshot {}", path.display())
                    )
                );
            } else {
                println!(
                    "{}",
                    style.message(
                        MessageType::Info,
                        &format!("No embedding snapshot at {}", path.display())
                    )
                );
            }
            Ok(())
        }
    }
}

// ============================================================================
// Tier file helpers
// ============================================================================

fn tier_path(config: &IndexConfig, tier: Tier) -> &Path {
    match tier {
        Tier::Snippet => &config.cache.snippet_path,
        Tier::Edges => &config.cache.edges_path,
        Tier::Descriptor => &config.cache.descriptor_path,
    }
}

/// Raw validation: every record must carry the required fields and parse.
fn validate_file<R: TierRecord>(path: &Path) -> Result<bool, IndexError> {
    let raw = TierStore::<R>::new(path).load_raw()?;
    Ok(validate_raw::<R>(&raw))
}

/// Load a file that must exist and hold only valid records.
fn load_strict<R: TierRecord>(path: &Path) -> Result<BTreeMap<String, R>, IndexError> {
    fs::metadata(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let store = TierStore::<R>::new(path);
    if !validate_raw::<R>(&store.load_raw()?) {
        return Err(anyhow!("{} is not a valid {} tier file", path.display(), R::TIER).into());
    }
    Ok(store.try_load()?)
}

fn diff_files<R: TierRecord>(old: &Path, new: &Path) -> Result<TierDiff, IndexError> {
    let old_records = TierStore::<R>::new(old).try_load()?;
    let new_records = load_strict::<R>(new)?;
    Ok(diff(&old_records, &new_records))
}

fn merge_files<R: TierRecord>(target: &Path, other: &Path) -> Result<(usize, usize), IndexError> {
    let incoming = load_strict::<R>(other)?;
    let count = incoming.len();
    let merged = TierStore::<R>::new(target).merge(incoming)?;
    tracing::debug!(tier = %R::TIER, incoming = count, total = merged.len(), "Merged tier file");
    Ok((count, merged.len()))
}

fn print_diff(style: &Style, tier: Tier, result: &TierDiff, json: bool) -> Result<(), IndexError> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    if result.is_empty() {
        println!(
            "{}",
            style.message(MessageType::Ok, &format!("No differences in {} tier", tier))
        );
        return Ok(());
    }

    println!(
        "{}",
        style.message(
            MessageType::Info,
            &format!(
                "{} tier: {} added, {} removed, {} changed",
                tier,
                result.added.len(),
                result.removed.len(),
                result.changed.len()
            )
        )
    );
    for key in &result.added {
        println!("{}", style.list_item("+", key));
    }
    for key in &result.removed {
        println!("{}", style.list_item("-", key));
    }
    for key in &result.changed {
        println!("{}", style.list_item("~", key));
    }
    Ok(())
}
