//! Conceptgraph CLI
//!
//! File-to-file tooling over the snapshot/restore core:
//! - validating portable snapshot documents
//! - cutting ontology-scoped snapshots out of full ones
//! - integrity repair and dangling-edge pruning
//! - packing/unpacking archive containers
//! - checkpointed restores, reconciliation included
//!
//! Exit codes: 0 = clean / nothing found, 1 = issues found (for a
//! dry-run prune: candidates found), 2 = operational error.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use conceptgraph_core::{BlobStore, FsBlobStore, MemoryGraphStore, NoopProgress};
use conceptgraph_restore::{
    ReferentialRepairer, RestoreCoordinator, RestoreInput, RestoreOptions, RestoreOutcome,
    DEFAULT_SIMILARITY_THRESHOLD,
};
use conceptgraph_snapshot::{
    extract, pack, ImportOptions, IntegrityValidator, SnapshotCodec, SnapshotDocument,
    SnapshotScope,
};

const EXIT_CLEAN: u8 = 0;
const EXIT_ISSUES: u8 = 1;
const EXIT_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "conceptgraph")]
#[command(author, version, about = "Concept graph snapshot and restore tooling")]
struct Cli {
    /// Emit machine-readable JSON reports instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a snapshot document. Exits non-zero when errors are found.
    Validate {
        /// Snapshot document (JSON).
        document: PathBuf,
    },

    /// Cut an ontology-scoped snapshot out of a full one.
    Scope {
        /// Source snapshot document (JSON).
        store: PathBuf,
        /// Ontology to scope to.
        #[arg(long)]
        ontology: String,
        /// Where to write the scoped document.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Find orphaned concepts and re-derive their grounding edges.
    Repair {
        /// Snapshot document holding the store state (JSON).
        store: PathBuf,
        /// Write repairs back instead of only reporting.
        #[arg(long)]
        apply: bool,
    },

    /// Find (and optionally delete) dangling relationships.
    Prune {
        /// Snapshot document holding the store state (JSON).
        store: PathBuf,
        /// Only consider relationships whose origin concept belongs to
        /// this ontology.
        #[arg(long)]
        ontology: Option<String>,
        /// Delete instead of dry-run reporting.
        #[arg(long)]
        apply: bool,
    },

    /// Pack a document plus its source payloads into an archive.
    Pack {
        /// Snapshot document (JSON).
        document: PathBuf,
        /// Directory the blob keys resolve against.
        #[arg(long)]
        blob_dir: Option<PathBuf>,
        /// Archive to write (.tar.gz).
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Unpack an archive into a directory.
    Unpack {
        /// Archive (.tar.gz).
        archive: PathBuf,
        /// Directory to write the document and payloads into.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Restore a snapshot into a store, checkpointed.
    Restore {
        /// Snapshot document holding the current store state (JSON).
        store: PathBuf,
        /// Snapshot to restore (document, or archive with --archive).
        snapshot: PathBuf,
        /// Treat the snapshot as an archive container.
        #[arg(long)]
        archive: bool,
        /// Reconcile torn references after an ontology-scoped restore.
        #[arg(long)]
        reconcile: bool,
        /// Create placeholder concepts for unmatched references.
        #[arg(long)]
        placeholders: bool,
        /// Similarity acceptance threshold for reconciliation.
        #[arg(long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
        threshold: f32,
        /// Where checkpoints are written.
        #[arg(long, default_value = "checkpoints")]
        checkpoint_dir: PathBuf,
        /// Blob directory to restore archive payloads into.
        #[arg(long)]
        blob_dir: Option<PathBuf>,
        /// Where to write the post-restore store state (defaults to the
        /// store path).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::Validate { document } => cmd_validate(&document, cli.json),
        Commands::Scope {
            store,
            ontology,
            output,
        } => cmd_scope(&store, &ontology, &output),
        Commands::Repair { store, apply } => cmd_repair(&store, apply, cli.json),
        Commands::Prune {
            store,
            ontology,
            apply,
        } => cmd_prune(&store, ontology.as_deref(), apply, cli.json),
        Commands::Pack {
            document,
            blob_dir,
            output,
        } => cmd_pack(&document, blob_dir.as_deref(), &output),
        Commands::Unpack { archive, output } => cmd_unpack(&archive, &output),
        Commands::Restore {
            store,
            snapshot,
            archive,
            reconcile,
            placeholders,
            threshold,
            checkpoint_dir,
            blob_dir,
            output,
        } => cmd_restore(RestoreArgs {
            store,
            snapshot,
            archive,
            reconcile,
            placeholders,
            threshold,
            checkpoint_dir,
            blob_dir,
            output,
            json: cli.json,
        }),
    }
}

/// Load a store from a snapshot document on disk.
fn load_store(path: &Path) -> Result<MemoryGraphStore> {
    let document = SnapshotDocument::load(path)
        .with_context(|| format!("loading store snapshot {}", path.display()))?;
    let store = MemoryGraphStore::new();
    SnapshotCodec::new(&store)
        .import(&document, &ImportOptions::overwrite(), &NoopProgress)
        .with_context(|| format!("applying store snapshot {}", path.display()))?;
    Ok(store)
}

fn save_store(store: &MemoryGraphStore, path: &Path) -> Result<()> {
    let document = SnapshotCodec::new(store).export(&SnapshotScope::Full)?;
    document
        .save(path)
        .with_context(|| format!("writing store snapshot {}", path.display()))?;
    Ok(())
}

fn cmd_validate(path: &Path, json: bool) -> Result<u8> {
    let document = SnapshotDocument::load(path)?;
    let report = IntegrityValidator::validate(&document);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for error in &report.errors {
            println!("{} {error}", "error:".red().bold());
        }
        for warning in &report.warnings {
            println!("{} {warning}", "warning:".yellow().bold());
        }
        for note in &report.info {
            println!("{} {note}", "info:".blue());
        }
        if report.external_dependency_count > 0 {
            println!(
                "{} {} external dependenc{}",
                "info:".blue(),
                report.external_dependency_count,
                if report.external_dependency_count == 1 { "y" } else { "ies" }
            );
        }
        if report.valid {
            println!("{} document is valid", "ok:".green().bold());
        }
    }
    Ok(if report.valid { EXIT_CLEAN } else { EXIT_ISSUES })
}

fn cmd_scope(store_path: &Path, ontology: &str, output: &Path) -> Result<u8> {
    let store = load_store(store_path)?;
    let document =
        SnapshotCodec::new(&store).export(&SnapshotScope::Ontology(ontology.to_string()))?;
    document.save(output)?;
    println!(
        "wrote {} ({} concepts, {} relationships)",
        output.display(),
        document.statistics.concepts,
        document.statistics.relationships
    );
    Ok(EXIT_CLEAN)
}

fn cmd_repair(store_path: &Path, apply: bool, json: bool) -> Result<u8> {
    let store = load_store(store_path)?;
    let report = ReferentialRepairer::new(&store).repair_orphans(!apply)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for orphan in &report.orphans {
            let status = if orphan.evidence_sources.is_empty() {
                "unrepairable".red()
            } else {
                "repairable".green()
            };
            println!("{status} orphan `{}` ({})", orphan.concept_id, orphan.label);
        }
        println!(
            "{} orphan(s), {} repairable, {} repaired",
            report.orphans.len(),
            report.repairable,
            report.repaired
        );
    }

    if apply && report.repaired > 0 {
        save_store(&store, store_path)?;
    }
    Ok(if report.orphans.is_empty() {
        EXIT_CLEAN
    } else {
        EXIT_ISSUES
    })
}

fn cmd_prune(
    store_path: &Path,
    ontology: Option<&str>,
    apply: bool,
    json: bool,
) -> Result<u8> {
    let store = load_store(store_path)?;
    let report = ReferentialRepairer::new(&store).prune(ontology, !apply)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for candidate in &report.candidates {
            println!("{} {}", "dangling:".yellow().bold(), candidate.key);
        }
        if apply {
            println!("deleted {} relationship(s)", report.deleted);
        } else {
            println!("{} candidate(s), dry run", report.candidates.len());
        }
    }

    if apply && report.deleted > 0 {
        save_store(&store, store_path)?;
    }
    Ok(if report.candidates.is_empty() {
        EXIT_CLEAN
    } else {
        EXIT_ISSUES
    })
}

fn cmd_pack(document_path: &Path, blob_dir: Option<&Path>, output: &Path) -> Result<u8> {
    let document = SnapshotDocument::load(document_path)?;
    let blob_dir = blob_dir.unwrap_or_else(|| Path::new("."));
    let blobs = FsBlobStore::new(blob_dir);
    let summary = pack(&document, &blobs, output)?;
    println!(
        "wrote {} ({} blob(s) packed, {} missing)",
        output.display(),
        summary.blobs_packed,
        summary.blobs_missing
    );
    Ok(EXIT_CLEAN)
}

fn cmd_unpack(archive_path: &Path, output: &Path) -> Result<u8> {
    let extracted = extract(archive_path)?;
    std::fs::create_dir_all(output)?;
    extracted
        .document
        .save(&output.join("snapshot.json"))?;
    let blob_root = output.join("documents");
    for (key, payload_path) in &extracted.blobs {
        let bytes = std::fs::read(payload_path)?;
        FsBlobStore::new(&blob_root).put(key, &bytes)?;
    }
    println!(
        "unpacked {} ({} blob(s)) into {}",
        archive_path.display(),
        extracted.blobs.len(),
        output.display()
    );
    extracted.cleanup();
    Ok(EXIT_CLEAN)
}

struct RestoreArgs {
    store: PathBuf,
    snapshot: PathBuf,
    archive: bool,
    reconcile: bool,
    placeholders: bool,
    threshold: f32,
    checkpoint_dir: PathBuf,
    blob_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    json: bool,
}

fn cmd_restore(args: RestoreArgs) -> Result<u8> {
    let store = load_store(&args.store)?;

    let mut options = RestoreOptions::new(&args.checkpoint_dir);
    options.reconcile = args.reconcile;
    options.reconcile_threshold = args.threshold;
    options.create_placeholders = args.placeholders;

    let blob_store = args.blob_dir.map(FsBlobStore::new);
    let mut coordinator = RestoreCoordinator::new(&store, options);
    if let Some(blobs) = blob_store.as_ref() {
        coordinator = coordinator.with_blob_store(blobs);
    }

    let input = if args.archive {
        RestoreInput::Archive(args.snapshot.clone())
    } else {
        RestoreInput::Document(args.snapshot.clone())
    };
    let report = coordinator.run(input)?;

    let output = args.output.as_deref().unwrap_or(&args.store);
    save_store(&store, output)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &report.outcome {
            RestoreOutcome::Committed => {
                println!("{} restore committed", "ok:".green().bold());
            }
            RestoreOutcome::RolledBack { apply_error } => {
                println!(
                    "{} apply failed, rolled back to checkpoint: {apply_error}",
                    "rolled back:".yellow().bold()
                );
                println!("checkpoint retained at {}", report.checkpoint_path);
            }
        }
        if let Some(counts) = &report.verified_counts {
            println!(
                "store now holds {} concepts, {} sources, {} instances, {} relationships",
                counts.concepts, counts.sources, counts.instances, counts.relationships
            );
        }
        if let Some(reconciliation) = &report.reconciliation {
            println!(
                "reconciled {} of {} external reference(s), pruned {} leftover edge(s)",
                reconciliation.stats.matched,
                reconciliation.stats.external_refs,
                reconciliation.leftovers.relationships_pruned
            );
        }
    }

    Ok(match report.outcome {
        RestoreOutcome::Committed => EXIT_CLEAN,
        RestoreOutcome::RolledBack { .. } => EXIT_ISSUES,
    })
}
