//! Molcurate CLI
//!
//! One binary drives a curation run against a store directory:
//! - Ingesting structures, clusters, blacklists, ligand lists and validation metrics
//! - Ranking structures and assemblies, and solving assembly covers
//! - Picking a non-redundant set of subchains and subchain pairs (resumable)
//! - Exporting the pick, inspecting and checkpointing the store

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use molcurate_ingest::IngestReport;
use molcurate_pick::{CurationConfig, Memento, PickStart};
use molcurate_store::Database;
use std::path::{Path, PathBuf};
use tracing::Level;

mod stats;

#[derive(Parser)]
#[command(name = "molcurate")]
#[command(author, version, about = "Molcurate: redundancy reduction for macromolecular structures")]
struct Cli {
    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Curation settings (JSON); defaults apply to anything left out
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory (created if missing)
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load inputs into the store.
    Ingest {
        #[command(subcommand)]
        command: IngestCommands,
    },

    /// Ignore non-polymer entities lighter than a threshold.
    IgnoreLight {
        /// Formula weight threshold in daltons
        #[arg(long)]
        min_weight: f64,
    },

    /// Order every structure by quality.
    RankStructures,

    /// Find the minimum set of assemblies covering each structure.
    FindCovers,

    /// Rank the covering assemblies within each structure.
    RankAssemblies,

    /// Pick non-redundant subchains and subchain pairs.
    Pick {
        /// Continue the stored pick (or the one in --memento)
        #[arg(long, conflicts_with = "restart")]
        resume: bool,

        /// Discard any stored pick and start over
        #[arg(long)]
        restart: bool,

        /// Mirror every checkpoint to this file; resume from it when present
        #[arg(long)]
        memento: Option<PathBuf>,
    },

    /// Print the picked subchains and pairs as JSON lines.
    Export,

    /// Summarize table sizes.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Write a snapshot and truncate the write-ahead log.
    Checkpoint,
}

#[derive(Subcommand)]
enum IngestCommands {
    /// Structure records (JSON array or JSON lines; directories are searched)
    Structures {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Structure ids to exclude, one per line
    Blacklist { input: PathBuf },
    /// Component ids of non-specific ligands, one per line
    Ligands { input: PathBuf },
    /// `structure entity cluster` lines
    Clusters {
        input: PathBuf,
        /// Clustering the ids belong to (e.g. seq30)
        #[arg(long)]
        namespace: String,
    },
    /// Validation metrics, one JSON object per line
    Validation { input: PathBuf },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => CurationConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => CurationConfig::default(),
    };
    let mut db = Database::open_with_config(&cli.db, config.store.clone())
        .with_context(|| format!("opening store {}", cli.db.display()))?;

    match cli.command {
        Commands::Ingest { command } => cmd_ingest(&mut db, command)?,
        Commands::IgnoreLight { min_weight } => {
            let report = molcurate_ingest::ignore_low_weight_entities(&mut db, min_weight)?;
            print_report("Ignored", &format!("entities under {min_weight} Da"), &report);
        }
        Commands::RankStructures => cmd_rank_structures(&mut db, &config)?,
        Commands::FindCovers => {
            let summary = molcurate_pick::insert_assembly_subchain_covers(&mut db, &config.cover)?;
            println!(
                "{} {} assemblies cover {} structures ({} candidates)",
                "Covered".green().bold(),
                summary.cover_assemblies,
                summary.structures,
                summary.candidate_assemblies
            );
        }
        Commands::RankAssemblies => {
            let ranks = molcurate_pick::rank_assemblies(db.tables())?;
            molcurate_pick::insert_assembly_ranks(&mut db, &ranks)?;
            println!("{} {} assemblies", "Ranked".green().bold(), ranks.len());
        }
        Commands::Pick {
            resume,
            restart,
            memento,
        } => cmd_pick(&mut db, &config, resume, restart, memento.as_deref())?,
        Commands::Export => stats::print_nonredundant(&db)?,
        Commands::Stats { json } => stats::print_stats(&db, json)?,
        Commands::Checkpoint => {
            db.checkpoint()?;
            println!("{} {}", "Checkpointed".green().bold(), cli.db.display());
        }
    }

    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn print_report(verb: &str, what: &str, report: &IngestReport) {
    println!(
        "{} {} {} ({} read, {} skipped)",
        verb.green().bold(),
        report.inserted,
        what,
        report.read,
        report.skipped
    );
    if report.skipped > 0 {
        println!("{} {} records changed nothing; run with -v for details", "info:".yellow().bold(), report.skipped);
    }
}

fn cmd_ingest(db: &mut Database, command: IngestCommands) -> Result<()> {
    match command {
        IngestCommands::Structures { inputs } => {
            let mut total = IngestReport::default();
            for input in &inputs {
                println!("{} {}", "Ingesting".green().bold(), input.display());
                let report = molcurate_ingest::ingest_structures(db, input)
                    .with_context(|| format!("ingesting structures from {}", input.display()))?;
                total.merge(report);
            }
            print_report("Inserted", "structures", &total);
        }
        IngestCommands::Blacklist { input } => {
            let report = molcurate_ingest::ingest_blacklist(db, &input)?;
            print_report("Blacklisted", "structures", &report);
        }
        IngestCommands::Ligands { input } => {
            let report = molcurate_ingest::ingest_nonspecific_ligands(db, &input)?;
            print_report("Listed", "non-specific ligands", &report);
            println!("{} {} entities in total", "Ignoring".green().bold(), db.tables().ignored_entities().len());
        }
        IngestCommands::Clusters { input, namespace } => {
            let report = molcurate_ingest::ingest_entity_clusters(db, &input, &namespace)?;
            print_report("Clustered", &format!("entities in {namespace:?}"), &report);
        }
        IngestCommands::Validation { input } => {
            let report = molcurate_ingest::ingest_validation(db, &input)?;
            print_report("Recorded", "validation reports", &report);
        }
    }
    Ok(())
}

fn cmd_rank_structures(db: &mut Database, config: &CurationConfig) -> Result<()> {
    let ranks = molcurate_pick::rank_structures(db.tables(), &config.ranking)?;
    molcurate_pick::update_structure_ranks(db, &ranks)?;

    println!("{} {} structures", "Ranked".green().bold(), ranks.len());
    for rank in ranks.iter().take(5) {
        if let Some(structure) = db.tables().structure(rank.structure_id) {
            println!("  {:>6}  {}", rank.rank, structure.external_id);
        }
    }
    Ok(())
}

fn cmd_pick(
    db: &mut Database,
    config: &CurationConfig,
    resume: bool,
    restart: bool,
    memento: Option<&Path>,
) -> Result<()> {
    let start = match (resume, memento) {
        (true, Some(path)) if path.exists() => {
            let memento = Memento::load(path).with_context(|| format!("loading memento {}", path.display()))?;
            PickStart::ResumeFrom(memento)
        }
        (true, _) => PickStart::Resume,
        (false, _) if restart => PickStart::Restart,
        (false, _) => PickStart::Fresh,
    };

    let report = molcurate_pick::run_pick(db, config, start, memento)?;

    let verb = if report.resumed { "Resumed" } else { "Picked" };
    println!(
        "{} {} assemblies ({} already done)",
        verb.green().bold(),
        report.assemblies - report.skipped,
        report.skipped
    );
    println!(
        "  {:>8} non-redundant subchains ({} clusters)",
        report.nonredundant_subchains, report.included_clusters
    );
    println!(
        "  {:>8} non-redundant subchain pairs ({} cluster pairs)",
        report.nonredundant_subchain_pairs, report.included_cluster_pairs
    );
    Ok(())
}
