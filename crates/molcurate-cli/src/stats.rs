use anyhow::Result;
use colored::Colorize;
use molcurate_store::{Database, TableCounts};
use std::io::Write;

pub fn print_stats(db: &Database, json: bool) -> Result<()> {
    let counts = db.tables().counts();
    if json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
        return Ok(());
    }

    let TableCounts {
        structures,
        ranked_structures,
        models,
        assemblies,
        chains,
        entities,
        subchains,
        entity_clusters,
        blacklisted_structures,
        ignored_entities,
        assembly_subchain_cover,
        ranked_assemblies,
        nonredundant_subchains,
        nonredundant_subchain_pairs,
        has_memento,
    } = counts;

    let rows = [
        ("structures", structures),
        ("  ranked", ranked_structures),
        ("  blacklisted", blacklisted_structures),
        ("models", models),
        ("assemblies", assemblies),
        ("  in cover", assembly_subchain_cover),
        ("  ranked", ranked_assemblies),
        ("chains", chains),
        ("entities", entities),
        ("  clustered", entity_clusters),
        ("  ignored", ignored_entities),
        ("subchains", subchains),
        ("nonredundant subchains", nonredundant_subchains),
        ("nonredundant pairs", nonredundant_subchain_pairs),
    ];

    match db.path() {
        Some(path) => println!("{} {}", "Store".green().bold(), path.display()),
        None => println!("{}", "Store (in memory)".green().bold()),
    }
    for (label, count) in rows {
        println!("  {label:<24} {count:>10}");
    }
    if has_memento {
        println!("{} a pick is in progress or complete; `pick --resume` continues it", "info:".yellow().bold());
    }
    Ok(())
}

/// One JSON object per accepted subchain or pair, on stdout.
pub fn print_nonredundant(db: &Database) -> Result<()> {
    let rows = molcurate_pick::extract_nonredundant(db.tables())?;
    let mut out = std::io::stdout().lock();
    for row in &rows {
        writeln!(out, "{}", serde_json::to_string(row)?)?;
    }
    out.flush()?;
    tracing::info!(rows = rows.len(), "Exported pick");
    Ok(())
}
