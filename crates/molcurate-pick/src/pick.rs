//! A full pick against the store: select, reduce, persist.

use crate::config::{CurationConfig, Durability};
use crate::memento::Memento;
use crate::reducer::RedundancyReducer;
use crate::universe::PickUniverse;
use crate::visitor::{AcceptCounts, PickVisitor};
use crate::PickError;
use molcurate_store::{Database, Mutation};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where a pick starts from.
#[derive(Debug, Clone)]
pub enum PickStart {
    /// Refuses to run over a stored pick.
    Fresh,
    /// Discards any stored pick output first.
    Restart,
    /// Continues from the memento kept in the store.
    Resume,
    /// Continues from a memento obtained elsewhere.
    ResumeFrom(Memento),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickReport {
    pub resumed: bool,
    pub assemblies: usize,
    pub skipped: usize,
    pub accepted: AcceptCounts,
    pub included_clusters: usize,
    pub included_cluster_pairs: usize,
    pub nonredundant_subchains: usize,
    pub nonredundant_subchain_pairs: usize,
}

/// Run a fresh pick. A stored pick is an error unless `restart` is set, in
/// which case its output is cleared first.
pub fn pick_assemblies(db: &mut Database, config: &CurationConfig, restart: bool) -> Result<PickReport, PickError> {
    let start = if restart { PickStart::Restart } else { PickStart::Fresh };
    run_pick(db, config, start, None)
}

/// Continue the pick whose memento is in the store.
pub fn resume_pick_assemblies(db: &mut Database, config: &CurationConfig) -> Result<PickReport, PickError> {
    run_pick(db, config, PickStart::Resume, None)
}

/// Run a pick, optionally mirroring every memento to `checkpoint`.
pub fn run_pick(
    db: &mut Database,
    config: &CurationConfig,
    start: PickStart,
    checkpoint: Option<&Path>,
) -> Result<PickReport, PickError> {
    // A whole-run pass writes no results until it ends, so a mid-run memento
    // file would point past results that were never stored.
    if checkpoint.is_some() && config.pick.durability == Durability::WholeRun {
        return Err(PickError::usage(
            "pick",
            "a memento file needs per-assembly durability",
        ));
    }

    let stored = db.tables().memento().map(<[u8]>::to_vec);
    let (memento, resumed) = match start {
        PickStart::Fresh => {
            if stored.is_some() {
                return Err(PickError::usage(
                    "pick",
                    "a previous pick is stored; resume it or restart",
                ));
            }
            (None, false)
        }
        PickStart::Restart => {
            db.transaction(|_, _, tx| {
                tx.push(Mutation::ClearPickResults);
                Ok::<_, PickError>(())
            })?;
            (None, false)
        }
        PickStart::Resume => {
            let bytes = stored.ok_or_else(|| PickError::usage("pick", "no stored pick to resume"))?;
            (Some(Memento::from_bytes(&bytes)?), true)
        }
        PickStart::ResumeFrom(memento) => (Some(memento), true),
    };

    let universe = PickUniverse::load(db.tables(), &config.selection)?;
    let reducer = match memento {
        Some(memento) => RedundancyReducer::resume(&universe, memento)?,
        None => RedundancyReducer::new(&universe),
    };
    let mut reducer = reducer.progress_every(config.pick.progress_interval);
    if let Some(path) = checkpoint {
        reducer = reducer.checkpoint_to(path);
    }
    let skipped = universe.len() - reducer.remaining();

    tracing::info!(
        assemblies = universe.len(),
        skipped,
        durability = ?config.pick.durability,
        "Starting pick"
    );

    let mut visitor = PickVisitor::new(db, config.pick.durability);
    let memento = reducer.run(&mut visitor)?;
    let accepted = visitor.finish()?;

    let tables = db.tables();
    Ok(PickReport {
        resumed,
        assemblies: universe.len(),
        skipped,
        accepted,
        included_clusters: memento.included_clusters.len(),
        included_cluster_pairs: memento.included_cluster_pairs.len(),
        nonredundant_subchains: tables.nonredundant_subchains().len(),
        nonredundant_subchain_pairs: tables.nonredundant_subchain_pairs().len(),
    })
}
