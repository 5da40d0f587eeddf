//! Minimum assembly cover per structure.
//!
//! For one structure, find the fewest assemblies whose subchains together
//! include every subchain of the structure:
//!
//! ```text
//!   minimize   Σ x_j
//!   subject to A·x ≥ 1      rows = subchains, columns = assemblies
//!              x_j ∈ {0, 1}
//! ```
//!
//! Instances are tiny (tens of rows and columns), so the exact integer program
//! is solved directly with a branch-and-bound backend.

use crate::config::CoverConfig;
use crate::PickError;
use good_lp::{
    constraint, microlp, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};
use molcurate_store::{AssemblyId, AssemblyRow, Database, Mutation, StructureId, SubchainId, Tables};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Solve the set-cover program for one structure's `(assembly, subchain)`
/// memberships.
pub fn find_assembly_subchain_cover(
    memberships: &[(AssemblyId, SubchainId)],
) -> Result<BTreeSet<AssemblyId>, PickError> {
    let mut columns: BTreeMap<AssemblyId, BTreeSet<SubchainId>> = BTreeMap::new();
    let mut rows: BTreeMap<SubchainId, Vec<AssemblyId>> = BTreeMap::new();
    for &(assembly_id, subchain_id) in memberships {
        columns.entry(assembly_id).or_default().insert(subchain_id);
        rows.entry(subchain_id).or_default().push(assembly_id);
    }

    if columns.len() <= 1 {
        return Ok(columns.into_keys().collect());
    }

    let mut vars = ProblemVariables::new();
    let x: BTreeMap<AssemblyId, Variable> = columns
        .keys()
        .map(|&assembly_id| (assembly_id, vars.add(variable().binary())))
        .collect();

    let objective: Expression = x.values().copied().sum();
    let mut model = vars.minimise(objective).using(microlp);
    for assemblies in rows.values() {
        let coverage: Expression = assemblies.iter().map(|a| x[a]).sum();
        model = model.with(constraint!(coverage >= 1));
    }

    let solution = model.solve().map_err(|err| match err {
        ResolutionError::Infeasible => PickError::Invariant(format!(
            "set cover over {} assemblies reported infeasible",
            columns.len()
        )),
        other => PickError::Solver(other.to_string()),
    })?;

    let cover: BTreeSet<AssemblyId> = x
        .iter()
        .filter(|(_, &var)| solution.value(var) > 0.5)
        .map(|(&assembly_id, _)| assembly_id)
        .collect();

    let covered: BTreeSet<SubchainId> = cover
        .iter()
        .flat_map(|a| columns[a].iter().copied())
        .collect();
    if covered.len() != rows.len() {
        return Err(PickError::Invariant(format!(
            "solver returned {} assemblies covering {} of {} subchains",
            cover.len(),
            covered.len(),
            rows.len()
        )));
    }

    Ok(cover)
}

// ============================================================================
// Candidate assemblies
// ============================================================================

/// The memberships the cover is solved over, per structure.
///
/// Non-biological assemblies are dropped when configured, and of several
/// assemblies with exactly the same subchains only the one with the most
/// polymer chains survives (ties: external id, then surrogate id).
pub fn cover_candidates(
    tables: &Tables,
    config: &CoverConfig,
) -> BTreeMap<StructureId, Vec<(AssemblyId, SubchainId)>> {
    let mut subchains_of: BTreeMap<AssemblyId, BTreeSet<SubchainId>> = BTreeMap::new();
    for (assembly_id, subchain_id) in tables.assembly_subchains() {
        subchains_of.entry(assembly_id).or_default().insert(subchain_id);
    }

    let mut by_structure: BTreeMap<StructureId, BTreeMap<&BTreeSet<SubchainId>, &AssemblyRow>> =
        BTreeMap::new();
    for assembly in tables.assemblies() {
        if config.exclude_nonbiological && !assembly.kind.is_biological() {
            continue;
        }
        let Some(subchains) = subchains_of.get(&assembly.id) else {
            continue;
        };

        let preference = |a: &AssemblyRow| (Reverse(a.polymer_count), a.external_id.clone(), a.id);
        by_structure
            .entry(assembly.structure_id)
            .or_default()
            .entry(subchains)
            .and_modify(|kept| {
                if preference(assembly) < preference(kept) {
                    *kept = assembly;
                }
            })
            .or_insert(assembly);
    }

    by_structure
        .into_iter()
        .map(|(structure_id, unique)| {
            let memberships = unique
                .into_iter()
                .flat_map(|(subchains, assembly)| subchains.iter().map(move |&s| (assembly.id, s)))
                .collect();
            (structure_id, memberships)
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverSummary {
    pub structures: usize,
    pub candidate_assemblies: usize,
    pub cover_assemblies: usize,
}

/// Compute the cover of every structure and store it in one transaction,
/// replacing any earlier cover. Assembly ranks are cleared with it.
pub fn insert_assembly_subchain_covers(
    db: &mut Database,
    config: &CoverConfig,
) -> Result<CoverSummary, PickError> {
    let candidates = cover_candidates(db.tables(), config);

    let mut summary = CoverSummary::default();
    let mut cover = BTreeSet::new();
    for (structure_id, memberships) in &candidates {
        let assemblies: BTreeSet<AssemblyId> = memberships.iter().map(|&(a, _)| a).collect();
        let chosen = find_assembly_subchain_cover(memberships).map_err(|err| match err {
            PickError::Invariant(message) => {
                PickError::Invariant(format!("structure {structure_id}: {message}"))
            }
            other => other,
        })?;

        tracing::debug!(
            structure = %structure_id,
            candidates = assemblies.len(),
            cover = chosen.len(),
            "Solved assembly cover"
        );
        summary.structures += 1;
        summary.candidate_assemblies += assemblies.len();
        summary.cover_assemblies += chosen.len();
        cover.extend(chosen);
    }

    db.transaction(|_, _, tx| {
        tx.push(Mutation::ClearAssemblySubchainCover);
        tx.extend(cover.iter().map(|&a| Mutation::InsertAssemblySubchainCover(a)));
        Ok::<_, PickError>(())
    })?;

    tracing::info!(
        structures = summary.structures,
        candidates = summary.candidate_assemblies,
        cover = summary.cover_assemblies,
        "Inserted assembly subchain covers"
    );
    Ok(summary)
}
