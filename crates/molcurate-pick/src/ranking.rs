//! Quality ranking of structures and of assemblies within a structure.
//!
//! Structures are ordered by a lexicographic key, one metric per level, each
//! level only breaking ties left by the one before:
//!
//! ```text
//!   resolution (binned, ≥ cutoff = unspecified)   lower first
//!   clashscore (binned)                            lower first
//!   NMR distance restraints                        higher first
//!   R-free                                         lower first
//!   Q-score                                        higher first
//!   deposit date                                   earlier first
//!   external id, surrogate id                      ascending
//! ```
//!
//! A missing value at any level sorts after every present value.

use crate::config::RankingConfig;
use crate::PickError;
use chrono::NaiveDate;
use molcurate_store::{AssemblyId, Database, Mutation, StructureId, Tables};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;

// ============================================================================
// Ordering helpers
// ============================================================================

/// `Present` always sorts before `Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Ranked<T> {
    Present(T),
    Absent,
}

impl<T> From<Option<T>> for Ranked<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Ranked::Absent, Ranked::Present)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TotalF64(f64);

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

fn bucket(value: f64, bin: f64) -> i64 {
    (value / bin).round() as i64
}

fn min_opt(acc: Option<f64>, value: Option<f64>) -> Option<f64> {
    match (acc, value) {
        (Some(a), Some(v)) => Some(a.min(v)),
        (a, v) => a.or(v),
    }
}

fn max_opt(acc: Option<f64>, value: Option<f64>) -> Option<f64> {
    match (acc, value) {
        (Some(a), Some(v)) => Some(a.max(v)),
        (a, v) => a.or(v),
    }
}

// ============================================================================
// Per-structure quality
// ============================================================================

/// The best value of every metric reported for one structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureQuality {
    pub structure_id: StructureId,
    pub external_id: String,
    pub deposit_date: Option<NaiveDate>,
    /// Lowest resolution over crystallographic and EM measurements.
    pub resolution_a: Option<f64>,
    pub clashscore: Option<f64>,
    pub nmr_dist_restraints: Option<u32>,
    pub r_free: Option<f64>,
    pub q_score: Option<f64>,
}

/// Aggregate the quality tables, one summary per structure in id order.
pub fn summarize_quality(tables: &Tables) -> Vec<StructureQuality> {
    let mut by_id: BTreeMap<StructureId, StructureQuality> = tables
        .structures()
        .map(|s| {
            (
                s.id,
                StructureQuality {
                    structure_id: s.id,
                    external_id: s.external_id.clone(),
                    deposit_date: s.deposit_date,
                    resolution_a: None,
                    clashscore: None,
                    nmr_dist_restraints: None,
                    r_free: None,
                    q_score: None,
                },
            )
        })
        .collect();

    for row in tables.quality_xtal() {
        if let Some(q) = by_id.get_mut(&row.structure_id) {
            q.resolution_a = min_opt(q.resolution_a, row.resolution_a);
            q.r_free = min_opt(q.r_free, row.r_free);
        }
    }
    for row in tables.quality_em() {
        if let Some(q) = by_id.get_mut(&row.structure_id) {
            q.resolution_a = min_opt(q.resolution_a, row.resolution_a);
            q.q_score = max_opt(q.q_score, row.q_score);
        }
    }
    for row in tables.quality_nmr() {
        if let Some(q) = by_id.get_mut(&row.structure_id) {
            q.nmr_dist_restraints = q.nmr_dist_restraints.max(row.num_dist_restraints);
        }
    }
    for row in tables.quality_clashscore() {
        if let Some(q) = by_id.get_mut(&row.structure_id) {
            q.clashscore = min_opt(q.clashscore, row.clashscore);
        }
    }

    by_id.into_values().collect()
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QualityKey<'a> {
    resolution: Ranked<i64>,
    clashscore: Ranked<i64>,
    nmr_dist_restraints: Ranked<Reverse<u32>>,
    r_free: Ranked<TotalF64>,
    q_score: Ranked<Reverse<TotalF64>>,
    deposit_date: Ranked<NaiveDate>,
    external_id: &'a str,
    structure_id: StructureId,
}

impl<'a> QualityKey<'a> {
    fn new(q: &'a StructureQuality, config: &RankingConfig) -> Self {
        let resolution = q
            .resolution_a
            .filter(|&r| r < config.resolution_cutoff_a)
            .map(|r| bucket(r, config.resolution_bin_a));

        Self {
            resolution: resolution.into(),
            clashscore: q.clashscore.map(|c| bucket(c, config.clashscore_bin)).into(),
            nmr_dist_restraints: q.nmr_dist_restraints.map(Reverse).into(),
            r_free: q.r_free.map(TotalF64).into(),
            q_score: q.q_score.map(|s| Reverse(TotalF64(s))).into(),
            deposit_date: q.deposit_date.into(),
            external_id: &q.external_id,
            structure_id: q.structure_id,
        }
    }
}

// ============================================================================
// Structure ranks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureRank {
    pub structure_id: StructureId,
    pub rank: u32,
}

fn one_based(index: usize) -> Result<u32, PickError> {
    u32::try_from(index + 1).map_err(|_| PickError::Invariant(format!("rank {index} overflows u32")))
}

/// Order every structure by quality. Ranks are 1..N in the returned order.
pub fn rank_structures(tables: &Tables, config: &RankingConfig) -> Result<Vec<StructureRank>, PickError> {
    for (name, bin) in [
        ("resolution_bin_a", config.resolution_bin_a),
        ("clashscore_bin", config.clashscore_bin),
    ] {
        if !(bin.is_finite() && bin > 0.0) {
            return Err(PickError::usage("ranking config", format!("{name} must be positive, got {bin}")));
        }
    }

    let qualities = summarize_quality(tables);
    let mut keyed: Vec<QualityKey<'_>> = qualities.iter().map(|q| QualityKey::new(q, config)).collect();
    keyed.sort_unstable();

    keyed
        .iter()
        .enumerate()
        .map(|(i, key)| {
            Ok(StructureRank {
                structure_id: key.structure_id,
                rank: one_based(i)?,
            })
        })
        .collect()
}

pub fn update_structure_ranks(db: &mut Database, ranks: &[StructureRank]) -> Result<(), PickError> {
    db.transaction(|_, _, tx| {
        tx.extend(ranks.iter().map(|r| Mutation::SetStructureRank {
            structure_id: r.structure_id,
            rank: r.rank,
        }));
        Ok::<_, PickError>(())
    })?;
    tracing::info!(structures = ranks.len(), "Updated structure ranks");
    Ok(())
}

// ============================================================================
// Assembly ranks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyRank {
    pub assembly_id: AssemblyId,
    /// Position within the owning structure, 1 = preferred.
    pub rank: u32,
}

/// Rank the covering assemblies of each structure: more polymer chains first,
/// then external id, then surrogate id.
pub fn rank_assemblies(tables: &Tables) -> Result<Vec<AssemblyRank>, PickError> {
    let mut by_structure: BTreeMap<StructureId, Vec<(Reverse<u32>, &str, AssemblyId)>> = BTreeMap::new();
    for &assembly_id in tables.assembly_subchain_cover() {
        let assembly = tables
            .assembly(assembly_id)
            .ok_or_else(|| PickError::Invariant(format!("cover names unknown assembly {assembly_id}")))?;
        by_structure.entry(assembly.structure_id).or_default().push((
            Reverse(assembly.polymer_count),
            assembly.external_id.as_str(),
            assembly.id,
        ));
    }

    let mut ranks = Vec::new();
    for assemblies in by_structure.values_mut() {
        assemblies.sort_unstable();
        for (i, &(_, _, assembly_id)) in assemblies.iter().enumerate() {
            ranks.push(AssemblyRank {
                assembly_id,
                rank: one_based(i)?,
            });
        }
    }
    Ok(ranks)
}

pub fn insert_assembly_ranks(db: &mut Database, ranks: &[AssemblyRank]) -> Result<(), PickError> {
    db.transaction(|_, _, tx| {
        tx.extend(ranks.iter().map(|r| Mutation::SetAssemblyRank {
            assembly_id: r.assembly_id,
            rank: r.rank,
        }));
        Ok::<_, PickError>(())
    })?;
    tracing::info!(assemblies = ranks.len(), "Inserted assembly ranks");
    Ok(())
}
