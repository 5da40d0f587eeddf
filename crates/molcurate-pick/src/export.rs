//! Reading pick output back out by external ids.
//!
//! The store keeps accepted subchains and pairs by surrogate id only. Each
//! row is labelled with its structure, chain and subchain ids, plus the
//! assembly it was accepted from: the best-ranked covering assembly that
//! holds it, which is the first one the pass visited.

use crate::PickError;
use molcurate_store::{AssemblyId, StructureId, SubchainId, Tables};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubchainLabel {
    pub chain: String,
    pub subchain: String,
}

/// One line of exported pick output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NonredundantRow {
    Subchain {
        structure: String,
        /// `None` once the cover has been recomputed without re-ranking.
        assembly: Option<String>,
        #[serde(flatten)]
        label: SubchainLabel,
    },
    Pair {
        structure: String,
        assembly: Option<String>,
        first: SubchainLabel,
        second: SubchainLabel,
    },
}

struct Labeller<'a> {
    tables: &'a Tables,
    /// Ranked cover assemblies holding each subchain, best first.
    holders: BTreeMap<SubchainId, Vec<(u32, AssemblyId)>>,
}

impl<'a> Labeller<'a> {
    fn new(tables: &'a Tables) -> Self {
        let mut holders: BTreeMap<SubchainId, Vec<(u32, AssemblyId)>> = BTreeMap::new();
        for (assembly_id, subchain_id) in tables.assembly_subchains() {
            if !tables.assembly_subchain_cover().contains(&assembly_id) {
                continue;
            }
            if let Some(rank) = tables.assembly_rank(assembly_id) {
                holders.entry(subchain_id).or_default().push((rank, assembly_id));
            }
        }
        for list in holders.values_mut() {
            list.sort_unstable();
        }
        Self { tables, holders }
    }

    fn subchain(&self, id: SubchainId) -> Result<(StructureId, SubchainLabel), PickError> {
        let subchain = self
            .tables
            .subchain(id)
            .ok_or_else(|| PickError::Invariant(format!("picked subchain {id} is not stored")))?;
        let chain = self
            .tables
            .chain(subchain.chain_id)
            .ok_or_else(|| PickError::Invariant(format!("chain {} is not stored", subchain.chain_id)))?;
        Ok((
            chain.structure_id,
            SubchainLabel {
                chain: chain.external_id.clone(),
                subchain: subchain.external_id.clone(),
            },
        ))
    }

    fn structure(&self, id: StructureId) -> Result<String, PickError> {
        self.tables
            .structure(id)
            .map(|s| s.external_id.clone())
            .ok_or_else(|| PickError::Invariant(format!("structure {id} is not stored")))
    }

    /// Best-ranked covering assembly holding every subchain in `members`.
    fn assembly(&self, members: &[SubchainId]) -> Option<String> {
        let (first, rest) = members.split_first()?;
        let holds = |subchain: &SubchainId, assembly: AssemblyId| {
            self.holders
                .get(subchain)
                .is_some_and(|list| list.iter().any(|&(_, a)| a == assembly))
        };
        self.holders
            .get(first)?
            .iter()
            .map(|&(_, assembly)| assembly)
            .find(|&assembly| rest.iter().all(|s| holds(s, assembly)))
            .and_then(|assembly| self.tables.assembly(assembly))
            .map(|assembly| assembly.external_id.clone())
    }
}

/// Accepted subchains, then accepted pairs, in surrogate id order.
pub fn extract_nonredundant(tables: &Tables) -> Result<Vec<NonredundantRow>, PickError> {
    let labeller = Labeller::new(tables);
    let mut rows =
        Vec::with_capacity(tables.nonredundant_subchains().len() + tables.nonredundant_subchain_pairs().len());

    for &id in tables.nonredundant_subchains() {
        let (structure_id, label) = labeller.subchain(id)?;
        rows.push(NonredundantRow::Subchain {
            structure: labeller.structure(structure_id)?,
            assembly: labeller.assembly(&[id]),
            label,
        });
    }

    for &(a, b) in tables.nonredundant_subchain_pairs() {
        let (structure_id, first) = labeller.subchain(a)?;
        let (other, second) = labeller.subchain(b)?;
        if other != structure_id {
            return Err(PickError::Invariant(format!(
                "picked pair ({a}, {b}) spans structures {structure_id} and {other}"
            )));
        }
        rows.push(NonredundantRow::Pair {
            structure: labeller.structure(structure_id)?,
            assembly: labeller.assembly(&[a, b]),
            first,
            second,
        });
    }

    tracing::debug!(rows = rows.len(), "Extracted non-redundant subchains and pairs");
    Ok(rows)
}
