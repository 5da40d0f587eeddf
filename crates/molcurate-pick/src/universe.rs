//! The ordered stream of assemblies a pick walks over.
//!
//! A [`PickUniverse`] is an owned snapshot: once loaded it no longer borrows
//! the store, so the visitor is free to write to the store while the reducer
//! walks the universe.

use crate::config::SelectionConfig;
use crate::select::{select_relevant_assemblies, select_relevant_subchains};
use crate::PickError;
use molcurate_store::{AssemblyId, ChainId, EntityId, StructureId, SubchainId, Tables};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ============================================================================
// Keys
// ============================================================================

/// An equivalence class of entities, unique across namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(u64);

impl ClusterId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unordered pair of clusters, stored smaller-first. Both halves may be equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterPair(ClusterId, ClusterId);

impl ClusterPair {
    pub fn new(a: ClusterId, b: ClusterId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn first(self) -> ClusterId {
        self.0
    }

    pub fn second(self) -> ClusterId {
        self.1
    }
}

/// Position of an assembly in the global order.
///
/// Ascending structure rank, then assembly rank within the structure, then
/// assembly id. Unranked structures sort last; the structure id keeps their
/// assemblies together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RankKey {
    pub structure_rank: Option<u32>,
    pub structure_id: StructureId,
    pub assembly_rank: u32,
    pub assembly_id: AssemblyId,
}

impl RankKey {
    fn sort_tuple(&self) -> (bool, Option<u32>, StructureId, u32, AssemblyId) {
        (
            self.structure_rank.is_none(),
            self.structure_rank,
            self.structure_id,
            self.assembly_rank,
            self.assembly_id,
        )
    }
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_tuple().cmp(&other.sort_tuple())
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Views
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubchainView {
    pub id: SubchainId,
    pub external_id: String,
    pub chain_id: ChainId,
    pub chain_external_id: String,
    pub entity_id: EntityId,
    pub cluster_id: ClusterId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureView {
    pub id: StructureId,
    pub external_id: String,
    pub model_external_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseAssembly {
    pub key: RankKey,
    pub external_id: String,
    /// Relevant subchains only, by ascending id.
    pub subchains: Vec<SubchainView>,
}

/// What a visitor sees of one assembly.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyView<'a> {
    pub structure: &'a StructureView,
    pub assembly: &'a UniverseAssembly,
}

impl<'a> AssemblyView<'a> {
    pub fn id(&self) -> AssemblyId {
        self.assembly.key.assembly_id
    }

    pub fn key(&self) -> RankKey {
        self.assembly.key
    }

    pub fn external_id(&self) -> &'a str {
        &self.assembly.external_id
    }

    pub fn subchains(&self) -> &'a [SubchainView] {
        &self.assembly.subchains
    }
}

// ============================================================================
// Universe
// ============================================================================

#[derive(Debug, Clone)]
pub struct PickUniverse {
    structures: BTreeMap<StructureId, StructureView>,
    assemblies: Vec<UniverseAssembly>,
    digest: [u8; 32],
}

impl PickUniverse {
    /// Select the relevant subchains and assemblies and snapshot them in rank
    /// order.
    pub fn load(tables: &Tables, config: &SelectionConfig) -> Result<Self, PickError> {
        let clusters = select_relevant_subchains(tables, config)?;
        let ranked = select_relevant_assemblies(tables, &clusters, config)?;

        let mut members: HashMap<AssemblyId, Vec<SubchainId>> = HashMap::new();
        for (assembly_id, subchain_id) in tables.assembly_subchains() {
            if clusters.contains_key(&subchain_id) {
                members.entry(assembly_id).or_default().push(subchain_id);
            }
        }

        let mut structures = BTreeMap::new();
        let mut assemblies = Vec::with_capacity(ranked.len());
        for key in ranked {
            let assembly = tables
                .assembly(key.assembly_id)
                .ok_or_else(|| PickError::Invariant(format!("unknown assembly {}", key.assembly_id)))?;
            structures.entry(key.structure_id).or_insert_with(|| StructureView {
                id: key.structure_id,
                external_id: String::new(),
                model_external_ids: Vec::new(),
            });

            let mut subchains = Vec::new();
            for &subchain_id in members.get(&key.assembly_id).into_iter().flatten() {
                subchains.push(subchain_view(tables, subchain_id, clusters[&subchain_id])?);
            }
            assemblies.push(UniverseAssembly {
                key,
                external_id: assembly.external_id.clone(),
                subchains,
            });
        }

        for (id, view) in structures.iter_mut() {
            let row = tables
                .structure(*id)
                .ok_or_else(|| PickError::Invariant(format!("unknown structure {id}")))?;
            view.external_id = row.external_id.clone();
        }
        for model in tables.models() {
            if let Some(view) = structures.get_mut(&model.structure_id) {
                view.model_external_ids.push(model.external_id.clone());
            }
        }

        Self::from_parts(structures.into_values().collect(), assemblies)
    }

    /// Build a universe directly. Assemblies are put into rank order.
    pub fn from_parts(
        structures: Vec<StructureView>,
        mut assemblies: Vec<UniverseAssembly>,
    ) -> Result<Self, PickError> {
        let structures: BTreeMap<StructureId, StructureView> =
            structures.into_iter().map(|s| (s.id, s)).collect();

        assemblies.sort_by_key(|a| a.key);
        for pair in assemblies.windows(2) {
            if pair[0].key.assembly_id == pair[1].key.assembly_id {
                return Err(PickError::Invariant(format!(
                    "assembly {} appears twice in the universe",
                    pair[0].key.assembly_id
                )));
            }
        }
        for assembly in &mut assemblies {
            if !structures.contains_key(&assembly.key.structure_id) {
                return Err(PickError::Invariant(format!(
                    "assembly {} belongs to unknown structure {}",
                    assembly.key.assembly_id, assembly.key.structure_id
                )));
            }
            assembly.subchains.sort_by_key(|s| s.id);
        }

        let digest = digest(&assemblies);
        Ok(Self {
            structures,
            assemblies,
            digest,
        })
    }

    pub fn len(&self) -> usize {
        self.assemblies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty()
    }

    /// SHA-256 over the order, membership and clustering of every assembly.
    pub fn digest(&self) -> [u8; 32] {
        self.digest
    }

    pub fn get(&self, index: usize) -> Option<AssemblyView<'_>> {
        let assembly = self.assemblies.get(index)?;
        let structure = self.structures.get(&assembly.key.structure_id)?;
        Some(AssemblyView {
            structure,
            assembly,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = AssemblyView<'_>> + '_ {
        (0..self.assemblies.len()).filter_map(move |i| self.get(i))
    }

    /// Index of the first assembly strictly after `key`.
    pub fn position_after(&self, key: &RankKey) -> usize {
        self.assemblies.partition_point(|a| a.key <= *key)
    }
}

fn subchain_view(tables: &Tables, id: SubchainId, cluster_id: ClusterId) -> Result<SubchainView, PickError> {
    let subchain = tables
        .subchain(id)
        .ok_or_else(|| PickError::Invariant(format!("unknown subchain {id}")))?;
    let chain = tables
        .chain(subchain.chain_id)
        .ok_or_else(|| PickError::Invariant(format!("subchain {id} has unknown chain {}", subchain.chain_id)))?;
    Ok(SubchainView {
        id,
        external_id: subchain.external_id.clone(),
        chain_id: chain.id,
        chain_external_id: chain.external_id.clone(),
        entity_id: subchain.entity_id,
        cluster_id,
    })
}

fn digest(assemblies: &[UniverseAssembly]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for assembly in assemblies {
        let key = &assembly.key;
        hasher.update(key.structure_id.raw().to_le_bytes());
        hasher.update(key.structure_rank.unwrap_or(0).to_le_bytes());
        hasher.update(key.assembly_rank.to_le_bytes());
        hasher.update(key.assembly_id.raw().to_le_bytes());
        hasher.update((assembly.subchains.len() as u64).to_le_bytes());
        for subchain in &assembly.subchains {
            hasher.update(subchain.id.raw().to_le_bytes());
            hasher.update(subchain.chain_id.raw().to_le_bytes());
            hasher.update(subchain.cluster_id.raw().to_le_bytes());
        }
    }
    hasher.finalize().into()
}
