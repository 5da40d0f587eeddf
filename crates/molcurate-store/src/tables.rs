//! In-memory relations and the mutations that change them.
//!
//! `Tables` is the committed state. It is only ever changed by applying a
//! batch of [`Mutation`]s that has already passed [`Tables::validate`], so a
//! commit either lands completely or not at all.

use crate::ids::*;
use crate::schema::*;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

// ============================================================================
// Mutations
// ============================================================================

/// One logged change. A committed transaction is a sequence of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    InsertStructure(StructureRow),
    InsertModel(ModelRow),
    InsertAssembly(AssemblyRow),
    InsertChain(ChainRow),
    InsertEntity(EntityRow),
    InsertPolymerEntity(PolymerEntityRow),
    InsertMonomerEntity(MonomerEntityRow),
    InsertSubchain(SubchainRow),
    InsertAssemblySubchain {
        assembly_id: AssemblyId,
        subchain_id: SubchainId,
    },
    InsertEntityCluster(EntityClusterRow),
    InsertXtalQuality(XtalQualityRow),
    InsertEmQuality(EmQualityRow),
    InsertNmrQuality(NmrQualityRow),
    InsertClashscore(ClashscoreRow),
    BlacklistStructure(StructureId),
    InsertNonspecificLigand(String),
    IgnoreEntity(EntityId),
    SetStructureRank {
        structure_id: StructureId,
        rank: u32,
    },
    SetAssemblyRank {
        assembly_id: AssemblyId,
        rank: u32,
    },
    InsertAssemblySubchainCover(AssemblyId),
    /// Forget the assembly cover and the assembly ranks derived from it.
    ClearAssemblySubchainCover,
    InsertNonredundantSubchain(SubchainId),
    InsertNonredundantSubchainPair(SubchainId, SubchainId),
    /// Forget all pick output and the stored memento.
    ClearPickResults,
    PutMetadata {
        key: String,
        value: String,
    },
    PutMemento(Vec<u8>),
}

/// Summary of table sizes, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub structures: usize,
    pub ranked_structures: usize,
    pub models: usize,
    pub assemblies: usize,
    pub chains: usize,
    pub entities: usize,
    pub subchains: usize,
    pub entity_clusters: usize,
    pub blacklisted_structures: usize,
    pub ignored_entities: usize,
    pub assembly_subchain_cover: usize,
    pub ranked_assemblies: usize,
    pub nonredundant_subchains: usize,
    pub nonredundant_subchain_pairs: usize,
    pub has_memento: bool,
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    structures: BTreeMap<StructureId, StructureRow>,
    structure_index: BTreeMap<String, StructureId>,
    models: BTreeMap<ModelId, ModelRow>,
    assemblies: BTreeMap<AssemblyId, AssemblyRow>,
    chains: BTreeMap<ChainId, ChainRow>,
    entities: BTreeMap<EntityId, EntityRow>,
    polymer_entities: BTreeMap<EntityId, PolymerEntityRow>,
    monomer_entities: BTreeMap<EntityId, MonomerEntityRow>,
    subchains: BTreeMap<SubchainId, SubchainRow>,
    assembly_subchains: BTreeSet<(AssemblyId, SubchainId)>,
    entity_clusters: BTreeMap<(String, EntityId), u64>,
    quality_xtal: Vec<XtalQualityRow>,
    quality_em: Vec<EmQualityRow>,
    quality_nmr: Vec<NmrQualityRow>,
    quality_clashscore: Vec<ClashscoreRow>,
    blacklist: BTreeSet<StructureId>,
    nonspecific_ligands: BTreeSet<String>,
    ignored_entities: BTreeSet<EntityId>,
    assembly_ranks: BTreeMap<AssemblyId, u32>,
    assembly_subchain_cover: BTreeSet<AssemblyId>,
    nonredundant_subchains: BTreeSet<SubchainId>,
    nonredundant_subchain_pairs: BTreeSet<(SubchainId, SubchainId)>,
    metadata: BTreeMap<String, String>,
    memento: Option<Vec<u8>>,
}

/// Rows inserted earlier in the batch being validated, keyed to their owning
/// structure so cross-structure references can be rejected.
#[derive(Default)]
struct Staged {
    structures: HashSet<StructureId>,
    external_ids: HashSet<String>,
    models: HashSet<ModelId>,
    assemblies: HashMap<AssemblyId, StructureId>,
    chains: HashMap<ChainId, StructureId>,
    entities: HashMap<EntityId, StructureId>,
    subchains: HashMap<SubchainId, StructureId>,
    clusters: HashMap<(String, EntityId), u64>,
}

fn missing(table: &'static str, key: impl ToString) -> StoreError {
    StoreError::MissingRow {
        table,
        key: key.to_string(),
    }
}

fn duplicate(table: &'static str, key: impl ToString) -> StoreError {
    StoreError::DuplicateRow {
        table,
        key: key.to_string(),
    }
}

impl Tables {
    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Check a whole batch against the committed state plus the rows the batch
    /// itself inserts before them.
    pub fn validate(&self, batch: &[Mutation]) -> Result<(), StoreError> {
        let mut staged = Staged::default();

        for mutation in batch {
            match mutation {
                Mutation::InsertStructure(row) => {
                    if self.structures.contains_key(&row.id) || staged.structures.contains(&row.id) {
                        return Err(duplicate("structure", row.id));
                    }
                    if self.structure_index.contains_key(&row.external_id)
                        || !staged.external_ids.insert(row.external_id.clone())
                    {
                        return Err(duplicate("structure", &row.external_id));
                    }
                    if let Some(rank) = row.rank {
                        check_rank("structure", row.id, rank)?;
                    }
                    staged.structures.insert(row.id);
                }
                Mutation::InsertModel(row) => {
                    self.require_structure(&staged, row.structure_id)?;
                    if self.models.contains_key(&row.id) || !staged.models.insert(row.id) {
                        return Err(duplicate("model", row.id));
                    }
                }
                Mutation::InsertAssembly(row) => {
                    self.require_structure(&staged, row.structure_id)?;
                    if self.assemblies.contains_key(&row.id)
                        || staged.assemblies.insert(row.id, row.structure_id).is_some()
                    {
                        return Err(duplicate("assembly", row.id));
                    }
                }
                Mutation::InsertChain(row) => {
                    self.require_structure(&staged, row.structure_id)?;
                    if self.chains.contains_key(&row.id)
                        || staged.chains.insert(row.id, row.structure_id).is_some()
                    {
                        return Err(duplicate("chain", row.id));
                    }
                }
                Mutation::InsertEntity(row) => {
                    self.require_structure(&staged, row.structure_id)?;
                    if self.entities.contains_key(&row.id)
                        || staged.entities.insert(row.id, row.structure_id).is_some()
                    {
                        return Err(duplicate("entity", row.id));
                    }
                }
                Mutation::InsertPolymerEntity(row) => {
                    self.entity_owner(&staged, row.entity_id)?;
                }
                Mutation::InsertMonomerEntity(row) => {
                    self.entity_owner(&staged, row.entity_id)?;
                }
                Mutation::InsertSubchain(row) => {
                    let chain_owner = self.chain_owner(&staged, row.chain_id)?;
                    let entity_owner = self.entity_owner(&staged, row.entity_id)?;
                    if chain_owner != entity_owner {
                        return Err(StoreError::Constraint(format!(
                            "subchain {} joins chain {} and entity {} from different structures",
                            row.id, row.chain_id, row.entity_id
                        )));
                    }
                    if self.subchains.contains_key(&row.id)
                        || staged.subchains.insert(row.id, chain_owner).is_some()
                    {
                        return Err(duplicate("subchain", row.id));
                    }
                }
                Mutation::InsertAssemblySubchain {
                    assembly_id,
                    subchain_id,
                } => {
                    let assembly_owner = self.assembly_owner(&staged, *assembly_id)?;
                    let subchain_owner = self.subchain_owner(&staged, *subchain_id)?;
                    if assembly_owner != subchain_owner {
                        return Err(StoreError::Constraint(format!(
                            "assembly {assembly_id} and subchain {subchain_id} belong to different structures"
                        )));
                    }
                }
                Mutation::InsertEntityCluster(row) => {
                    self.entity_owner(&staged, row.entity_id)?;
                    let key = (row.namespace.clone(), row.entity_id);
                    let existing = self
                        .entity_clusters
                        .get(&key)
                        .copied()
                        .or_else(|| staged.clusters.get(&key).copied());
                    match existing {
                        Some(cluster) if cluster != row.cluster_id => {
                            return Err(StoreError::Constraint(format!(
                                "entity {} is already in cluster {} of namespace {:?}",
                                row.entity_id, cluster, row.namespace
                            )));
                        }
                        _ => {
                            staged.clusters.insert(key, row.cluster_id);
                        }
                    }
                }
                Mutation::InsertXtalQuality(row) => self.require_structure(&staged, row.structure_id)?,
                Mutation::InsertEmQuality(row) => self.require_structure(&staged, row.structure_id)?,
                Mutation::InsertNmrQuality(row) => self.require_structure(&staged, row.structure_id)?,
                Mutation::InsertClashscore(row) => self.require_structure(&staged, row.structure_id)?,
                Mutation::BlacklistStructure(id) => self.require_structure(&staged, *id)?,
                Mutation::IgnoreEntity(id) => {
                    self.entity_owner(&staged, *id)?;
                }
                Mutation::SetStructureRank { structure_id, rank } => {
                    self.require_structure(&staged, *structure_id)?;
                    check_rank("structure", *structure_id, *rank)?;
                }
                Mutation::SetAssemblyRank { assembly_id, rank } => {
                    self.assembly_owner(&staged, *assembly_id)?;
                    check_rank("assembly", *assembly_id, *rank)?;
                }
                Mutation::InsertAssemblySubchainCover(id) => {
                    self.assembly_owner(&staged, *id)?;
                }
                Mutation::InsertNonredundantSubchain(id) => {
                    self.subchain_owner(&staged, *id)?;
                }
                Mutation::InsertNonredundantSubchainPair(a, b) => {
                    if a == b {
                        return Err(StoreError::Constraint(format!(
                            "subchain pair ({a}, {b}) names the same subchain twice"
                        )));
                    }
                    self.subchain_owner(&staged, *a)?;
                    self.subchain_owner(&staged, *b)?;
                }
                Mutation::InsertNonspecificLigand(_)
                | Mutation::ClearAssemblySubchainCover
                | Mutation::ClearPickResults
                | Mutation::PutMetadata { .. }
                | Mutation::PutMemento(_) => {}
            }
        }

        Ok(())
    }

    fn require_structure(&self, staged: &Staged, id: StructureId) -> Result<(), StoreError> {
        if self.structures.contains_key(&id) || staged.structures.contains(&id) {
            Ok(())
        } else {
            Err(missing("structure", id))
        }
    }

    fn assembly_owner(&self, staged: &Staged, id: AssemblyId) -> Result<StructureId, StoreError> {
        self.assemblies
            .get(&id)
            .map(|row| row.structure_id)
            .or_else(|| staged.assemblies.get(&id).copied())
            .ok_or_else(|| missing("assembly", id))
    }

    fn chain_owner(&self, staged: &Staged, id: ChainId) -> Result<StructureId, StoreError> {
        self.chains
            .get(&id)
            .map(|row| row.structure_id)
            .or_else(|| staged.chains.get(&id).copied())
            .ok_or_else(|| missing("chain", id))
    }

    fn entity_owner(&self, staged: &Staged, id: EntityId) -> Result<StructureId, StoreError> {
        self.entities
            .get(&id)
            .map(|row| row.structure_id)
            .or_else(|| staged.entities.get(&id).copied())
            .ok_or_else(|| missing("entity", id))
    }

    fn subchain_owner(&self, staged: &Staged, id: SubchainId) -> Result<StructureId, StoreError> {
        if let Some(row) = self.subchains.get(&id) {
            return self.chain_owner(staged, row.chain_id);
        }
        staged
            .subchains
            .get(&id)
            .copied()
            .ok_or_else(|| missing("subchain", id))
    }

    // ------------------------------------------------------------------------
    // Application
    // ------------------------------------------------------------------------

    /// Apply one mutation. Callers validate the batch first.
    pub(crate) fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::InsertStructure(row) => {
                self.structure_index.insert(row.external_id.clone(), row.id);
                self.structures.insert(row.id, row);
            }
            Mutation::InsertModel(row) => {
                self.models.insert(row.id, row);
            }
            Mutation::InsertAssembly(row) => {
                self.assemblies.insert(row.id, row);
            }
            Mutation::InsertChain(row) => {
                self.chains.insert(row.id, row);
            }
            Mutation::InsertEntity(row) => {
                self.entities.insert(row.id, row);
            }
            Mutation::InsertPolymerEntity(row) => {
                self.polymer_entities.insert(row.entity_id, row);
            }
            Mutation::InsertMonomerEntity(row) => {
                self.monomer_entities.insert(row.entity_id, row);
            }
            Mutation::InsertSubchain(row) => {
                self.subchains.insert(row.id, row);
            }
            Mutation::InsertAssemblySubchain {
                assembly_id,
                subchain_id,
            } => {
                self.assembly_subchains.insert((assembly_id, subchain_id));
            }
            Mutation::InsertEntityCluster(row) => {
                self.entity_clusters
                    .insert((row.namespace, row.entity_id), row.cluster_id);
            }
            Mutation::InsertXtalQuality(row) => self.quality_xtal.push(row),
            Mutation::InsertEmQuality(row) => self.quality_em.push(row),
            Mutation::InsertNmrQuality(row) => self.quality_nmr.push(row),
            Mutation::InsertClashscore(row) => self.quality_clashscore.push(row),
            Mutation::BlacklistStructure(id) => {
                self.blacklist.insert(id);
            }
            Mutation::InsertNonspecificLigand(comp_id) => {
                self.nonspecific_ligands.insert(comp_id);
            }
            Mutation::IgnoreEntity(id) => {
                self.ignored_entities.insert(id);
            }
            Mutation::SetStructureRank { structure_id, rank } => {
                if let Some(row) = self.structures.get_mut(&structure_id) {
                    row.rank = Some(rank);
                }
            }
            Mutation::SetAssemblyRank { assembly_id, rank } => {
                self.assembly_ranks.insert(assembly_id, rank);
            }
            Mutation::InsertAssemblySubchainCover(id) => {
                self.assembly_subchain_cover.insert(id);
            }
            Mutation::ClearAssemblySubchainCover => {
                self.assembly_subchain_cover.clear();
                self.assembly_ranks.clear();
            }
            Mutation::InsertNonredundantSubchain(id) => {
                self.nonredundant_subchains.insert(id);
            }
            Mutation::InsertNonredundantSubchainPair(a, b) => {
                self.nonredundant_subchain_pairs.insert((a.min(b), a.max(b)));
            }
            Mutation::ClearPickResults => {
                self.nonredundant_subchains.clear();
                self.nonredundant_subchain_pairs.clear();
                self.memento = None;
            }
            Mutation::PutMetadata { key, value } => {
                self.metadata.insert(key, value);
            }
            Mutation::PutMemento(bytes) => {
                self.memento = Some(bytes);
            }
        }
    }

    /// Highest id handed out per table, used to resume id sequences on open.
    pub(crate) fn id_high_water(&self) -> IdSequences {
        fn last<K: Copy, V>(map: &BTreeMap<K, V>, raw: impl Fn(K) -> u32) -> u32 {
            map.keys().next_back().map(|&k| raw(k)).unwrap_or(0)
        }

        IdSequences {
            structure: last(&self.structures, StructureId::raw),
            model: last(&self.models, ModelId::raw),
            assembly: last(&self.assemblies, AssemblyId::raw),
            chain: last(&self.chains, ChainId::raw),
            entity: last(&self.entities, EntityId::raw),
            subchain: last(&self.subchains, SubchainId::raw),
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn structures(&self) -> impl Iterator<Item = &StructureRow> {
        self.structures.values()
    }

    pub fn structure(&self, id: StructureId) -> Option<&StructureRow> {
        self.structures.get(&id)
    }

    pub fn structure_by_external_id(&self, external_id: &str) -> Option<&StructureRow> {
        self.structure_index
            .get(external_id)
            .and_then(|id| self.structures.get(id))
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelRow> {
        self.models.values()
    }

    pub fn assemblies(&self) -> impl Iterator<Item = &AssemblyRow> {
        self.assemblies.values()
    }

    pub fn assembly(&self, id: AssemblyId) -> Option<&AssemblyRow> {
        self.assemblies.get(&id)
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainRow> {
        self.chains.values()
    }

    pub fn chain(&self, id: ChainId) -> Option<&ChainRow> {
        self.chains.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRow> {
        self.entities.values()
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityRow> {
        self.entities.get(&id)
    }

    pub fn polymer_entities(&self) -> impl Iterator<Item = &PolymerEntityRow> {
        self.polymer_entities.values()
    }

    pub fn monomer_entities(&self) -> impl Iterator<Item = &MonomerEntityRow> {
        self.monomer_entities.values()
    }

    pub fn subchains(&self) -> impl Iterator<Item = &SubchainRow> {
        self.subchains.values()
    }

    pub fn subchain(&self, id: SubchainId) -> Option<&SubchainRow> {
        self.subchains.get(&id)
    }

    /// Membership pairs, ordered by assembly then subchain.
    pub fn assembly_subchains(&self) -> impl Iterator<Item = (AssemblyId, SubchainId)> + '_ {
        self.assembly_subchains.iter().copied()
    }

    pub fn entity_clusters(&self) -> impl Iterator<Item = EntityClusterRow> + '_ {
        self.entity_clusters
            .iter()
            .map(|((namespace, entity_id), &cluster_id)| EntityClusterRow {
                namespace: namespace.clone(),
                entity_id: *entity_id,
                cluster_id,
            })
    }

    pub fn quality_xtal(&self) -> &[XtalQualityRow] {
        &self.quality_xtal
    }

    pub fn quality_em(&self) -> &[EmQualityRow] {
        &self.quality_em
    }

    pub fn quality_nmr(&self) -> &[NmrQualityRow] {
        &self.quality_nmr
    }

    pub fn quality_clashscore(&self) -> &[ClashscoreRow] {
        &self.quality_clashscore
    }

    pub fn blacklist(&self) -> &BTreeSet<StructureId> {
        &self.blacklist
    }

    pub fn nonspecific_ligands(&self) -> &BTreeSet<String> {
        &self.nonspecific_ligands
    }

    pub fn ignored_entities(&self) -> &BTreeSet<EntityId> {
        &self.ignored_entities
    }

    pub fn assembly_rank(&self, id: AssemblyId) -> Option<u32> {
        self.assembly_ranks.get(&id).copied()
    }

    pub fn assembly_ranks(&self) -> &BTreeMap<AssemblyId, u32> {
        &self.assembly_ranks
    }

    pub fn assembly_subchain_cover(&self) -> &BTreeSet<AssemblyId> {
        &self.assembly_subchain_cover
    }

    pub fn nonredundant_subchains(&self) -> &BTreeSet<SubchainId> {
        &self.nonredundant_subchains
    }

    /// Canonical pairs, first id always smaller.
    pub fn nonredundant_subchain_pairs(&self) -> &BTreeSet<(SubchainId, SubchainId)> {
        &self.nonredundant_subchain_pairs
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn memento(&self) -> Option<&[u8]> {
        self.memento.as_deref()
    }

    pub fn counts(&self) -> TableCounts {
        TableCounts {
            structures: self.structures.len(),
            ranked_structures: self.structures.values().filter(|s| s.rank.is_some()).count(),
            models: self.models.len(),
            assemblies: self.assemblies.len(),
            chains: self.chains.len(),
            entities: self.entities.len(),
            subchains: self.subchains.len(),
            entity_clusters: self.entity_clusters.len(),
            blacklisted_structures: self.blacklist.len(),
            ignored_entities: self.ignored_entities.len(),
            assembly_subchain_cover: self.assembly_subchain_cover.len(),
            ranked_assemblies: self.assembly_ranks.len(),
            nonredundant_subchains: self.nonredundant_subchains.len(),
            nonredundant_subchain_pairs: self.nonredundant_subchain_pairs.len(),
            has_memento: self.memento.is_some(),
        }
    }
}

fn check_rank(table: &'static str, id: impl ToString, rank: u32) -> Result<(), StoreError> {
    if rank == 0 {
        return Err(StoreError::Constraint(format!(
            "{table} {} has rank 0; ranks start at 1",
            id.to_string()
        )));
    }
    Ok(())
}
