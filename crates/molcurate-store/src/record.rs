//! Structure records as produced by the ingestion side, and the operation that
//! inserts one into the store.

use crate::ids::*;
use crate::schema::*;
use crate::tables::Mutation;
use crate::{Database, StoreError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Record types
// ============================================================================

/// Everything known about one deposited structure, keyed by external ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructureRecord {
    pub id: String,
    #[serde(default)]
    pub methods: Vec<ExperimentalMethod>,
    #[serde(default)]
    pub deposit_date: Option<NaiveDate>,
    #[serde(default = "full_atom_default")]
    pub full_atom: bool,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub assemblies: Vec<AssemblyRecord>,
    #[serde(default)]
    pub assembly_subchains: Vec<AssemblySubchainRecord>,
    #[serde(default)]
    pub subchains: Vec<SubchainRecord>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub polymer_entities: Vec<PolymerEntityRecord>,
    #[serde(default)]
    pub monomer_entities: Vec<MonomerEntityRecord>,
    #[serde(default)]
    pub quality_xtal: Vec<XtalQualityRecord>,
    #[serde(default)]
    pub quality_em: Vec<EmQualityRecord>,
    #[serde(default)]
    pub quality_nmr: Vec<NmrQualityRecord>,
    #[serde(default)]
    pub clashscores: Vec<f64>,
}

fn full_atom_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyRecord {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub polymer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblySubchainRecord {
    pub assembly_id: String,
    pub subchain_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubchainRecord {
    pub id: String,
    pub chain_id: String,
    pub entity_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    #[serde(default)]
    pub formula_weight_da: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolymerEntityRecord {
    pub entity_id: String,
    #[serde(rename = "type", default)]
    pub polymer_type: Option<String>,
    #[serde(default)]
    pub sequence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonomerEntityRecord {
    pub entity_id: String,
    pub comp_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XtalQualityRecord {
    pub resolution_a: Option<f64>,
    pub num_reflections: Option<u64>,
    pub r_work: Option<f64>,
    pub r_free: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmQualityRecord {
    pub resolution_a: Option<f64>,
    pub q_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NmrQualityRecord {
    pub num_dist_restraints: Option<u32>,
}

// ============================================================================
// Builder
// ============================================================================

impl StructureRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            methods: Vec::new(),
            deposit_date: None,
            full_atom: true,
            models: Vec::new(),
            assemblies: Vec::new(),
            assembly_subchains: Vec::new(),
            subchains: Vec::new(),
            entities: Vec::new(),
            polymer_entities: Vec::new(),
            monomer_entities: Vec::new(),
            quality_xtal: Vec::new(),
            quality_em: Vec::new(),
            quality_nmr: Vec::new(),
            clashscores: Vec::new(),
        }
    }

    pub fn method(mut self, method: ExperimentalMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn deposited(mut self, date: NaiveDate) -> Self {
        self.deposit_date = Some(date);
        self
    }

    pub fn model(mut self, id: &str) -> Self {
        self.models.push(id.to_string());
        self
    }

    /// Add an assembly together with its subchain memberships.
    pub fn assembly(mut self, id: &str, tag: Option<&str>, polymer_count: u32, subchains: &[&str]) -> Self {
        self.assemblies.push(AssemblyRecord {
            id: id.to_string(),
            kind: tag.map(str::to_string),
            polymer_count,
        });
        self.assembly_subchains
            .extend(subchains.iter().map(|s| AssemblySubchainRecord {
                assembly_id: id.to_string(),
                subchain_id: s.to_string(),
            }));
        self
    }

    pub fn subchain(mut self, id: &str, chain_id: &str, entity_id: &str) -> Self {
        self.subchains.push(SubchainRecord {
            id: id.to_string(),
            chain_id: chain_id.to_string(),
            entity_id: entity_id.to_string(),
        });
        self
    }

    pub fn polymer_entity(mut self, id: &str, sequence: Option<&str>) -> Self {
        self.entities.push(EntityRecord {
            id: id.to_string(),
            kind: EntityKind::Polymer,
            formula_weight_da: None,
        });
        self.polymer_entities.push(PolymerEntityRecord {
            entity_id: id.to_string(),
            polymer_type: Some("polypeptide(L)".to_string()),
            sequence: sequence.map(str::to_string),
        });
        self
    }

    pub fn monomer_entity(mut self, id: &str, comp_id: &str, formula_weight_da: Option<f64>) -> Self {
        self.entities.push(EntityRecord {
            id: id.to_string(),
            kind: EntityKind::NonPolymer,
            formula_weight_da,
        });
        self.monomer_entities.push(MonomerEntityRecord {
            entity_id: id.to_string(),
            comp_id: comp_id.to_string(),
        });
        self
    }

    pub fn xtal(mut self, resolution_a: Option<f64>, r_free: Option<f64>) -> Self {
        self.quality_xtal.push(XtalQualityRecord {
            resolution_a,
            r_free,
            ..Default::default()
        });
        self
    }

    pub fn em(mut self, resolution_a: Option<f64>, q_score: Option<f64>) -> Self {
        self.quality_em.push(EmQualityRecord {
            resolution_a,
            q_score,
        });
        self
    }

    pub fn nmr(mut self, num_dist_restraints: u32) -> Self {
        self.quality_nmr.push(NmrQualityRecord {
            num_dist_restraints: Some(num_dist_restraints),
        });
        self
    }

    pub fn clashscore(mut self, clashscore: f64) -> Self {
        self.clashscores.push(clashscore);
        self
    }

    fn invalid(&self, message: impl Into<String>) -> StoreError {
        StoreError::InvalidRecord {
            record: self.id.clone(),
            message: message.into(),
        }
    }

    /// Internal consistency: unique child ids and resolvable references.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.id.trim().is_empty() {
            return Err(self.invalid("structure id is empty"));
        }

        let unique = |kind: &str, ids: Vec<&str>| -> Result<BTreeSet<String>, StoreError> {
            let mut seen = BTreeSet::new();
            for id in ids {
                if !seen.insert(id.to_string()) {
                    return Err(self.invalid(format!("duplicate {kind} id {id:?}")));
                }
            }
            Ok(seen)
        };

        unique("model", self.models.iter().map(String::as_str).collect())?;
        let assemblies = unique("assembly", self.assemblies.iter().map(|a| a.id.as_str()).collect())?;
        let subchains = unique("subchain", self.subchains.iter().map(|s| s.id.as_str()).collect())?;
        let entities = unique("entity", self.entities.iter().map(|e| e.id.as_str()).collect())?;

        for subchain in &self.subchains {
            if !entities.contains(&subchain.entity_id) {
                return Err(self.invalid(format!(
                    "subchain {:?} refers to unknown entity {:?}",
                    subchain.id, subchain.entity_id
                )));
            }
        }
        for member in &self.assembly_subchains {
            if !assemblies.contains(&member.assembly_id) {
                return Err(self.invalid(format!("unknown assembly {:?}", member.assembly_id)));
            }
            if !subchains.contains(&member.subchain_id) {
                return Err(self.invalid(format!(
                    "assembly {:?} refers to unknown subchain {:?}",
                    member.assembly_id, member.subchain_id
                )));
            }
        }
        let entity_refs = self
            .polymer_entities
            .iter()
            .map(|p| &p.entity_id)
            .chain(self.monomer_entities.iter().map(|m| &m.entity_id));
        for entity_id in entity_refs {
            if !entities.contains(entity_id) {
                return Err(self.invalid(format!("unknown entity {entity_id:?}")));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Insertion
// ============================================================================

fn sorted<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    ids.collect::<BTreeSet<_>>().into_iter().collect()
}

/// Insert one structure and all of its children in a single transaction.
///
/// Surrogate ids are assigned in ascending external-id order within each
/// table, so the same record always produces the same relative ids.
pub fn insert_structure(db: &mut Database, record: &StructureRecord) -> Result<StructureId, StoreError> {
    record.check()?;
    if db.tables().structure_by_external_id(&record.id).is_some() {
        return Err(record.invalid("structure already exists"));
    }

    db.transaction(|_, ids, tx| {
        let structure_id = ids.next_structure();
        tx.push(Mutation::InsertStructure(StructureRow {
            id: structure_id,
            external_id: record.id.clone(),
            methods: record.methods.clone(),
            deposit_date: record.deposit_date,
            full_atom: record.full_atom,
            rank: None,
        }));

        for model in sorted(record.models.iter().map(String::as_str)) {
            tx.push(Mutation::InsertModel(ModelRow {
                id: ids.next_model(),
                structure_id,
                external_id: model.to_string(),
            }));
        }

        let mut assembly_ids = BTreeMap::new();
        let mut assemblies: Vec<&AssemblyRecord> = record.assemblies.iter().collect();
        assemblies.sort_by(|a, b| a.id.cmp(&b.id));
        for assembly in assemblies {
            let id = ids.next_assembly();
            assembly_ids.insert(assembly.id.as_str(), id);
            tx.push(Mutation::InsertAssembly(AssemblyRow {
                id,
                structure_id,
                external_id: assembly.id.clone(),
                kind: AssemblyKind::from_tag(assembly.kind.as_deref()),
                polymer_count: assembly.polymer_count,
            }));
        }

        let mut chain_ids = BTreeMap::new();
        for chain in sorted(record.subchains.iter().map(|s| s.chain_id.as_str())) {
            let id = ids.next_chain();
            chain_ids.insert(chain, id);
            tx.push(Mutation::InsertChain(ChainRow {
                id,
                structure_id,
                external_id: chain.to_string(),
            }));
        }

        let mut entity_ids = BTreeMap::new();
        let mut entities: Vec<&EntityRecord> = record.entities.iter().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        for entity in entities {
            let id = ids.next_entity();
            entity_ids.insert(entity.id.as_str(), id);
            tx.push(Mutation::InsertEntity(EntityRow {
                id,
                structure_id,
                external_id: entity.id.clone(),
                kind: entity.kind,
                formula_weight_da: entity.formula_weight_da.filter(|w| w.is_finite() && *w > 0.0),
            }));
        }
        for polymer in &record.polymer_entities {
            tx.push(Mutation::InsertPolymerEntity(PolymerEntityRow {
                entity_id: entity_ids[polymer.entity_id.as_str()],
                polymer_type: polymer.polymer_type.clone(),
                sequence: polymer.sequence.clone(),
            }));
        }
        for monomer in &record.monomer_entities {
            tx.push(Mutation::InsertMonomerEntity(MonomerEntityRow {
                entity_id: entity_ids[monomer.entity_id.as_str()],
                comp_id: monomer.comp_id.clone(),
            }));
        }

        let mut subchain_ids = BTreeMap::new();
        let mut subchains: Vec<&SubchainRecord> = record.subchains.iter().collect();
        subchains.sort_by(|a, b| a.id.cmp(&b.id));
        for subchain in subchains {
            let id = ids.next_subchain();
            subchain_ids.insert(subchain.id.as_str(), id);
            tx.push(Mutation::InsertSubchain(SubchainRow {
                id,
                chain_id: chain_ids[subchain.chain_id.as_str()],
                entity_id: entity_ids[subchain.entity_id.as_str()],
                external_id: subchain.id.clone(),
            }));
        }

        for member in &record.assembly_subchains {
            tx.push(Mutation::InsertAssemblySubchain {
                assembly_id: assembly_ids[member.assembly_id.as_str()],
                subchain_id: subchain_ids[member.subchain_id.as_str()],
            });
        }

        for q in &record.quality_xtal {
            tx.push(Mutation::InsertXtalQuality(XtalQualityRow::new(
                structure_id,
                q.resolution_a,
                q.num_reflections,
                q.r_work,
                q.r_free,
            )));
        }
        for q in &record.quality_em {
            tx.push(Mutation::InsertEmQuality(EmQualityRow::new(
                structure_id,
                q.resolution_a,
                q.q_score,
            )));
        }
        for q in &record.quality_nmr {
            tx.push(Mutation::InsertNmrQuality(NmrQualityRow::new(
                structure_id,
                q.num_dist_restraints,
            )));
        }
        for &clashscore in &record.clashscores {
            tx.push(Mutation::InsertClashscore(ClashscoreRow::new(
                structure_id,
                Some(clashscore),
            )));
        }

        tracing::debug!(
            structure = %record.id,
            id = %structure_id,
            subchains = record.subchains.len(),
            assemblies = record.assemblies.len(),
            "Inserting structure"
        );
        Ok(structure_id)
    })
}
