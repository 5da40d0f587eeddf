//! Row types for every table in the store.
//!
//! Quality rows are the boundary where sentinel metrics ("0", "-1", NaN)
//! become `None`; nothing downstream sees a sentinel as a real value.

use crate::ids::*;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Enumerations
// ============================================================================

/// Experimental method recorded for a deposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExperimentalMethod {
    #[serde(rename = "ELECTRON CRYSTALLOGRAPHY")]
    ElectronCrystallography,
    #[serde(rename = "ELECTRON MICROSCOPY")]
    ElectronMicroscopy,
    #[serde(rename = "EPR")]
    Epr,
    #[serde(rename = "FIBER DIFFRACTION")]
    FiberDiffraction,
    #[serde(rename = "FLUORESCENCE TRANSFER")]
    FluorescenceTransfer,
    #[serde(rename = "INFRARED SPECTROSCOPY")]
    InfraredSpectroscopy,
    #[serde(rename = "NEUTRON DIFFRACTION")]
    NeutronDiffraction,
    #[serde(rename = "POWDER DIFFRACTION")]
    PowderDiffraction,
    #[serde(rename = "SOLID-STATE NMR")]
    SolidStateNmr,
    #[serde(rename = "SOLUTION NMR")]
    SolutionNmr,
    #[serde(rename = "SOLUTION SCATTERING")]
    SolutionScattering,
    #[serde(rename = "THEORETICAL MODEL")]
    TheoreticalModel,
    #[serde(rename = "X-RAY DIFFRACTION")]
    XRayDiffraction,
}

impl ExperimentalMethod {
    pub const ALL: [ExperimentalMethod; 13] = [
        Self::ElectronCrystallography,
        Self::ElectronMicroscopy,
        Self::Epr,
        Self::FiberDiffraction,
        Self::FluorescenceTransfer,
        Self::InfraredSpectroscopy,
        Self::NeutronDiffraction,
        Self::PowderDiffraction,
        Self::SolidStateNmr,
        Self::SolutionNmr,
        Self::SolutionScattering,
        Self::TheoreticalModel,
        Self::XRayDiffraction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ElectronCrystallography => "ELECTRON CRYSTALLOGRAPHY",
            Self::ElectronMicroscopy => "ELECTRON MICROSCOPY",
            Self::Epr => "EPR",
            Self::FiberDiffraction => "FIBER DIFFRACTION",
            Self::FluorescenceTransfer => "FLUORESCENCE TRANSFER",
            Self::InfraredSpectroscopy => "INFRARED SPECTROSCOPY",
            Self::NeutronDiffraction => "NEUTRON DIFFRACTION",
            Self::PowderDiffraction => "POWDER DIFFRACTION",
            Self::SolidStateNmr => "SOLID-STATE NMR",
            Self::SolutionNmr => "SOLUTION NMR",
            Self::SolutionScattering => "SOLUTION SCATTERING",
            Self::TheoreticalModel => "THEORETICAL MODEL",
            Self::XRayDiffraction => "X-RAY DIFFRACTION",
        }
    }
}

impl fmt::Display for ExperimentalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentalMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| format!("unknown experimental method: {s:?}"))
    }
}

/// How an assembly was defined by the depositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssemblyKind {
    AuthorDefined,
    SoftwareDefined,
    AuthorAndSoftwareDefined,
    /// Asymmetric units and other crystallographic conveniences.
    NonBiological,
    Unspecified,
}

impl AssemblyKind {
    /// Classify a free-text assembly tag.
    pub fn from_tag(tag: Option<&str>) -> Self {
        let Some(tag) = tag else {
            return Self::Unspecified;
        };
        let tag = tag.trim().to_ascii_lowercase();
        match tag.as_str() {
            "author_defined_assembly" => Self::AuthorDefined,
            "software_defined_assembly" => Self::SoftwareDefined,
            "author_and_software_defined_assembly" => Self::AuthorAndSoftwareDefined,
            t if t.contains("asymmetric unit") => Self::NonBiological,
            _ => Self::Unspecified,
        }
    }

    pub fn is_biological(self) -> bool {
        self != Self::NonBiological
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Polymer,
    NonPolymer,
    Branched,
    Water,
}

// ============================================================================
// Record rows
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureRow {
    pub id: StructureId,
    pub external_id: String,
    pub methods: Vec<ExperimentalMethod>,
    pub deposit_date: Option<NaiveDate>,
    pub full_atom: bool,
    /// Position in the global quality order, 1 = best.
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRow {
    pub id: ModelId,
    pub structure_id: StructureId,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyRow {
    pub id: AssemblyId,
    pub structure_id: StructureId,
    pub external_id: String,
    pub kind: AssemblyKind,
    pub polymer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRow {
    pub id: ChainId,
    pub structure_id: StructureId,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: EntityId,
    pub structure_id: StructureId,
    pub external_id: String,
    pub kind: EntityKind,
    pub formula_weight_da: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolymerEntityRow {
    pub entity_id: EntityId,
    pub polymer_type: Option<String>,
    pub sequence: Option<String>,
}

/// A non-polymer entity built from a single chemical component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonomerEntityRow {
    pub entity_id: EntityId,
    pub comp_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubchainRow {
    pub id: SubchainId,
    pub chain_id: ChainId,
    pub entity_id: EntityId,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityClusterRow {
    pub namespace: String,
    pub entity_id: EntityId,
    pub cluster_id: u64,
}

// ============================================================================
// Quality rows
// ============================================================================

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XtalQualityRow {
    pub structure_id: StructureId,
    pub resolution_a: Option<f64>,
    pub num_reflections: Option<u64>,
    pub r_work: Option<f64>,
    pub r_free: Option<f64>,
}

impl XtalQualityRow {
    pub fn new(
        structure_id: StructureId,
        resolution_a: Option<f64>,
        num_reflections: Option<u64>,
        r_work: Option<f64>,
        r_free: Option<f64>,
    ) -> Self {
        Self {
            structure_id,
            resolution_a: positive(resolution_a),
            num_reflections: num_reflections.filter(|&n| n > 0),
            r_work: positive(r_work),
            r_free: positive(r_free),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmQualityRow {
    pub structure_id: StructureId,
    pub resolution_a: Option<f64>,
    pub q_score: Option<f64>,
}

impl EmQualityRow {
    pub fn new(structure_id: StructureId, resolution_a: Option<f64>, q_score: Option<f64>) -> Self {
        Self {
            structure_id,
            resolution_a: positive(resolution_a),
            q_score: q_score.filter(|q| q.is_finite() && (-1.0..=1.0).contains(q)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NmrQualityRow {
    pub structure_id: StructureId,
    pub num_dist_restraints: Option<u32>,
}

impl NmrQualityRow {
    pub fn new(structure_id: StructureId, num_dist_restraints: Option<u32>) -> Self {
        Self {
            structure_id,
            num_dist_restraints: num_dist_restraints.filter(|&n| n > 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClashscoreRow {
    pub structure_id: StructureId,
    pub clashscore: Option<f64>,
}

impl ClashscoreRow {
    pub fn new(structure_id: StructureId, clashscore: Option<f64>) -> Self {
        Self {
            structure_id,
            clashscore: clashscore.filter(|c| c.is_finite() && *c >= 0.0),
        }
    }
}
