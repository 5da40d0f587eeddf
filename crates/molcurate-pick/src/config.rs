//! Curation settings, loadable from a JSON file.
//!
//! Every field has a default, so `{}` is a valid configuration.

use crate::PickError;
use molcurate_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CurationConfig {
    pub ranking: RankingConfig,
    pub selection: SelectionConfig,
    pub cover: CoverConfig,
    pub pick: PickConfig,
    pub store: StoreConfig,
}

impl CurationConfig {
    pub fn load(path: &Path) -> Result<Self, PickError> {
        let text = std::fs::read_to_string(path).map_err(|source| PickError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| {
            PickError::usage(path.display().to_string(), format!("bad config: {e}"))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RankingConfig {
    /// Resolutions at or above this stop being discriminative.
    pub resolution_cutoff_a: f64,
    pub resolution_bin_a: f64,
    pub clashscore_bin: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            resolution_cutoff_a: 4.0,
            resolution_bin_a: 0.1,
            clashscore_bin: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    /// Cluster namespaces to honor; empty means all of them.
    pub cluster_namespaces: Vec<String>,
    /// Assemblies whose best resolution is not below this are dropped.
    pub max_resolution_a: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            cluster_namespaces: Vec::new(),
            max_resolution_a: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoverConfig {
    pub exclude_nonbiological: bool,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            exclude_nonbiological: true,
        }
    }
}

/// When pick output becomes durable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Durability {
    /// One commit per assembly, memento included; resumable.
    #[default]
    PerAssembly,
    /// One commit at the end of the pass; all or nothing.
    WholeRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PickConfig {
    pub progress_interval: usize,
    pub durability: Durability,
}

impl Default for PickConfig {
    fn default() -> Self {
        Self {
            progress_interval: 1000,
            durability: Durability::PerAssembly,
        }
    }
}
