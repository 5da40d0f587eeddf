//! Molcurate ingestion
//!
//! Loads the inputs a curation run starts from into the record store:
//!
//! ```text
//!  structures.jsonl ──► ingest_structures ──┐
//!  clusters.txt     ──► ingest_entity_clusters
//!  blacklist.txt    ──► ingest_blacklist    ├──► Database
//!  ligands.txt      ──► ingest_nonspecific_ligands
//!  validation.jsonl ──► ingest_validation ──┘
//! ```
//!
//! Every operation returns an [`IngestReport`]. Errors carry the file and,
//! where there is one, the line they came from.

pub mod curation;
pub mod structures;
pub mod validation;

pub use curation::{
    ignore_low_weight_entities, ignore_nonspecific_entities, ingest_blacklist, ingest_entity_clusters,
    ingest_nonspecific_ligands,
};
pub use structures::ingest_structures;
pub use validation::{ingest_validation, ValidationRecord};

use molcurate_store::{StoreError, StructureId, Tables};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Errors
// ============================================================================

/// A file, optionally narrowed to one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: PathBuf,
    pub line: Option<usize>,
}

impl Location {
    pub fn file(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            line: None,
        }
    }

    pub fn line(path: &Path, line: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            line: Some(line),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.path.display(), line),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{location}: {message}")]
    Parse { location: Location, message: String },

    #[error("{location}: unknown {what} {name:?}")]
    Unknown {
        location: Location,
        what: &'static str,
        name: String,
    },

    #[error("{location}: structure {structure}: {source}")]
    Record {
        location: Location,
        structure: String,
        #[source]
        source: StoreError,
    },

    #[error("structure ids {first:?} and {second:?} differ only in case")]
    AmbiguousId { first: String, second: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    pub(crate) fn parse(location: Location, message: impl ToString) -> Self {
        Self::Parse {
            location,
            message: message.to_string(),
        }
    }

    /// The input names something the store does not hold.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::Unknown { .. } | Self::Parse { .. } | Self::AmbiguousId { .. } | Self::InvalidArgument(_)
        )
    }
}

// ============================================================================
// Reports
// ============================================================================

/// What one ingest call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Records (or lines) read from the input.
    pub read: usize,
    /// Rows that are new in the store.
    pub inserted: usize,
    /// Records that changed nothing: duplicates, unknown ids, empty records.
    pub skipped: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: IngestReport) {
        self.read += other.read;
        self.inserted += other.inserted;
        self.skipped += other.skipped;
    }
}

// ============================================================================
// Input helpers
// ============================================================================

pub(crate) fn read_to_string(path: &Path) -> Result<String, IngestError> {
    std::fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Stored structures keyed by lower-cased external id.
///
/// Ids that differ only in case cannot be told apart this way and are refused.
pub(crate) fn structure_index(tables: &Tables) -> Result<HashMap<String, StructureId>, IngestError> {
    let mut index: HashMap<String, StructureId> = HashMap::new();
    for structure in tables.structures() {
        if let Some(previous) = index.insert(structure.external_id.to_lowercase(), structure.id) {
            let first = tables
                .structure(previous)
                .map(|s| s.external_id.clone())
                .unwrap_or_default();
            return Err(IngestError::AmbiguousId {
                first,
                second: structure.external_id.clone(),
            });
        }
    }
    Ok(index)
}

/// Non-blank JSON lines, numbered from 1. `#` is ordinary text here.
pub(crate) fn json_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines().enumerate().filter_map(|(i, line)| {
        let line = line.trim();
        (!line.is_empty()).then_some((i + 1, line))
    })
}

/// Non-blank lines with `#` comments removed, numbered from 1.
pub(crate) fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines().enumerate().filter_map(|(i, line)| {
        let line = match line.find('#') {
            Some(at) => &line[..at],
            None => line,
        };
        let line = line.trim();
        (!line.is_empty()).then_some((i + 1, line))
    })
}
