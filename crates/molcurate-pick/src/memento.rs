//! Resumable pick checkpoints.
//!
//! A memento is a short fixed prefix followed by the CBOR-encoded [`Memento`]:
//!
//! ```text
//!   offset  size  field
//!   0       4     "MCMM"
//!   4       2     layout, u16 little endian
//!   6       8     body length, u64 little endian
//!   14      32    sha256 of bytes 0..14 followed by the body
//!   46      n     body
//! ```
//!
//! The same bytes are kept in the store and, optionally, in a side file.

use crate::universe::{ClusterId, ClusterPair, RankKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

const TAG: &[u8; 4] = b"MCMM";

/// Bump whenever the fields of [`Memento`] change.
pub const LAYOUT: u16 = 1;

const FIXED: usize = 14;
const PREFIX: usize = FIXED + 32;

#[derive(Debug, Error)]
pub enum MementoError {
    #[error("not a pick memento")]
    NotAMemento,

    #[error("memento layout {found} cannot be read (expected {LAYOUT})")]
    UnsupportedLayout { found: u16 },

    #[error("memento body is {actual} bytes, prefix says {expected}")]
    Truncated { expected: u64, actual: u64 },

    #[error("memento checksum mismatch")]
    ChecksumMismatch,

    #[error("memento does not match the current assemblies; restart the pick")]
    UniverseMismatch,

    #[error("memento encoding failed: {0}")]
    Serialization(String),

    #[error("memento decoding failed: {0}")]
    Deserialization(String),

    #[error("memento file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn digest(fixed: &[u8], body: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(fixed);
    hasher.update(body);
    hasher.finalize().into()
}

// ============================================================================
// Memento
// ============================================================================

/// Everything needed to continue a pick after the last processed assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memento {
    /// The last assembly whose results were accepted.
    pub last: Option<RankKey>,
    pub included_clusters: BTreeSet<ClusterId>,
    pub included_cluster_pairs: BTreeSet<ClusterPair>,
    /// Digest of the universe this memento was taken over.
    pub universe_digest: [u8; 32],
    /// Visitor-owned state, keyed by visitor.
    pub extensions: BTreeMap<String, Vec<u8>>,
}

impl Memento {
    pub fn new(universe_digest: [u8; 32]) -> Self {
        Self {
            last: None,
            included_clusters: BTreeSet::new(),
            included_cluster_pairs: BTreeSet::new(),
            universe_digest,
            extensions: BTreeMap::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MementoError> {
        let mut body = Vec::new();
        ciborium::into_writer(self, &mut body).map_err(|e| MementoError::Serialization(e.to_string()))?;

        let mut bytes = Vec::with_capacity(PREFIX + body.len());
        bytes.extend_from_slice(TAG);
        bytes.extend_from_slice(&LAYOUT.to_le_bytes());
        bytes.extend_from_slice(&(body.len() as u64).to_le_bytes());
        let sum = digest(&bytes, &body);
        bytes.extend_from_slice(&sum);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MementoError> {
        if bytes.len() < PREFIX || &bytes[..4] != TAG {
            return Err(MementoError::NotAMemento);
        }
        let (fixed, rest) = bytes.split_at(FIXED);
        let (sum, body) = rest.split_at(32);

        let layout = u16::from_le_bytes([fixed[4], fixed[5]]);
        if layout != LAYOUT {
            return Err(MementoError::UnsupportedLayout { found: layout });
        }
        let mut length = [0u8; 8];
        length.copy_from_slice(&fixed[6..FIXED]);
        let expected = u64::from_le_bytes(length);
        if body.len() as u64 != expected {
            return Err(MementoError::Truncated {
                expected,
                actual: body.len() as u64,
            });
        }
        if digest(fixed, body).as_slice() != sum {
            return Err(MementoError::ChecksumMismatch);
        }

        ciborium::from_reader(body).map_err(|e| MementoError::Deserialization(e.to_string()))
    }

    /// Write atomically: a temporary sibling is renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<(), MementoError> {
        let io = |source| MementoError::Io {
            path: path.display().to_string(),
            source,
        };
        let bytes = self.to_bytes()?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes).map_err(io)?;
        std::fs::rename(&tmp, path).map_err(io)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, MementoError> {
        let bytes = std::fs::read(path).map_err(|source| MementoError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }
}
