//! Error taxonomy for the core.
//!
//! Invariant violations are internal bugs and abort a pass. Usage errors point
//! at the input (a record id, a file) the operator has to fix.

use crate::memento::MementoError;
use molcurate_store::StoreError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PickError {
    #[error("Internal invariant violated: {0}")]
    Invariant(String),

    #[error("Invalid input ({record}): {message}")]
    Usage { record: String, message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Memento error: {0}")]
    Memento(#[from] MementoError),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PickError {
    pub fn usage(record: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Usage {
            record: record.into(),
            message: message.into(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Invariant(_) | Self::Solver(_))
    }
}
