//! Typed surrogate keys.
//!
//! Every table that other tables refer to gets its own id type, so a
//! `SubchainId` can never be passed where an `EntityId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

surrogate_id!(
    /// One deposited record.
    StructureId
);
surrogate_id!(ModelId);
surrogate_id!(
    /// An assembly; external ids are only unique within a structure, this one is global.
    AssemblyId
);
surrogate_id!(ChainId);
surrogate_id!(EntityId);
surrogate_id!(
    /// The atomic unit the reducer reasons about.
    SubchainId
);

/// Per-table id sequences.
///
/// Sequences only move forward; ids handed out to a transaction that is later
/// rolled back are not reused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdSequences {
    pub structure: u32,
    pub model: u32,
    pub assembly: u32,
    pub chain: u32,
    pub entity: u32,
    pub subchain: u32,
}

impl IdSequences {
    pub fn next_structure(&mut self) -> StructureId {
        self.structure += 1;
        StructureId(self.structure)
    }

    pub fn next_model(&mut self) -> ModelId {
        self.model += 1;
        ModelId(self.model)
    }

    pub fn next_assembly(&mut self) -> AssemblyId {
        self.assembly += 1;
        AssemblyId(self.assembly)
    }

    pub fn next_chain(&mut self) -> ChainId {
        self.chain += 1;
        ChainId(self.chain)
    }

    pub fn next_entity(&mut self) -> EntityId {
        self.entity += 1;
        EntityId(self.entity)
    }

    pub fn next_subchain(&mut self) -> SubchainId {
        self.subchain += 1;
        SubchainId(self.subchain)
    }
}
