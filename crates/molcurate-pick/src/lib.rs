//! Molcurate pick: redundancy reduction over deposited structures
//!
//! ```text
//!  structures ──► rank_structures ──┐
//!                                    │
//!  assemblies ──► cover (ILP) ──► rank_assemblies
//!                                    │
//!  clusters, blacklist, ignores ──► select ──► PickUniverse (ordered)
//!                                                   │
//!                                                   ▼
//!                                  RedundancyReducer ◄──► Visitor
//!                                         │                 │
//!                                      Memento        nonredundant
//!                                                     subchains/pairs
//! ```
//!
//! ## Module Organization
//!
//! - `ranking`: lexicographic quality order of structures and assemblies
//! - `cover`: minimum assembly cover per structure
//! - `select`: exclusions and cluster assignment
//! - `universe`: the ordered, owned assembly stream
//! - `reducer`: the greedy acceptance rule and its engine
//! - `visitor`: proposal/acceptance seam and the store-backed visitor
//! - `memento`: checkpoint format
//! - `pick`: end-to-end runs against the store
//! - `export`: accepted subchains and pairs by external id

pub mod config;
pub mod cover;
pub mod error;
pub mod export;
pub mod memento;
pub mod pick;
pub mod ranking;
pub mod reducer;
pub mod select;
pub mod universe;
pub mod visitor;

pub use config::{CoverConfig, CurationConfig, Durability, PickConfig, RankingConfig, SelectionConfig};
pub use cover::{cover_candidates, find_assembly_subchain_cover, insert_assembly_subchain_covers, CoverSummary};
pub use error::PickError;
pub use export::{extract_nonredundant, NonredundantRow, SubchainLabel};
pub use memento::{Memento, MementoError};
pub use pick::{pick_assemblies, resume_pick_assemblies, run_pick, PickReport, PickStart};
pub use ranking::{
    insert_assembly_ranks, rank_assemblies, rank_structures, summarize_quality, update_structure_ranks,
    AssemblyRank, StructureQuality, StructureRank,
};
pub use reducer::{accept_nonredundant_subchain_pairs, accept_nonredundant_subchains, RedundancyReducer, Step};
pub use select::{select_relevant_assemblies, select_relevant_subchains};
pub use universe::{
    AssemblyView, ClusterId, ClusterPair, PickUniverse, RankKey, StructureView, SubchainView, UniverseAssembly,
};
pub use visitor::{propose_all_subchains_and_pairs, AcceptCounts, Candidate, PickVisitor, Visitor};
