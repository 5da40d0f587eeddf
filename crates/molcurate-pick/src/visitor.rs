//! The seam between the reducer and whatever consumes its decisions.
//!
//! The reducer owns the acceptance rule; a [`Visitor`] decides which features
//! an assembly offers and what to do with the accepted ones.

use crate::config::Durability;
use crate::memento::Memento;
use crate::universe::AssemblyView;
use crate::PickError;
use molcurate_store::{Database, Mutation, SubchainId};
use serde::{Deserialize, Serialize};

/// A bundle of features proposed together.
///
/// A candidate is accepted as a whole when any one of its features is chosen
/// for a cluster that has not been seen yet. Lower scores win ties before
/// frequency does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub subchains: Vec<SubchainId>,
    pub subchain_pairs: Vec<(SubchainId, SubchainId)>,
    pub score: i64,
}

impl Candidate {
    pub fn single(subchain: SubchainId) -> Self {
        Self {
            subchains: vec![subchain],
            ..Self::default()
        }
    }

    pub fn pair(a: SubchainId, b: SubchainId) -> Self {
        Self {
            subchain_pairs: vec![(a, b)],
            ..Self::default()
        }
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = score;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.subchains.is_empty() && self.subchain_pairs.is_empty()
    }
}

pub trait Visitor {
    /// Features offered by one assembly. Must not depend on earlier calls.
    fn propose(&self, assembly: &AssemblyView<'_>) -> Vec<Candidate>;

    /// Receive the accepted candidates of the assembly just processed.
    ///
    /// The memento already reflects this assembly; a visitor that persists it
    /// together with its results makes the pair atomic.
    fn accept(&mut self, accepted: &[Candidate], memento: &mut Memento) -> Result<(), PickError>;
}

/// Every subchain and every unordered pair of subchains.
pub fn propose_all_subchains_and_pairs(assembly: &AssemblyView<'_>) -> Vec<Candidate> {
    let subchains = assembly.subchains();
    let mut candidates: Vec<Candidate> = subchains.iter().map(|s| Candidate::single(s.id)).collect();
    for (i, a) in subchains.iter().enumerate() {
        for b in &subchains[i + 1..] {
            candidates.push(Candidate::pair(a.id, b.id));
        }
    }
    candidates
}

// ============================================================================
// Store-backed visitor
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptCounts {
    pub assemblies: usize,
    pub subchains: usize,
    pub subchain_pairs: usize,
}

/// Writes accepted features to the nonredundant tables.
pub struct PickVisitor<'db> {
    db: &'db mut Database,
    durability: Durability,
    pending: Vec<Mutation>,
    last_memento: Option<Vec<u8>>,
    counts: AcceptCounts,
}

impl<'db> PickVisitor<'db> {
    pub fn new(db: &'db mut Database, durability: Durability) -> Self {
        Self {
            db,
            durability,
            pending: Vec::new(),
            last_memento: None,
            counts: AcceptCounts::default(),
        }
    }

    pub fn counts(&self) -> AcceptCounts {
        self.counts
    }

    /// Commit whatever a whole-run pass buffered. Per-assembly passes have
    /// nothing left to write.
    pub fn finish(mut self) -> Result<AcceptCounts, PickError> {
        if self.durability == Durability::WholeRun {
            let mut mutations = std::mem::take(&mut self.pending);
            if let Some(bytes) = self.last_memento.take() {
                mutations.push(Mutation::PutMemento(bytes));
            }
            self.db.transaction(|_, _, tx| {
                tx.extend(mutations);
                Ok::<_, PickError>(())
            })?;
        }
        Ok(self.counts)
    }
}

impl Visitor for PickVisitor<'_> {
    fn propose(&self, assembly: &AssemblyView<'_>) -> Vec<Candidate> {
        propose_all_subchains_and_pairs(assembly)
    }

    fn accept(&mut self, accepted: &[Candidate], memento: &mut Memento) -> Result<(), PickError> {
        let mut mutations = Vec::new();
        for candidate in accepted {
            mutations.extend(candidate.subchains.iter().map(|&s| Mutation::InsertNonredundantSubchain(s)));
            mutations.extend(
                candidate
                    .subchain_pairs
                    .iter()
                    .map(|&(a, b)| Mutation::InsertNonredundantSubchainPair(a, b)),
            );
        }
        let subchains = accepted.iter().map(|c| c.subchains.len()).sum::<usize>();
        let pairs = accepted.iter().map(|c| c.subchain_pairs.len()).sum::<usize>();
        let bytes = memento.to_bytes()?;

        match self.durability {
            Durability::PerAssembly => {
                mutations.push(Mutation::PutMemento(bytes));
                self.db.transaction(|_, _, tx| {
                    tx.extend(mutations);
                    Ok::<_, PickError>(())
                })?;
            }
            Durability::WholeRun => {
                self.pending.extend(mutations);
                self.last_memento = Some(bytes);
            }
        }

        self.counts.assemblies += 1;
        self.counts.subchains += subchains;
        self.counts.subchain_pairs += pairs;
        Ok(())
    }
}
