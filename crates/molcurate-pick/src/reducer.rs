//! Greedy single-pass redundancy reduction.
//!
//! ```text
//!         ┌───────┐  step   ┌────────────┐ propose/rule ┌──────────┐
//!  new ──►│ ready │────────►│ processing │─────────────►│ accepted │
//!         └───────┘         └────────────┘              └────┬─────┘
//!             ▲                                              │ accept + checkpoint
//!             └──────────────────────────────────────────────┘
//!         ready with no assemblies left ──► done
//! ```
//!
//! Assemblies are visited best-ranked first. Within one assembly, each
//! cluster (or unordered cluster pair) not yet represented gets exactly one
//! representative feature, and every candidate carrying that feature is
//! accepted. What has been represented so far lives in the [`Memento`], so a
//! pass can stop after any assembly and continue later with the same result.

use crate::memento::{Memento, MementoError};
use crate::universe::{ClusterId, ClusterPair, PickUniverse, RankKey, SubchainView};
use crate::visitor::{Candidate, Visitor};
use crate::PickError;
use molcurate_store::{AssemblyId, SubchainId};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

// ============================================================================
// Acceptance rule
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct FeatureStats {
    /// Lowest score of any candidate carrying the feature.
    score: i64,
    /// Number of candidates carrying the feature.
    count: usize,
}

impl FeatureStats {
    fn observe<K: Ord>(stats: &mut BTreeMap<K, FeatureStats>, feature: K, score: i64) {
        stats
            .entry(feature)
            .and_modify(|s| {
                s.score = s.score.min(score);
                s.count += 1;
            })
            .or_insert(FeatureStats { score, count: 1 });
    }
}

/// Candidates accepted for one assembly, and the clusters they newly cover.
#[derive(Debug, PartialEq, Eq)]
pub struct Acceptance<K> {
    pub candidates: BTreeSet<usize>,
    pub new_keys: Vec<K>,
}

impl<K> Default for Acceptance<K> {
    fn default() -> Self {
        Self {
            candidates: BTreeSet::new(),
            new_keys: Vec::new(),
        }
    }
}

fn lookup<'a>(
    subchains: &BTreeMap<SubchainId, &'a SubchainView>,
    id: SubchainId,
) -> Result<&'a SubchainView, PickError> {
    subchains
        .get(&id)
        .copied()
        .ok_or_else(|| PickError::Invariant(format!("candidate names subchain {id}, which is not in the assembly")))
}

/// Pick one single-subchain feature per unrepresented cluster.
///
/// Clusters are taken by descending proposal count. Within a cluster the
/// feature with the lowest score wins, then the most frequently proposed,
/// then the one on the chain that sorts first, then the lowest subchain id.
pub fn accept_nonredundant_subchains(
    candidates: &[Candidate],
    subchains: &BTreeMap<SubchainId, &SubchainView>,
    included: &BTreeSet<ClusterId>,
) -> Result<Acceptance<ClusterId>, PickError> {
    let mut stats: BTreeMap<SubchainId, FeatureStats> = BTreeMap::new();
    let mut carriers: BTreeMap<SubchainId, Vec<usize>> = BTreeMap::new();
    for (i, candidate) in candidates.iter().enumerate() {
        let features: BTreeSet<SubchainId> = candidate.subchains.iter().copied().collect();
        for feature in features {
            lookup(subchains, feature)?;
            FeatureStats::observe(&mut stats, feature, candidate.score);
            carriers.entry(feature).or_default().push(i);
        }
    }

    let mut by_cluster: BTreeMap<ClusterId, Vec<(SubchainId, FeatureStats)>> = BTreeMap::new();
    for (feature, stats) in stats {
        by_cluster
            .entry(subchains[&feature].cluster_id)
            .or_default()
            .push((feature, stats));
    }

    let mut order: Vec<(Reverse<usize>, ClusterId)> = by_cluster
        .iter()
        .map(|(&cluster, features)| (Reverse(features.iter().map(|(_, s)| s.count).sum()), cluster))
        .collect();
    order.sort_unstable();

    let mut acceptance = Acceptance::default();
    for (_, cluster) in order {
        if included.contains(&cluster) {
            continue;
        }
        let best = by_cluster[&cluster]
            .iter()
            .min_by_key(|&&(feature, stats)| {
                (
                    stats.score,
                    Reverse(stats.count),
                    subchains[&feature].chain_external_id.as_str(),
                    feature,
                )
            })
            .map(|&(feature, _)| feature);
        if let Some(feature) = best {
            acceptance.candidates.extend(carriers[&feature].iter().copied());
            acceptance.new_keys.push(cluster);
        }
    }
    Ok(acceptance)
}

/// Pick one pair feature per unrepresented unordered cluster pair.
///
/// Same ordering as for single subchains, except that after frequency a pair
/// whose subchains share a chain beats one that spans two chains.
pub fn accept_nonredundant_subchain_pairs(
    candidates: &[Candidate],
    subchains: &BTreeMap<SubchainId, &SubchainView>,
    included: &BTreeSet<ClusterPair>,
) -> Result<Acceptance<ClusterPair>, PickError> {
    let mut stats: BTreeMap<(SubchainId, SubchainId), FeatureStats> = BTreeMap::new();
    let mut carriers: BTreeMap<(SubchainId, SubchainId), Vec<usize>> = BTreeMap::new();
    for (i, candidate) in candidates.iter().enumerate() {
        let mut features = BTreeSet::new();
        for &(a, b) in &candidate.subchain_pairs {
            if a == b {
                return Err(PickError::Invariant(format!("candidate pairs subchain {a} with itself")));
            }
            lookup(subchains, a)?;
            lookup(subchains, b)?;
            features.insert((a.min(b), a.max(b)));
        }
        for feature in features {
            FeatureStats::observe(&mut stats, feature, candidate.score);
            carriers.entry(feature).or_default().push(i);
        }
    }

    let mut by_cluster_pair: BTreeMap<ClusterPair, Vec<((SubchainId, SubchainId), FeatureStats, bool)>> =
        BTreeMap::new();
    for ((a, b), stats) in stats {
        let (va, vb) = (subchains[&a], subchains[&b]);
        by_cluster_pair
            .entry(ClusterPair::new(va.cluster_id, vb.cluster_id))
            .or_default()
            .push(((a, b), stats, va.chain_id == vb.chain_id));
    }

    let mut order: Vec<(Reverse<usize>, ClusterPair)> = by_cluster_pair
        .iter()
        .map(|(&key, features)| (Reverse(features.iter().map(|(_, s, _)| s.count).sum()), key))
        .collect();
    order.sort_unstable();

    let mut acceptance = Acceptance::default();
    for (_, key) in order {
        if included.contains(&key) {
            continue;
        }
        let best = by_cluster_pair[&key]
            .iter()
            .min_by_key(|&&(feature, stats, same_chain)| {
                (stats.score, Reverse(stats.count), !same_chain, feature)
            })
            .map(|&(feature, _, _)| feature);
        if let Some(feature) = best {
            acceptance.candidates.extend(carriers[&feature].iter().copied());
            acceptance.new_keys.push(key);
        }
    }
    Ok(acceptance)
}

// ============================================================================
// Engine
// ============================================================================

/// Outcome of one [`RedundancyReducer::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Processed {
        assembly_id: AssemblyId,
        accepted: usize,
    },
    Done,
}

pub struct RedundancyReducer<'u> {
    universe: &'u PickUniverse,
    memento: Memento,
    cursor: usize,
    processed: usize,
    checkpoint: Option<PathBuf>,
    progress_interval: usize,
}

impl<'u> RedundancyReducer<'u> {
    pub fn new(universe: &'u PickUniverse) -> Self {
        Self {
            universe,
            memento: Memento::new(universe.digest()),
            cursor: 0,
            processed: 0,
            checkpoint: None,
            progress_interval: 0,
        }
    }

    /// Continue after the last assembly recorded in `memento`.
    pub fn resume(universe: &'u PickUniverse, memento: Memento) -> Result<Self, PickError> {
        if memento.universe_digest != universe.digest() {
            return Err(MementoError::UniverseMismatch.into());
        }
        let cursor = memento
            .last
            .as_ref()
            .map_or(0, |last| universe.position_after(last));

        tracing::info!(
            skipped = cursor,
            remaining = universe.len() - cursor,
            clusters = memento.included_clusters.len(),
            cluster_pairs = memento.included_cluster_pairs.len(),
            "Resuming pick"
        );
        Ok(Self {
            universe,
            memento,
            cursor,
            processed: 0,
            checkpoint: None,
            progress_interval: 0,
        })
    }

    /// Also save the memento to `path` after every accepted assembly.
    pub fn checkpoint_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(path.into());
        self
    }

    /// Log progress every `interval` assemblies; 0 disables it.
    pub fn progress_every(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn memento(&self) -> &Memento {
        &self.memento
    }

    pub fn remaining(&self) -> usize {
        self.universe.len() - self.cursor
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn step<V: Visitor + ?Sized>(&mut self, visitor: &mut V) -> Result<Step, PickError> {
        let universe = self.universe;
        let Some(assembly) = universe.get(self.cursor) else {
            return Ok(Step::Done);
        };

        let candidates = visitor.propose(&assembly);
        let subchains: BTreeMap<SubchainId, &SubchainView> =
            assembly.subchains().iter().map(|s| (s.id, s)).collect();

        let singles = accept_nonredundant_subchains(&candidates, &subchains, &self.memento.included_clusters)?;
        let pairs =
            accept_nonredundant_subchain_pairs(&candidates, &subchains, &self.memento.included_cluster_pairs)?;

        let accepted: Vec<Candidate> = candidates
            .into_iter()
            .enumerate()
            .filter(|(i, _)| singles.candidates.contains(i) || pairs.candidates.contains(i))
            .map(|(_, candidate)| candidate)
            .collect();

        let previous = self.memento.last.replace(assembly.key());
        self.memento.included_clusters.extend(singles.new_keys.iter().copied());
        self.memento.included_cluster_pairs.extend(pairs.new_keys.iter().copied());

        if let Err(err) = visitor.accept(&accepted, &mut self.memento) {
            self.undo(previous, &singles.new_keys, &pairs.new_keys);
            return Err(err);
        }
        if let Some(path) = &self.checkpoint {
            self.memento.save(path)?;
        }

        self.cursor += 1;
        self.processed += 1;
        tracing::trace!(
            structure = %assembly.structure.external_id,
            assembly = %assembly.external_id(),
            accepted = accepted.len(),
            "Processed assembly"
        );
        if self.progress_interval > 0 && self.processed % self.progress_interval == 0 {
            tracing::info!(
                processed = self.processed,
                remaining = self.remaining(),
                clusters = self.memento.included_clusters.len(),
                cluster_pairs = self.memento.included_cluster_pairs.len(),
                "Pick progress"
            );
        }

        Ok(Step::Processed {
            assembly_id: assembly.id(),
            accepted: accepted.len(),
        })
    }

    fn undo(&mut self, previous: Option<RankKey>, clusters: &[ClusterId], pairs: &[ClusterPair]) {
        self.memento.last = previous;
        for cluster in clusters {
            self.memento.included_clusters.remove(cluster);
        }
        for pair in pairs {
            self.memento.included_cluster_pairs.remove(pair);
        }
    }

    /// Step until done and hand back the final memento.
    pub fn run<V: Visitor + ?Sized>(mut self, visitor: &mut V) -> Result<Memento, PickError> {
        while let Step::Processed { .. } = self.step(visitor)? {}
        tracing::info!(
            processed = self.processed,
            clusters = self.memento.included_clusters.len(),
            cluster_pairs = self.memento.included_cluster_pairs.len(),
            "Pick finished"
        );
        Ok(self.memento)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molcurate_store::{ChainId, EntityId};

    fn view(id: u32, chain: u32, cluster: u64) -> SubchainView {
        SubchainView {
            id: SubchainId::new(id),
            external_id: format!("S{id}"),
            chain_id: ChainId::new(chain),
            chain_external_id: format!("C{chain}"),
            entity_id: EntityId::new(id),
            cluster_id: ClusterId::new(cluster),
        }
    }

    fn index(views: &[SubchainView]) -> BTreeMap<SubchainId, &SubchainView> {
        views.iter().map(|v| (v.id, v)).collect()
    }

    fn s(id: u32) -> SubchainId {
        SubchainId::new(id)
    }

    #[test]
    fn test_empty_candidate_is_harmless() {
        let views = [view(1, 1, 1)];
        let candidates = [Candidate::default(), Candidate::single(s(1))];

        let accepted = accept_nonredundant_subchains(&candidates, &index(&views), &BTreeSet::new()).unwrap();
        assert_eq!(accepted.candidates, BTreeSet::from([1]));
    }

    #[test]
    fn test_included_cluster_is_skipped() {
        let views = [view(1, 1, 1), view(2, 2, 2)];
        let candidates = [Candidate::single(s(1)), Candidate::single(s(2))];
        let included = BTreeSet::from([ClusterId::new(1)]);

        let accepted = accept_nonredundant_subchains(&candidates, &index(&views), &included).unwrap();
        assert_eq!(accepted.candidates, BTreeSet::from([1]));
        assert_eq!(accepted.new_keys, vec![ClusterId::new(2)]);
    }

    #[test]
    fn test_lower_score_beats_chain_order() {
        let views = [view(1, 1, 7), view(2, 2, 7)];
        let candidates = [Candidate::single(s(1)).with_score(5), Candidate::single(s(2)).with_score(-1)];

        let accepted = accept_nonredundant_subchains(&candidates, &index(&views), &BTreeSet::new()).unwrap();
        assert_eq!(accepted.candidates, BTreeSet::from([1]));
    }

    #[test]
    fn test_bundled_candidates_are_accepted_together() {
        let views = [view(1, 1, 1), view(2, 2, 1)];
        let candidates = [
            Candidate {
                subchains: vec![s(1), s(2)],
                ..Candidate::default()
            },
            Candidate::single(s(1)),
            Candidate::single(s(2)),
        ];

        // Both features are proposed twice; subchain 1 wins on chain order
        // and both candidates carrying it come along.
        let accepted = accept_nonredundant_subchains(&candidates, &index(&views), &BTreeSet::new()).unwrap();
        assert_eq!(accepted.candidates, BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_same_chain_pair_preferred() {
        let views = [view(1, 1, 1), view(2, 2, 2), view(3, 2, 1), view(4, 1, 2)];
        let candidates = [
            Candidate::pair(s(1), s(2)),
            Candidate::pair(s(3), s(2)),
            Candidate::pair(s(1), s(4)),
        ];

        let accepted =
            accept_nonredundant_subchain_pairs(&candidates, &index(&views), &BTreeSet::new()).unwrap();
        // (3, 2) and (1, 4) each sit on one chain; (1, 4) has the lower key.
        assert_eq!(accepted.candidates, BTreeSet::from([2]));
    }

    #[test]
    fn test_same_cluster_pair_has_its_own_key() {
        let views = [view(1, 1, 5), view(2, 2, 5)];
        let included = BTreeSet::from([ClusterPair::new(ClusterId::new(5), ClusterId::new(6))]);

        let accepted =
            accept_nonredundant_subchain_pairs(&[Candidate::pair(s(1), s(2))], &index(&views), &included).unwrap();
        assert_eq!(
            accepted.new_keys,
            vec![ClusterPair::new(ClusterId::new(5), ClusterId::new(5))]
        );
    }

    #[test]
    fn test_unknown_subchain_is_invariant_violation() {
        let views = [view(1, 1, 1)];
        let result = accept_nonredundant_subchains(&[Candidate::single(s(9))], &index(&views), &BTreeSet::new());
        assert!(matches!(result, Err(PickError::Invariant(_))));
    }

    #[test]
    fn test_degenerate_pair_is_invariant_violation() {
        let views = [view(1, 1, 1)];
        let result =
            accept_nonredundant_subchain_pairs(&[Candidate::pair(s(1), s(1))], &index(&views), &BTreeSet::new());
        assert!(matches!(result, Err(PickError::Invariant(_))));
    }
}
