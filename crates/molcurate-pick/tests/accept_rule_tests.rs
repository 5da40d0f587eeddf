//! Acceptance rule over hand-built candidate lists.
//!
//! Features are written as `(chain, n)`: the n-th subchain on a chain. The
//! chain letter doubles as the chain's external id.

use molcurate_pick::{
    accept_nonredundant_subchain_pairs, accept_nonredundant_subchains, Candidate, ClusterId, ClusterPair,
    SubchainView,
};
use molcurate_store::{ChainId, EntityId, SubchainId};
use std::collections::{BTreeMap, BTreeSet};

type Feature = (char, u32);

struct Fixture {
    views: Vec<SubchainView>,
    ids: BTreeMap<Feature, SubchainId>,
}

impl Fixture {
    /// One subchain per feature, ids in `(chain, n)` order.
    fn new(features: &[Feature], clusters: &[(char, u64)]) -> Self {
        let cluster_of: BTreeMap<char, u64> = clusters.iter().copied().collect();
        let sorted: BTreeSet<Feature> = features.iter().copied().collect();

        let mut views = Vec::new();
        let mut ids = BTreeMap::new();
        for (i, &(chain, n)) in sorted.iter().enumerate() {
            let id = SubchainId::new(i as u32 + 1);
            views.push(SubchainView {
                id,
                external_id: format!("{chain}{n}"),
                chain_id: ChainId::new(chain as u32),
                chain_external_id: chain.to_string(),
                entity_id: EntityId::new(i as u32 + 1),
                cluster_id: ClusterId::new(cluster_of[&chain]),
            });
            ids.insert((chain, n), id);
        }
        Self { views, ids }
    }

    fn index(&self) -> BTreeMap<SubchainId, &SubchainView> {
        self.views.iter().map(|v| (v.id, v)).collect()
    }

    fn single(&self, features: &[Feature]) -> Candidate {
        Candidate {
            subchains: features.iter().map(|f| self.ids[f]).collect(),
            ..Candidate::default()
        }
    }

    fn pairs(&self, pairs: &[(Feature, Feature)]) -> Candidate {
        Candidate {
            subchain_pairs: pairs.iter().map(|(a, b)| (self.ids[a], self.ids[b])).collect(),
            ..Candidate::default()
        }
    }
}

fn features_of(candidates: &[&[Feature]]) -> Vec<Feature> {
    candidates.iter().flat_map(|c| c.iter().copied()).collect()
}

#[test]
fn test_accept_nonredundant_subchains() {
    // - An empty candidate is ignored.
    // - A is in a cluster that was accepted earlier.
    // - B and C share a cluster; C is proposed more often and wins. The
    //   candidate with both comes along, since one new feature is enough.
    // - (D,0) and (D,1) share a cluster; (D,1) wins the same way.
    // - E and F share a cluster; F scores better despite being rarer.
    // - (G,1) beats (G,0) the same way.
    // - H and I tie on score and count; H's chain sorts first.
    // - (J,0) and (J,1) tie completely; the lower subchain id wins.
    let layout: &[&[Feature]] = &[
        &[],
        &[('A', 0)],
        &[('A', 1)],
        &[('B', 0)],
        &[('B', 0), ('C', 0)],
        &[('C', 0)],
        &[('C', 0)],
        &[('D', 0)],
        &[('D', 0), ('D', 1)],
        &[('D', 1)],
        &[('D', 1)],
        &[('E', 0)],
        &[('E', 0)],
        &[('F', 0)],
        &[('G', 0)],
        &[('G', 0)],
        &[('G', 1)],
        &[('H', 0)],
        &[('I', 0)],
        &[('J', 0)],
        &[('J', 1)],
    ];
    let fixture = Fixture::new(
        &features_of(layout),
        &[
            ('A', 1),
            ('B', 2),
            ('C', 2),
            ('D', 3),
            ('E', 4),
            ('F', 4),
            ('G', 5),
            ('H', 6),
            ('I', 6),
            ('J', 7),
        ],
    );

    let mut candidates: Vec<Candidate> = layout.iter().map(|f| fixture.single(f)).collect();
    candidates[13].score = -3;
    candidates[16].score = -3;

    let included = BTreeSet::from([ClusterId::new(1)]);
    let accepted = accept_nonredundant_subchains(&candidates, &fixture.index(), &included).unwrap();

    assert_eq!(
        accepted.candidates,
        BTreeSet::from([4, 5, 6, 8, 9, 10, 13, 16, 17, 19])
    );
    let new: BTreeSet<u64> = accepted.new_keys.iter().map(|c| c.raw()).collect();
    assert_eq!(new, BTreeSet::from([2, 3, 4, 5, 6, 7]));
}

#[test]
fn test_accept_nonredundant_subchain_pairs() {
    // - An empty candidate is ignored.
    // - (A,B) and [(C,0),(C,1)] map to cluster pairs accepted earlier.
    // - (D,E) and (D,F) share a cluster pair; (D,F) is proposed more often.
    //   The candidate carrying both pairs comes along.
    // - [(G,0),(G,2)] beats [(G,0),(G,1)] the same way.
    // - (H,J) scores better than (H,I) despite being rarer.
    // - [(K,0),(K,2)] beats [(K,0),(K,1)] the same way.
    // - (L,M) and (L,N) tie; the lower subchain ids win.
    // - [(O,0),(O,1)] and [(O,0),(O,2)] tie; the lower subchain ids win.
    type Pair = (Feature, Feature);
    let layout: &[&[Pair]] = &[
        &[],
        &[(('A', 0), ('B', 0))],
        &[(('B', 0), ('A', 0))],
        &[(('C', 0), ('C', 1))],
        &[(('C', 1), ('C', 0))],
        &[(('D', 0), ('E', 0))],
        &[(('E', 0), ('D', 0)), (('D', 0), ('F', 0))],
        &[(('D', 0), ('F', 0))],
        &[(('F', 0), ('D', 0))],
        &[(('G', 0), ('G', 1))],
        &[(('G', 1), ('G', 0)), (('G', 0), ('G', 2))],
        &[(('G', 0), ('G', 2))],
        &[(('G', 2), ('G', 0))],
        &[(('H', 0), ('I', 0))],
        &[(('H', 0), ('I', 0))],
        &[(('H', 0), ('J', 0))],
        &[(('K', 0), ('K', 1))],
        &[(('K', 0), ('K', 1))],
        &[(('K', 0), ('K', 2))],
        &[(('L', 0), ('M', 0))],
        &[(('L', 0), ('N', 0))],
        &[(('O', 0), ('O', 1))],
        &[(('O', 0), ('O', 2))],
    ];
    let features: Vec<Feature> = layout
        .iter()
        .flat_map(|c| c.iter().flat_map(|&(a, b)| [a, b]))
        .collect();
    let fixture = Fixture::new(
        &features,
        &[
            ('A', 2),
            ('B', 1),
            ('C', 3),
            ('D', 5),
            ('E', 4),
            ('F', 4),
            ('G', 6),
            ('H', 8),
            ('I', 7),
            ('J', 7),
            ('K', 9),
            ('L', 11),
            ('M', 10),
            ('N', 10),
            ('O', 12),
        ],
    );

    let mut candidates: Vec<Candidate> = layout.iter().map(|p| fixture.pairs(p)).collect();
    candidates[15].score = -3;
    candidates[18].score = -3;

    let pair = |a, b| ClusterPair::new(ClusterId::new(a), ClusterId::new(b));
    let included = BTreeSet::from([pair(1, 2), pair(3, 3)]);
    let accepted = accept_nonredundant_subchain_pairs(&candidates, &fixture.index(), &included).unwrap();

    assert_eq!(
        accepted.candidates,
        BTreeSet::from([6, 7, 8, 10, 11, 12, 15, 18, 19, 21])
    );
    let new: BTreeSet<ClusterPair> = accepted.new_keys.into_iter().collect();
    assert_eq!(
        new,
        BTreeSet::from([pair(4, 5), pair(6, 6), pair(7, 8), pair(9, 9), pair(10, 11), pair(12, 12)])
    );
}

#[test]
fn test_feature_score_is_minimum_over_candidates() {
    let fixture = Fixture::new(&[('A', 0), ('B', 0)], &[('A', 1), ('B', 1)]);

    // A is proposed once at 0 and once at -5; B once at -4.
    let candidates = vec![
        fixture.single(&[('A', 0)]),
        fixture.single(&[('A', 0)]).with_score(-5),
        fixture.single(&[('B', 0)]).with_score(-4),
    ];
    let accepted = accept_nonredundant_subchains(&candidates, &fixture.index(), &BTreeSet::new()).unwrap();
    assert_eq!(accepted.candidates, BTreeSet::from([0, 1]));
}

#[test]
fn test_repeated_feature_in_one_candidate_counts_once() {
    let fixture = Fixture::new(&[('A', 0), ('B', 0)], &[('A', 1), ('B', 1)]);

    // Listing B twice in one candidate does not make it more frequent than A,
    // so the tie falls to chain order.
    let candidates = vec![
        fixture.single(&[('A', 0)]),
        fixture.single(&[('B', 0), ('B', 0)]),
    ];
    let accepted = accept_nonredundant_subchains(&candidates, &fixture.index(), &BTreeSet::new()).unwrap();
    assert_eq!(accepted.candidates, BTreeSet::from([0]));
}
