//! Upstream exclusions: which subchains and assemblies the reducer sees.

use crate::config::SelectionConfig;
use crate::universe::{ClusterId, RankKey};
use crate::PickError;
use molcurate_store::{AssemblyId, EntityId, StructureId, SubchainId, Tables};
use std::collections::{BTreeMap, BTreeSet};

/// Map every subchain that is not ignored to its cluster.
///
/// Raw cluster ids of the selected namespaces are renumbered densely from 1,
/// in `(namespace, raw id)` order. Each entity without a cluster then gets a
/// fresh singleton id past the last real one, in entity id order. Ignored
/// entities take part in that numbering but their subchains are left out.
pub fn select_relevant_subchains(
    tables: &Tables,
    config: &SelectionConfig,
) -> Result<BTreeMap<SubchainId, ClusterId>, PickError> {
    let selected = |namespace: &str| {
        config.cluster_namespaces.is_empty() || config.cluster_namespaces.iter().any(|n| n == namespace)
    };
    let rows: Vec<_> = tables.entity_clusters().filter(|row| selected(&row.namespace)).collect();

    let raw: BTreeSet<(&str, u64)> = rows.iter().map(|r| (r.namespace.as_str(), r.cluster_id)).collect();
    let dense: BTreeMap<(&str, u64), ClusterId> = raw
        .into_iter()
        .zip(1..)
        .map(|(key, id)| (key, ClusterId::new(id)))
        .collect();

    let mut entity_cluster: BTreeMap<EntityId, (&str, ClusterId)> = BTreeMap::new();
    for row in &rows {
        let namespace = row.namespace.as_str();
        let cluster = dense[&(namespace, row.cluster_id)];
        if let Some((other, _)) = entity_cluster.insert(row.entity_id, (namespace, cluster)) {
            if other != namespace {
                return Err(PickError::usage(
                    format!("entity {}", row.entity_id),
                    format!("clustered in both '{other}' and '{namespace}'"),
                ));
            }
        }
    }

    let mut next = dense.len() as u64 + 1;
    let mut clusters: BTreeMap<EntityId, ClusterId> =
        entity_cluster.into_iter().map(|(entity, (_, cluster))| (entity, cluster)).collect();
    for entity in tables.entities() {
        clusters.entry(entity.id).or_insert_with(|| {
            let fresh = ClusterId::new(next);
            next += 1;
            fresh
        });
    }

    let ignored = tables.ignored_entities();
    let mut relevant = BTreeMap::new();
    for subchain in tables.subchains() {
        if ignored.contains(&subchain.entity_id) {
            continue;
        }
        let cluster = clusters.get(&subchain.entity_id).ok_or_else(|| {
            PickError::Invariant(format!(
                "subchain {} has no cluster (entity {})",
                subchain.id, subchain.entity_id
            ))
        })?;
        relevant.insert(subchain.id, *cluster);
    }

    tracing::debug!(
        clusters = dense.len(),
        singletons = next - 1 - dense.len() as u64,
        subchains = relevant.len(),
        "Selected relevant subchains"
    );
    Ok(relevant)
}

/// The assemblies worth visiting, in visiting order.
///
/// An assembly is kept if it is in its structure's cover and carries an
/// assembly rank, its structure is not blacklisted, it shares no cluster
/// with any assembly of a blacklisted structure, and its structure's best
/// resolution is below the limit. Structures without any resolution pass
/// the last test.
pub fn select_relevant_assemblies(
    tables: &Tables,
    relevant: &BTreeMap<SubchainId, ClusterId>,
    config: &SelectionConfig,
) -> Result<Vec<RankKey>, PickError> {
    let mut assembly_clusters: BTreeMap<AssemblyId, BTreeSet<ClusterId>> = BTreeMap::new();
    for (assembly_id, subchain_id) in tables.assembly_subchains() {
        if let Some(&cluster) = relevant.get(&subchain_id) {
            assembly_clusters.entry(assembly_id).or_default().insert(cluster);
        }
    }

    let blacklist = tables.blacklist();
    let banned: BTreeSet<ClusterId> = tables
        .assemblies()
        .filter(|a| blacklist.contains(&a.structure_id))
        .filter_map(|a| assembly_clusters.get(&a.id))
        .flatten()
        .copied()
        .collect();

    let resolution = best_resolutions(tables);

    let mut keys = Vec::new();
    for &assembly_id in tables.assembly_subchain_cover() {
        let assembly = tables
            .assembly(assembly_id)
            .ok_or_else(|| PickError::Invariant(format!("cover names unknown assembly {assembly_id}")))?;
        let structure = tables.structure(assembly.structure_id).ok_or_else(|| {
            PickError::Invariant(format!(
                "assembly {assembly_id} belongs to unknown structure {}",
                assembly.structure_id
            ))
        })?;

        let Some(assembly_rank) = tables.assembly_rank(assembly_id) else {
            continue;
        };
        if blacklist.contains(&structure.id) {
            continue;
        }
        if assembly_clusters
            .get(&assembly_id)
            .is_some_and(|clusters| !clusters.is_disjoint(&banned))
        {
            continue;
        }
        if resolution
            .get(&structure.id)
            .is_some_and(|&r| r >= config.max_resolution_a)
        {
            continue;
        }

        keys.push(RankKey {
            structure_rank: structure.rank,
            structure_id: structure.id,
            assembly_rank,
            assembly_id,
        });
    }

    keys.sort_unstable();
    tracing::debug!(
        cover = tables.assembly_subchain_cover().len(),
        relevant = keys.len(),
        banned_clusters = banned.len(),
        "Selected relevant assemblies"
    );
    Ok(keys)
}

/// Minimum crystallographic resolution, minimum EM resolution, then the
/// smaller of the two.
fn best_resolutions(tables: &Tables) -> BTreeMap<StructureId, f64> {
    let mut best: BTreeMap<StructureId, f64> = BTreeMap::new();
    let xtal = tables.quality_xtal().iter().map(|q| (q.structure_id, q.resolution_a));
    let em = tables.quality_em().iter().map(|q| (q.structure_id, q.resolution_a));
    for (structure_id, resolution) in xtal.chain(em) {
        if let Some(r) = resolution {
            best.entry(structure_id)
                .and_modify(|b| *b = b.min(r))
                .or_insert(r);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use molcurate_store::{insert_structure, Database, EntityClusterRow, Mutation, StructureRecord};

    fn cluster(namespace: &str, entity: u32, cluster_id: u64) -> Mutation {
        Mutation::InsertEntityCluster(EntityClusterRow {
            namespace: namespace.into(),
            entity_id: EntityId::new(entity),
            cluster_id,
        })
    }

    fn mixed_structure() -> StructureRecord {
        StructureRecord::new("1xyz")
            .assembly("1", None, 3, &["A", "B", "C", "D", "E", "F"])
            .subchain("A", "A", "1")
            .subchain("B", "B", "2")
            .subchain("C", "C", "3")
            .subchain("D", "A", "4")
            .subchain("E", "B", "5")
            .subchain("F", "C", "5")
            .polymer_entity("1", None)
            .polymer_entity("2", None)
            .polymer_entity("3", None)
            .monomer_entity("4", "ABC", None)
            .monomer_entity("5", "DEF", None)
    }

    fn relevant(db: &Database, config: &SelectionConfig) -> Vec<(u32, u64)> {
        select_relevant_subchains(db.tables(), config)
            .unwrap()
            .into_iter()
            .map(|(s, c)| (s.raw(), c.raw()))
            .collect()
    }

    #[test]
    fn test_unclustered_entities_get_fresh_clusters() {
        let mut db = Database::in_memory();
        insert_structure(&mut db, &mixed_structure()).unwrap();

        let mut tx = db.begin();
        tx.push(cluster("test", 1, 1));
        tx.push(cluster("test", 2, 1));
        tx.push(Mutation::IgnoreEntity(EntityId::new(4)));
        db.commit(tx).unwrap();

        assert_eq!(
            relevant(&db, &SelectionConfig::default()),
            vec![(1, 1), (2, 1), (3, 2), (5, 4), (6, 4)]
        );
    }

    #[test]
    fn test_raw_cluster_ids_are_renumbered() {
        let mut db = Database::in_memory();
        insert_structure(&mut db, &mixed_structure()).unwrap();

        let mut tx = db.begin();
        tx.push(cluster("seq", 1, 900));
        tx.push(cluster("seq", 3, 17));
        tx.push(cluster("branched", 5, 900));
        db.commit(tx).unwrap();

        // (branched, 900) -> 1, (seq, 17) -> 2, (seq, 900) -> 3, then 2 and 4
        // are singletons.
        assert_eq!(
            relevant(&db, &SelectionConfig::default()),
            vec![(1, 3), (2, 4), (3, 2), (4, 5), (5, 1), (6, 1)]
        );

        let only_seq = SelectionConfig {
            cluster_namespaces: vec!["seq".into()],
            ..Default::default()
        };
        assert_eq!(
            relevant(&db, &only_seq),
            vec![(1, 2), (2, 3), (3, 1), (4, 4), (5, 5), (6, 5)]
        );
    }

    #[test]
    fn test_entity_in_two_namespaces_is_rejected() {
        let mut db = Database::in_memory();
        insert_structure(&mut db, &mixed_structure()).unwrap();

        let mut tx = db.begin();
        tx.push(cluster("a", 1, 1));
        tx.push(cluster("b", 1, 1));
        db.commit(tx).unwrap();

        assert!(matches!(
            select_relevant_subchains(db.tables(), &SelectionConfig::default()),
            Err(PickError::Usage { .. })
        ));
    }

    #[test]
    fn test_best_resolution_takes_minimum_over_methods() {
        let mut db = Database::in_memory();
        let record = StructureRecord::new("1abc")
            .assembly("1", None, 1, &["A"])
            .subchain("A", "A", "1")
            .polymer_entity("1", None)
            .xtal(Some(12.0), None)
            .em(Some(3.5), None)
            .xtal(None, Some(0.2));
        insert_structure(&mut db, &record).unwrap();

        let best = best_resolutions(db.tables());
        assert_eq!(best.get(&StructureId::new(1)), Some(&3.5));
    }
}
