//! End-to-end picks against an in-memory store.

use molcurate_pick::{
    extract_nonredundant, insert_assembly_ranks, insert_assembly_subchain_covers, pick_assemblies, rank_assemblies,
    rank_structures, resume_pick_assemblies, run_pick, select_relevant_assemblies, select_relevant_subchains,
    update_structure_ranks, AssemblyView, Candidate, CurationConfig, Durability, Memento, NonredundantRow, PickError,
    PickStart, PickUniverse, RedundancyReducer, SelectionConfig, SubchainLabel, Visitor,
};
use molcurate_store::{
    insert_structure, AssemblyId, Database, EntityClusterRow, EntityId, Mutation, StructureId, StructureRecord,
};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::PathBuf;

// ============================================================================
// Helpers
// ============================================================================

fn two_chain(id: &str) -> StructureRecord {
    StructureRecord::new(id)
        .assembly("1", None, 2, &["A", "B"])
        .subchain("A", "A", "1")
        .subchain("B", "B", "2")
        .polymer_entity("1", None)
        .polymer_entity("2", None)
}

fn one_chain(id: &str) -> StructureRecord {
    StructureRecord::new(id)
        .assembly("1", None, 1, &["A"])
        .subchain("A", "A", "1")
        .polymer_entity("1", None)
}

fn clusters(db: &mut Database, members: &[(u64, &[u32])]) {
    let mut tx = db.begin();
    for &(cluster_id, entities) in members {
        for &entity in entities {
            tx.push(Mutation::InsertEntityCluster(EntityClusterRow {
                namespace: "test".into(),
                entity_id: EntityId::new(entity),
                cluster_id,
            }));
        }
    }
    db.commit(tx).unwrap();
}

/// Rank structures, solve covers, and rank assemblies.
fn prepare(db: &mut Database, config: &CurationConfig) {
    let ranks = rank_structures(db.tables(), &config.ranking).unwrap();
    update_structure_ranks(db, &ranks).unwrap();
    insert_assembly_subchain_covers(db, &config.cover).unwrap();
    let ranks = rank_assemblies(db.tables()).unwrap();
    insert_assembly_ranks(db, &ranks).unwrap();
}

fn nonredundant(db: &Database) -> (Vec<u32>, Vec<(u32, u32)>) {
    let tables = db.tables();
    let singles = tables.nonredundant_subchains().iter().map(|s| s.raw()).collect();
    let pairs = tables
        .nonredundant_subchain_pairs()
        .iter()
        .map(|(a, b)| (a.raw(), b.raw()))
        .collect();
    (singles, pairs)
}

fn five_structures() -> Database {
    let mut db = Database::in_memory();
    // 1: first assembly, always kept.
    // 2: same cluster as 1's first subchain, adds nothing.
    // 3: one subchain 1 does not have.
    // 4: no new subchains, but a new pair.
    // 5: two copies of an old subchain, which is still a new pair.
    insert_structure(&mut db, &two_chain("1abc")).unwrap();
    insert_structure(&mut db, &one_chain("2abc")).unwrap();
    for id in ["3abc", "4abc", "5abc"] {
        insert_structure(&mut db, &two_chain(id)).unwrap();
    }
    clusters(&mut db, &[(1, &[1, 3, 4, 8, 9]), (2, &[2, 6]), (3, &[5, 7])]);
    db
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_pick_assemblies() {
    let config = CurationConfig::default();
    let mut db = five_structures();
    prepare(&mut db, &config);

    let report = pick_assemblies(&mut db, &config, false).unwrap();
    assert_eq!(report.assemblies, 5);
    assert!(!report.resumed);

    let (singles, pairs) = nonredundant(&db);
    assert_eq!(singles, vec![1, 2, 5]);
    assert_eq!(pairs, vec![(1, 2), (4, 5), (6, 7), (8, 9)]);
    assert!(db.tables().memento().is_some());
}

#[test]
fn test_extract_nonredundant_by_external_ids() {
    let config = CurationConfig::default();
    let mut db = five_structures();
    prepare(&mut db, &config);
    pick_assemblies(&mut db, &config, false).unwrap();

    let label = |chain: &str| SubchainLabel {
        chain: chain.to_string(),
        subchain: chain.to_string(),
    };
    let single = |structure: &str, chain: &str| NonredundantRow::Subchain {
        structure: structure.to_string(),
        assembly: Some("1".to_string()),
        label: label(chain),
    };
    let pair = |structure: &str| NonredundantRow::Pair {
        structure: structure.to_string(),
        assembly: Some("1".to_string()),
        first: label("A"),
        second: label("B"),
    };

    let rows = extract_nonredundant(db.tables()).unwrap();
    assert_eq!(
        rows,
        vec![
            single("1abc", "A"),
            single("1abc", "B"),
            single("3abc", "B"),
            pair("1abc"),
            pair("3abc"),
            pair("4abc"),
            pair("5abc"),
        ]
    );

    let line = serde_json::to_value(&rows[0]).unwrap();
    assert_eq!(
        line,
        serde_json::json!({"kind": "subchain", "structure": "1abc", "assembly": "1", "chain": "A", "subchain": "A"})
    );
}

#[test]
fn test_pick_prefers_same_chain_pairs() {
    // Two chains, each holding one subchain of each entity, listed so that a
    // naive order would mix chains.
    let config = CurationConfig::default();
    let mut db = Database::in_memory();
    let record = StructureRecord::new("1abc")
        .assembly("1", None, 2, &["A", "B", "C", "D"])
        .subchain("A", "A", "1")
        .subchain("B", "B", "1")
        .subchain("C", "B", "2")
        .subchain("D", "A", "2")
        .polymer_entity("1", None)
        .monomer_entity("2", "ABC", None);
    insert_structure(&mut db, &record).unwrap();
    prepare(&mut db, &config);

    pick_assemblies(&mut db, &config, false).unwrap();

    let (singles, pairs) = nonredundant(&db);
    assert_eq!(singles, vec![1, 4]);
    assert_eq!(pairs, vec![(1, 2), (1, 4), (3, 4)]);
}

#[test]
fn test_union_assembly_alone_is_the_cover() {
    let config = CurationConfig::default();
    let mut db = Database::in_memory();
    let record = StructureRecord::new("1abc")
        .assembly("1", None, 2, &["A", "B"])
        .assembly("2", None, 1, &["A"])
        .assembly("3", None, 1, &["B"])
        .assembly("4", Some("representative helical assembly"), 1, &["A"])
        .subchain("A", "A", "1")
        .subchain("B", "B", "1")
        .polymer_entity("1", None);
    insert_structure(&mut db, &record).unwrap();

    let summary = insert_assembly_subchain_covers(&mut db, &config.cover).unwrap();
    assert_eq!(summary.cover_assemblies, 1);
    assert_eq!(
        db.tables().assembly_subchain_cover().iter().copied().collect::<Vec<_>>(),
        vec![AssemblyId::new(1)]
    );
}

#[test]
fn test_asymmetric_unit_is_not_a_cover_candidate() {
    let config = CurationConfig::default();
    let mut db = Database::in_memory();
    let record = StructureRecord::new("1abc")
        .assembly("1", Some("author_defined_assembly"), 1, &["A"])
        .assembly("2", Some("author_defined_assembly"), 1, &["B"])
        .assembly("3", Some("crystal asymmetric unit"), 2, &["A", "B"])
        .subchain("A", "A", "1")
        .subchain("B", "B", "2")
        .polymer_entity("1", None)
        .polymer_entity("2", None);
    insert_structure(&mut db, &record).unwrap();

    insert_assembly_subchain_covers(&mut db, &config.cover).unwrap();
    let cover: Vec<u32> = db.tables().assembly_subchain_cover().iter().map(|a| a.raw()).collect();
    assert_eq!(cover, vec![1, 2]);
}

#[test]
fn test_recomputed_cover_replaces_the_old_one() {
    let mut config = CurationConfig::default();
    let mut db = Database::in_memory();
    let record = StructureRecord::new("1abc")
        .assembly("1", Some("author_defined_assembly"), 1, &["A"])
        .assembly("2", Some("author_defined_assembly"), 1, &["B"])
        .assembly("3", Some("crystal asymmetric unit"), 2, &["A", "B"])
        .subchain("A", "A", "1")
        .subchain("B", "B", "2")
        .polymer_entity("1", None)
        .polymer_entity("2", None);
    insert_structure(&mut db, &record).unwrap();

    config.cover.exclude_nonbiological = false;
    prepare(&mut db, &config);
    let cover: Vec<u32> = db.tables().assembly_subchain_cover().iter().map(|a| a.raw()).collect();
    assert_eq!(cover, vec![3]);
    assert!(db.tables().assembly_rank(AssemblyId::new(3)).is_some());

    config.cover.exclude_nonbiological = true;
    insert_assembly_subchain_covers(&mut db, &config.cover).unwrap();
    let cover: Vec<u32> = db.tables().assembly_subchain_cover().iter().map(|a| a.raw()).collect();
    assert_eq!(cover, vec![1, 2]);
    assert!(db.tables().assembly_ranks().is_empty());

    let ranks = rank_assemblies(db.tables()).unwrap();
    insert_assembly_ranks(&mut db, &ranks).unwrap();
    let report = pick_assemblies(&mut db, &config, false).unwrap();
    assert_eq!(report.assemblies, 2);
}

#[test]
fn test_blacklist_excludes_shared_clusters() {
    let config = CurationConfig::default();
    let mut db = Database::in_memory();

    // 1abc: assembly 1 is the union of 2 and 3, so only it is in the cover.
    let first = StructureRecord::new("1abc")
        .assembly("1", None, 2, &["A", "B"])
        .assembly("2", None, 1, &["A"])
        .assembly("3", None, 1, &["B"])
        .subchain("A", "A", "1")
        .subchain("B", "B", "1")
        .polymer_entity("1", None);
    insert_structure(&mut db, &first).unwrap();
    // 2abc is blacklisted; 3abc shares a cluster with it.
    insert_structure(&mut db, &two_chain("2abc")).unwrap();
    insert_structure(&mut db, &two_chain("3abc")).unwrap();
    prepare(&mut db, &config);

    let mut tx = db.begin();
    tx.push(Mutation::BlacklistStructure(StructureId::new(2)));
    db.commit(tx).unwrap();
    clusters(&mut db, &[(1, &[2, 4])]);

    let selection = SelectionConfig::default();
    let relevant = select_relevant_subchains(db.tables(), &selection).unwrap();
    let assemblies = select_relevant_assemblies(db.tables(), &relevant, &selection).unwrap();

    let kept: Vec<u32> = assemblies.iter().map(|k| k.assembly_id.raw()).collect();
    assert_eq!(kept, vec![1]);
}

#[test]
fn test_low_resolution_structures_are_excluded() {
    let config = CurationConfig::default();
    let mut db = Database::in_memory();
    let records = [
        one_chain("1abc").xtal(Some(9.9), None),
        one_chain("2abc").xtal(Some(10.0), None),
        one_chain("3abc").em(Some(10.0), None),
        one_chain("4abc").xtal(Some(10.1), None).xtal(Some(9.9), None),
        one_chain("5abc").nmr(1200),
        one_chain("6abc").xtal(Some(12.0), None).em(Some(8.0), None),
    ];
    for record in &records {
        insert_structure(&mut db, record).unwrap();
    }
    prepare(&mut db, &config);

    let selection = SelectionConfig::default();
    let relevant = select_relevant_subchains(db.tables(), &selection).unwrap();
    let assemblies = select_relevant_assemblies(db.tables(), &relevant, &selection).unwrap();

    let structures: BTreeSet<u32> = assemblies.iter().map(|k| k.structure_id.raw()).collect();
    assert_eq!(structures, BTreeSet::from([1, 4, 5, 6]));
}

// ============================================================================
// Runs and resumption
// ============================================================================

#[test]
fn test_fresh_pick_over_stored_pick_is_rejected() {
    let config = CurationConfig::default();
    let mut db = five_structures();
    prepare(&mut db, &config);
    pick_assemblies(&mut db, &config, false).unwrap();

    let err = pick_assemblies(&mut db, &config, false).unwrap_err();
    assert!(matches!(err, PickError::Usage { .. }));

    let report = pick_assemblies(&mut db, &config, true).unwrap();
    assert_eq!(report.nonredundant_subchains, 3);
    assert_eq!(report.nonredundant_subchain_pairs, 4);
}

#[test]
fn test_resume_without_memento_is_rejected() {
    let config = CurationConfig::default();
    let mut db = five_structures();
    prepare(&mut db, &config);

    assert!(matches!(
        resume_pick_assemblies(&mut db, &config),
        Err(PickError::Usage { .. })
    ));
}

#[test]
fn test_resume_after_complete_pick_changes_nothing() {
    let config = CurationConfig::default();
    let mut db = five_structures();
    prepare(&mut db, &config);
    pick_assemblies(&mut db, &config, false).unwrap();
    let before = nonredundant(&db);

    let report = resume_pick_assemblies(&mut db, &config).unwrap();
    assert!(report.resumed);
    assert_eq!(report.skipped, 5);
    assert_eq!(report.accepted.assemblies, 0);
    assert_eq!(nonredundant(&db), before);
}

#[test]
fn test_corrupt_stored_memento_is_usage_error() {
    let config = CurationConfig::default();
    let mut db = five_structures();
    prepare(&mut db, &config);

    let mut tx = db.begin();
    tx.push(Mutation::PutMemento(b"garbage".to_vec()));
    db.commit(tx).unwrap();

    let err = resume_pick_assemblies(&mut db, &config).unwrap_err();
    assert!(matches!(err, PickError::Memento(_)));
    assert!(!err.is_internal());
}

#[test]
fn test_memento_from_changed_universe_is_rejected() {
    let config = CurationConfig::default();
    let mut db = five_structures();
    prepare(&mut db, &config);
    pick_assemblies(&mut db, &config, false).unwrap();
    let memento = Memento::from_bytes(db.tables().memento().unwrap()).unwrap();

    let mut tx = db.begin();
    tx.push(Mutation::BlacklistStructure(StructureId::new(5)));
    db.commit(tx).unwrap();

    let err = run_pick(&mut db, &config, PickStart::ResumeFrom(memento), None).unwrap_err();
    assert!(matches!(err, PickError::Memento(_)));
}

/// Stops the pass on its n-th `accept`, after saving the memento itself.
struct Interrupting {
    visited: RefCell<Vec<(String, Vec<String>, String, Vec<String>)>>,
    accepts: usize,
    fail_at: usize,
    memento_path: PathBuf,
}

impl Visitor for Interrupting {
    fn propose(&self, assembly: &AssemblyView<'_>) -> Vec<Candidate> {
        self.visited.borrow_mut().push((
            assembly.structure.external_id.clone(),
            assembly.structure.model_external_ids.clone(),
            assembly.external_id().to_string(),
            assembly.subchains().iter().map(|s| s.external_id.clone()).collect(),
        ));
        Vec::new()
    }

    fn accept(&mut self, _accepted: &[Candidate], memento: &mut Memento) -> Result<(), PickError> {
        memento.save(&self.memento_path)?;
        self.accepts += 1;
        if self.accepts == self.fail_at {
            return Err(PickError::usage("visitor", "interrupted"));
        }
        Ok(())
    }
}

#[test]
fn test_resume_continues_mid_structure() {
    let config = CurationConfig::default();
    let mut db = Database::in_memory();

    let records = [
        StructureRecord::new("1abc")
            .model("1")
            .assembly("1", None, 2, &["A", "B"])
            .subchain("A", "A", "1")
            .subchain("B", "A", "2")
            .polymer_entity("1", None)
            .polymer_entity("2", None),
        StructureRecord::new("2abc")
            .model("1")
            .assembly("1", None, 1, &["A"])
            .assembly("2", None, 1, &["B"])
            .subchain("A", "A", "1")
            .subchain("B", "B", "1")
            .polymer_entity("1", None),
        StructureRecord::new("3abc")
            .model("1")
            .model("2")
            .assembly("1", None, 1, &["A"])
            .subchain("A", "A", "1")
            .polymer_entity("1", None),
    ];
    for record in &records {
        insert_structure(&mut db, record).unwrap();
    }
    prepare(&mut db, &config);
    clusters(&mut db, &[(1, &[1]), (2, &[2]), (3, &[3]), (4, &[4])]);

    let dir = tempfile::tempdir().unwrap();
    let universe = PickUniverse::load(db.tables(), &config.selection).unwrap();
    let mut visitor = Interrupting {
        visited: RefCell::new(Vec::new()),
        accepts: 0,
        fail_at: 2,
        memento_path: dir.path().join("pick.memento"),
    };

    let tag = |s: &str, models: &[&str], a: &str, subchains: &[&str]| {
        (
            s.to_string(),
            models.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
            a.to_string(),
            subchains.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
        )
    };

    let result = RedundancyReducer::new(&universe).run(&mut visitor);
    assert!(result.is_err());
    assert_eq!(
        *visitor.visited.borrow(),
        vec![tag("1abc", &["1"], "1", &["A", "B"]), tag("2abc", &["1"], "1", &["A"])]
    );

    let memento = Memento::load(&visitor.memento_path).unwrap();
    RedundancyReducer::resume(&universe, memento)
        .unwrap()
        .run(&mut visitor)
        .unwrap();
    assert_eq!(
        *visitor.visited.borrow(),
        vec![
            tag("1abc", &["1"], "1", &["A", "B"]),
            tag("2abc", &["1"], "1", &["A"]),
            tag("2abc", &["1"], "2", &["B"]),
            tag("3abc", &["1", "2"], "1", &["A"]),
        ]
    );
}

#[test]
fn test_interrupted_pick_resumes_to_same_result() {
    let config = CurationConfig::default();

    let mut reference = five_structures();
    prepare(&mut reference, &config);
    pick_assemblies(&mut reference, &config, false).unwrap();

    let mut db = five_structures();
    prepare(&mut db, &config);
    let universe = PickUniverse::load(db.tables(), &config.selection).unwrap();
    {
        // Process two assemblies through the store-backed visitor, then drop
        // everything as if the process died.
        let mut reducer = RedundancyReducer::new(&universe);
        let mut visitor = molcurate_pick::PickVisitor::new(&mut db, Durability::PerAssembly);
        reducer.step(&mut visitor).unwrap();
        reducer.step(&mut visitor).unwrap();
    }

    let report = resume_pick_assemblies(&mut db, &config).unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(nonredundant(&db), nonredundant(&reference));
}

#[test]
fn test_whole_run_failure_commits_nothing() {
    let mut config = CurationConfig::default();
    config.pick.durability = Durability::WholeRun;
    let mut db = five_structures();
    prepare(&mut db, &config);

    let universe = PickUniverse::load(db.tables(), &config.selection).unwrap();
    {
        let mut reducer = RedundancyReducer::new(&universe);
        let mut visitor = molcurate_pick::PickVisitor::new(&mut db, Durability::WholeRun);
        reducer.step(&mut visitor).unwrap();
        reducer.step(&mut visitor).unwrap();
        // Dropped without `finish`.
    }
    assert_eq!(nonredundant(&db), (vec![], vec![]));
    assert!(db.tables().memento().is_none());

    pick_assemblies(&mut db, &config, false).unwrap();
    assert_eq!(nonredundant(&db), (vec![1, 2, 5], vec![(1, 2), (4, 5), (6, 7), (8, 9)]));
}

#[test]
fn test_memento_file_needs_per_assembly_durability() {
    let mut config = CurationConfig::default();
    config.pick.durability = Durability::WholeRun;
    let mut db = five_structures();
    prepare(&mut db, &config);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pick.memento");
    let err = run_pick(&mut db, &config, PickStart::Fresh, Some(&path)).unwrap_err();
    assert!(matches!(err, PickError::Usage { .. }));
    assert!(!path.exists());
    assert_eq!(nonredundant(&db), (vec![], vec![]));
}
