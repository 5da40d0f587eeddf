//! Curation lists: blacklisted structures, entity clusters, and the entities
//! left out of the pick.

use crate::{content_lines, read_to_string, structure_index, IngestError, IngestReport, Location};
use molcurate_store::{Database, EntityClusterRow, EntityId, EntityKind, Mutation, StructureId};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

// ============================================================================
// Blacklist
// ============================================================================

/// Blacklist the structures listed in `path`, one id per line.
///
/// Ids are matched without regard to case. Ids the store does not know are
/// logged and counted as skipped.
pub fn ingest_blacklist(db: &mut Database, path: &Path) -> Result<IngestReport, IngestError> {
    let text = read_to_string(path)?;

    let report = db.transaction(|tables, _, tx| {
        let index = structure_index(tables)?;
        let mut staged = BTreeSet::new();
        let mut report = IngestReport::default();

        for (line, id) in content_lines(&text) {
            report.read += 1;
            match index.get(&id.to_lowercase()) {
                Some(&structure_id) => {
                    if tables.blacklist().contains(&structure_id) || !staged.insert(structure_id) {
                        report.skipped += 1;
                    } else {
                        tx.push(Mutation::BlacklistStructure(structure_id));
                        report.inserted += 1;
                    }
                }
                None => {
                    tracing::warn!(structure = id, location = %Location::line(path, line), "Unknown structure in blacklist");
                    report.skipped += 1;
                }
            }
        }
        Ok::<_, IngestError>(report)
    })?;

    tracing::info!(
        path = %path.display(),
        blacklisted = report.inserted,
        skipped = report.skipped,
        "Ingested blacklist"
    );
    Ok(report)
}

// ============================================================================
// Ignored entities
// ============================================================================

/// Record the component ids in `path` as non-specific ligands and ignore every
/// non-polymer entity made of one.
///
/// `inserted` counts newly listed ligands; newly ignored entities are logged.
pub fn ingest_nonspecific_ligands(db: &mut Database, path: &Path) -> Result<IngestReport, IngestError> {
    let text = read_to_string(path)?;

    let report = db.transaction(|tables, _, tx| {
        let mut staged = BTreeSet::new();
        let mut report = IngestReport::default();

        for (_, comp_id) in content_lines(&text) {
            report.read += 1;
            let comp_id = comp_id.to_uppercase();
            if tables.nonspecific_ligands().contains(&comp_id) || !staged.insert(comp_id.clone()) {
                report.skipped += 1;
            } else {
                tx.push(Mutation::InsertNonspecificLigand(comp_id));
                report.inserted += 1;
            }
        }
        Ok::<_, IngestError>(report)
    })?;

    let ignored = ignore_nonspecific_entities(db)?;
    tracing::info!(
        path = %path.display(),
        ligands = report.inserted,
        ignored,
        "Ingested non-specific ligands"
    );
    Ok(report)
}

/// Ignore non-polymer entities whose component is a listed non-specific
/// ligand. Returns how many entities became ignored.
pub fn ignore_nonspecific_entities(db: &mut Database) -> Result<usize, IngestError> {
    db.transaction(|tables, _, tx| {
        let ligands = tables.nonspecific_ligands();
        let entities: Vec<EntityId> = tables
            .monomer_entities()
            .filter(|m| ligands.contains(&m.comp_id.to_uppercase()))
            .map(|m| m.entity_id)
            .filter(|id| !tables.ignored_entities().contains(id))
            .collect();

        let count = entities.len();
        tx.extend(entities.into_iter().map(Mutation::IgnoreEntity));
        Ok(count)
    })
}

/// Ignore non-polymer entities lighter than `min_weight_da`. Entities with no
/// recorded weight are kept.
pub fn ignore_low_weight_entities(db: &mut Database, min_weight_da: f64) -> Result<IngestReport, IngestError> {
    if !min_weight_da.is_finite() || min_weight_da <= 0.0 {
        return Err(IngestError::InvalidArgument(format!(
            "minimum weight must be a positive number of daltons, got {min_weight_da}"
        )));
    }

    let report = db.transaction(|tables, _, tx| {
        let mut report = IngestReport::default();
        for entity in tables.entities().filter(|e| e.kind == EntityKind::NonPolymer) {
            report.read += 1;
            let light = entity.formula_weight_da.is_some_and(|w| w < min_weight_da);
            if light && !tables.ignored_entities().contains(&entity.id) {
                tx.push(Mutation::IgnoreEntity(entity.id));
                report.inserted += 1;
            } else {
                report.skipped += 1;
            }
        }
        Ok::<_, IngestError>(report)
    })?;

    tracing::info!(min_weight_da, ignored = report.inserted, "Ignored low-weight entities");
    Ok(report)
}

// ============================================================================
// Entity clusters
// ============================================================================

/// Assign entities to clusters within `namespace`.
///
/// Each line reads `structure entity cluster`, where `entity` is the entity's
/// id within its structure. The whole file is one transaction: an unknown
/// structure or entity rejects it.
pub fn ingest_entity_clusters(db: &mut Database, path: &Path, namespace: &str) -> Result<IngestReport, IngestError> {
    let namespace = namespace.trim();
    if namespace.is_empty() {
        return Err(IngestError::InvalidArgument("cluster namespace must not be empty".into()));
    }
    let text = read_to_string(path)?;

    let report = db.transaction(|tables, _, tx| {
        let structures = structure_index(tables)?;
        let entities: HashMap<(StructureId, &str), EntityId> = tables
            .entities()
            .map(|e| ((e.structure_id, e.external_id.as_str()), e.id))
            .collect();
        let existing: BTreeSet<(String, EntityId, u64)> = tables
            .entity_clusters()
            .map(|row| (row.namespace, row.entity_id, row.cluster_id))
            .collect();

        let mut staged = BTreeSet::new();
        let mut report = IngestReport::default();

        for (line, fields) in content_lines(&text) {
            let location = Location::line(path, line);
            let fields: Vec<&str> = fields.split_whitespace().collect();
            let &[structure, entity, cluster] = fields.as_slice() else {
                return Err(IngestError::parse(
                    location,
                    format!("expected `structure entity cluster`, found {} fields", fields.len()),
                ));
            };
            let cluster_id: u64 = cluster
                .parse()
                .map_err(|_| IngestError::parse(location.clone(), format!("cluster {cluster:?} is not an integer")))?;

            let structure_id = *structures
                .get(&structure.to_lowercase())
                .ok_or_else(|| IngestError::Unknown {
                    location: location.clone(),
                    what: "structure",
                    name: structure.to_string(),
                })?;
            let entity_id = *entities
                .get(&(structure_id, entity))
                .ok_or_else(|| IngestError::Unknown {
                    location: location.clone(),
                    what: "entity",
                    name: format!("{structure}/{entity}"),
                })?;

            report.read += 1;
            let key = (namespace.to_string(), entity_id, cluster_id);
            if existing.contains(&key) || !staged.insert(key) {
                report.skipped += 1;
                continue;
            }
            tx.push(Mutation::InsertEntityCluster(EntityClusterRow {
                namespace: namespace.to_string(),
                entity_id,
                cluster_id,
            }));
            report.inserted += 1;
        }
        Ok::<_, IngestError>(report)
    })?;

    tracing::info!(
        path = %path.display(),
        namespace,
        clustered = report.inserted,
        "Ingested entity clusters"
    );
    Ok(report)
}
