//! Structure records, as JSON arrays or JSON lines.

use crate::curation::ignore_nonspecific_entities;
use crate::{json_lines, read_to_string, IngestError, IngestReport, Location};
use molcurate_store::{insert_structure, Database, StructureRecord};
use std::path::Path;
use walkdir::WalkDir;

const EXTENSIONS: [&str; 2] = ["json", "jsonl"];

/// Insert every structure record under `path`.
///
/// `path` is either one file or a directory searched recursively for `.json`
/// and `.jsonl` files, in file name order. Each record gets its own
/// transaction, so a failure leaves earlier records in place. Records whose
/// id is already stored are skipped.
pub fn ingest_structures(db: &mut Database, path: &Path) -> Result<IngestReport, IngestError> {
    let mut report = IngestReport::default();

    if path.is_dir() {
        let walker = WalkDir::new(path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        for entry in walker {
            let entry = entry.map_err(|err| IngestError::Io {
                path: path.to_path_buf(),
                source: err.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_json = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.contains(&ext));
            if is_json {
                report.merge(ingest_file(db, entry.path())?);
            }
        }
    } else {
        report.merge(ingest_file(db, path)?);
    }

    let ignored = ignore_nonspecific_entities(db)?;
    tracing::info!(
        path = %path.display(),
        read = report.read,
        inserted = report.inserted,
        skipped = report.skipped,
        ignored,
        "Ingested structures"
    );
    Ok(report)
}

fn ingest_file(db: &mut Database, path: &Path) -> Result<IngestReport, IngestError> {
    let text = read_to_string(path)?;
    let mut report = IngestReport::default();

    if text.trim_start().starts_with('[') {
        let records: Vec<StructureRecord> = serde_json::from_str(&text)
            .map_err(|err| IngestError::parse(Location::line(path, err.line()), err))?;
        for record in &records {
            insert_one(db, record, Location::file(path), &mut report)?;
        }
    } else {
        for (line, json) in json_lines(&text) {
            let location = Location::line(path, line);
            let record: StructureRecord =
                serde_json::from_str(json).map_err(|err| IngestError::parse(location.clone(), err))?;
            insert_one(db, &record, location, &mut report)?;
        }
    }

    tracing::debug!(path = %path.display(), read = report.read, "Read structure file");
    Ok(report)
}

fn insert_one(
    db: &mut Database,
    record: &StructureRecord,
    location: Location,
    report: &mut IngestReport,
) -> Result<(), IngestError> {
    report.read += 1;

    if db.tables().structure_by_external_id(&record.id).is_some() {
        tracing::warn!(structure = %record.id, %location, "Structure already ingested; skipping");
        report.skipped += 1;
        return Ok(());
    }

    insert_structure(db, record).map_err(|source| IngestError::Record {
        location,
        structure: record.id.clone(),
        source,
    })?;
    report.inserted += 1;
    Ok(())
}
