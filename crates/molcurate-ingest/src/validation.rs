//! Per-structure validation metrics, one JSON object per line.
//!
//! Producers write sentinels for missing values (`-1` clashscores, `0`
//! restraint counts); the store's row constructors turn those into `None`,
//! and a line left with nothing to record is skipped.

use crate::{json_lines, read_to_string, structure_index, IngestError, IngestReport, Location};
use molcurate_store::{ClashscoreRow, Database, EmQualityRow, Mutation, NmrQualityRow, StructureId};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationRecord {
    pub structure: String,
    #[serde(default)]
    pub nmr_dist_restraints: Option<i64>,
    #[serde(default)]
    pub em_resolution_a: Option<f64>,
    #[serde(default)]
    pub q_score: Option<f64>,
    #[serde(default)]
    pub clashscore: Option<f64>,
}

impl ValidationRecord {
    fn mutations(&self, structure_id: StructureId) -> Vec<Mutation> {
        let mut mutations = Vec::new();

        let restraints = self.nmr_dist_restraints.and_then(|n| u32::try_from(n).ok());
        let nmr = NmrQualityRow::new(structure_id, restraints);
        if nmr.num_dist_restraints.is_some() {
            mutations.push(Mutation::InsertNmrQuality(nmr));
        }

        let em = EmQualityRow::new(structure_id, self.em_resolution_a, self.q_score);
        if em.resolution_a.is_some() || em.q_score.is_some() {
            mutations.push(Mutation::InsertEmQuality(em));
        }

        let clashscore = ClashscoreRow::new(structure_id, self.clashscore);
        if clashscore.clashscore.is_some() {
            mutations.push(Mutation::InsertClashscore(clashscore));
        }

        mutations
    }
}

/// Load the validation metrics in `path` in a single transaction.
///
/// Lines naming a structure the store does not hold are logged and skipped.
pub fn ingest_validation(db: &mut Database, path: &Path) -> Result<IngestReport, IngestError> {
    let text = read_to_string(path)?;

    let report = db.transaction(|tables, _, tx| {
        let structures = structure_index(tables)?;
        let mut report = IngestReport::default();

        for (line, json) in json_lines(&text) {
            let location = Location::line(path, line);
            let record: ValidationRecord =
                serde_json::from_str(json).map_err(|err| IngestError::parse(location.clone(), err))?;
            report.read += 1;

            let Some(&structure_id) = structures.get(&record.structure.to_lowercase()) else {
                tracing::warn!(structure = %record.structure, %location, "Validation for unknown structure");
                report.skipped += 1;
                continue;
            };

            let mutations = record.mutations(structure_id);
            if mutations.is_empty() {
                report.skipped += 1;
            } else {
                tx.extend(mutations);
                report.inserted += 1;
            }
        }
        Ok::<_, IngestError>(report)
    })?;

    tracing::info!(
        path = %path.display(),
        read = report.read,
        inserted = report.inserted,
        skipped = report.skipped,
        "Ingested validation metrics"
    );
    Ok(report)
}
