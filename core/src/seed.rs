//! Loading the reference catalogs from a JSON seed file.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use common::attr::{FieldContainer, FieldValue};
use common::entity::EntityKind;
use common::record::Record;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::schema::label_field;
use crate::storage::{StorageBackend, StorageError};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedEntry {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangeEntry {
    pub range: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionEntry {
    pub question: String,
}

/// Reference-catalog contents, e.g.
/// `{"factories": [{"name": "Plant A"}], "ageRanges": [{"range": "18-25"}]}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogSeed {
    pub factories: Vec<NamedEntry>,
    pub threat_types: Vec<NamedEntry>,
    pub age_ranges: Vec<RangeEntry>,
    pub work_experience_ranges: Vec<RangeEntry>,
    pub check_questions: Vec<QuestionEntry>,
}

impl CatalogSeed {
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn labels(&self) -> [(EntityKind, Vec<&str>); 5] {
        [
            (
                EntityKind::Factory,
                self.factories.iter().map(|e| e.name.as_str()).collect(),
            ),
            (
                EntityKind::ThreatType,
                self.threat_types.iter().map(|e| e.name.as_str()).collect(),
            ),
            (
                EntityKind::AgeRange,
                self.age_ranges.iter().map(|e| e.range.as_str()).collect(),
            ),
            (
                EntityKind::WorkExperienceRange,
                self.work_experience_ranges
                    .iter()
                    .map(|e| e.range.as_str())
                    .collect(),
            ),
            (
                EntityKind::CheckQuestion,
                self.check_questions
                    .iter()
                    .map(|e| e.question.as_str())
                    .collect(),
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub added: usize,
    pub skipped: usize,
}

/// Inserts every catalog entry whose label is not stored yet, assigning ids
/// sequentially after the current maximum.
pub fn seed_reference_catalog<B>(storage: &B, seed: &CatalogSeed) -> Result<SeedReport, SeedError>
where
    B: StorageBackend + ?Sized,
{
    let mut report = SeedReport::default();
    for (entity, labels) in seed.labels() {
        let Some(field) = label_field(entity) else {
            continue;
        };

        let stored = storage.scan_records(entity)?;
        let mut next_id = stored.iter().map(Record::id).max().unwrap_or(0) + 1;
        let mut existing: HashSet<String> = stored
            .iter()
            .filter_map(|record| record.field(field).and_then(FieldValue::as_str))
            .map(str::to_string)
            .collect();

        for label in labels {
            if !existing.insert(label.to_string()) {
                debug!(%entity, label, "catalog entry already present");
                report.skipped += 1;
                continue;
            }
            storage.store_record(&Record::empty(entity, next_id).with(field, label))?;
            next_id += 1;
            report.added += 1;
        }
    }

    info!(
        added = report.added,
        skipped = report.skipped,
        "reference catalogs seeded"
    );
    Ok(report)
}
