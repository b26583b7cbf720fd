use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use common::entity::{EntityKind, JoinTable};
use common::join::JoinRecord;
use common::record::{Record, RecordId};

use super::{StorageBackend, StorageError, StorageOp, StorageResult};

/// File-backed storage backend that persists JSON-encoded records and join
/// rows, one file each:
///
/// ```text
/// <root>/records/<entity>/<id>.json
/// <root>/joins/<table>/<subject>_<attribute>.json
/// ```
///
/// Scans and join lookups return rows ordered by id.
pub struct SimpleStorage {
    records_dir: PathBuf,
    joins_dir: PathBuf,
}

impl SimpleStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        let records_dir = root.join("records");
        let joins_dir = root.join("joins");

        fs::create_dir_all(&records_dir).map_err(|source| StorageError::Io {
            op: StorageOp::Prepare("create records dir"),
            source,
        })?;
        fs::create_dir_all(&joins_dir).map_err(|source| StorageError::Io {
            op: StorageOp::Prepare("create joins dir"),
            source,
        })?;

        Ok(Self {
            records_dir,
            joins_dir,
        })
    }

    fn entity_dir(&self, entity: EntityKind) -> PathBuf {
        self.records_dir.join(entity.name())
    }

    fn record_path(&self, entity: EntityKind, id: RecordId) -> PathBuf {
        self.entity_dir(entity).join(format!("{id}.json"))
    }

    fn table_dir(&self, table: JoinTable) -> PathBuf {
        self.joins_dir.join(table.name())
    }

    fn join_path(&self, table: JoinTable, subject: RecordId, attribute: RecordId) -> PathBuf {
        self.table_dir(table)
            .join(format!("{subject}_{attribute}.json"))
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        path: &Path,
        op: &StorageOp,
    ) -> StorageResult<Option<T>> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<T>(&bytes)
                .map(Some)
                .map_err(|source| StorageError::Serialization {
                    op: op.clone(),
                    source,
                }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io {
                op: op.clone(),
                source: err,
            }),
        }
    }

    fn write_json<T: serde::Serialize>(path: &Path, value: &T, op: StorageOp) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                op: op.clone(),
                source,
            })?;
        }
        let data = serde_json::to_vec(value).map_err(|source| StorageError::Serialization {
            op: op.clone(),
            source,
        })?;
        fs::write(path, data).map_err(|source| StorageError::Io { op, source })
    }

    /// File stems of every `.json` file in `dir`; a missing dir is empty.
    fn json_stems(dir: &Path, op: &StorageOp) -> StorageResult<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StorageError::Io {
                    op: op.clone(),
                    source: err,
                })
            }
        };

        let mut stems = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                op: op.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
        Ok(stems)
    }

    /// Attribute ids of the `table` rows stored for `subject`, unordered.
    fn subject_attributes(
        &self,
        table: JoinTable,
        subject: RecordId,
        op: &StorageOp,
    ) -> StorageResult<Vec<RecordId>> {
        let mut attributes = Vec::new();
        for stem in Self::json_stems(&self.table_dir(table), op)? {
            let parsed = stem
                .split_once('_')
                .and_then(|(s, a)| Some((s.parse::<RecordId>().ok()?, a.parse::<RecordId>().ok()?)));
            let Some((row_subject, attribute)) = parsed else {
                return Err(StorageError::Corrupt {
                    op: op.clone(),
                    reason: format!("join file name '{stem}' is not a subject_attribute key"),
                });
            };
            if row_subject == subject {
                attributes.push(attribute);
            }
        }
        Ok(attributes)
    }
}

impl StorageBackend for SimpleStorage {
    fn load_record(&self, entity: EntityKind, id: RecordId) -> StorageResult<Option<Record>> {
        let op = StorageOp::LoadRecord(entity, id);
        Self::read_json(&self.record_path(entity, id), &op)
    }

    fn scan_records(&self, entity: EntityKind) -> StorageResult<Vec<Record>> {
        let op = StorageOp::ScanRecords(entity);
        let mut ids = Vec::new();
        for stem in Self::json_stems(&self.entity_dir(entity), &op)? {
            let id = stem.parse::<RecordId>().map_err(|_| StorageError::Corrupt {
                op: op.clone(),
                reason: format!("record file name '{stem}' is not an id"),
            })?;
            ids.push(id);
        }
        ids.sort_unstable();

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            // A file removed between listing and reading is simply skipped.
            if let Some(record) = Self::read_json(&self.record_path(entity, id), &op)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn store_record(&self, record: &Record) -> StorageResult<()> {
        let op = StorageOp::StoreRecord(record.entity(), record.id());
        let path = self.record_path(record.entity(), record.id());
        Self::write_json(&path, record, op)
    }

    fn delete_record(&self, entity: EntityKind, id: RecordId) -> StorageResult<()> {
        let op = StorageOp::DeleteRecord(entity, id);
        match fs::remove_file(self.record_path(entity, id)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io { op, source: err }),
        }
    }

    fn join_rows_by_subject(
        &self,
        table: JoinTable,
        subject: RecordId,
    ) -> StorageResult<Vec<JoinRecord>> {
        let op = StorageOp::LoadJoinRows(table, subject);
        let mut attributes = self.subject_attributes(table, subject, &op)?;
        attributes.sort_unstable();

        let mut rows = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            if let Some(row) = Self::read_json(&self.join_path(table, subject, attribute), &op)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn store_join_row(&self, table: JoinTable, row: &JoinRecord) -> StorageResult<()> {
        let op = StorageOp::StoreJoinRow(table, row.subject(), row.attribute());
        let path = self.join_path(table, row.subject(), row.attribute());
        Self::write_json(&path, row, op)
    }

    fn delete_join_rows(&self, table: JoinTable, subject: RecordId) -> StorageResult<()> {
        let op = StorageOp::DeleteJoinRows(table, subject);
        for attribute in self.subject_attributes(table, subject, &op)? {
            match fs::remove_file(self.join_path(table, subject, attribute)) {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::Io { op, source: err }),
            }
        }
        Ok(())
    }
}
