use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use common::entity::{EntityKind, JoinTable};
use common::join::JoinRecord;
use common::record::{Record, RecordId};

use super::{StorageBackend, StorageError, StorageOp, StorageResult};

/// Simple in-memory storage backend useful in tests and for bootstrapping.
///
/// Join rows keep insertion order; storing a row with an existing
/// (subject, attribute) key replaces it in place.
#[derive(Default)]
pub struct InMemoryBackend {
    records: RwLock<HashMap<EntityKind, BTreeMap<RecordId, Record>>>,
    joins: RwLock<HashMap<JoinTable, Vec<JoinRecord>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_record(&self, record: Record) -> StorageResult<()> {
        self.store_record(&record)
    }

    pub fn insert_join_row(&self, table: JoinTable, row: JoinRecord) -> StorageResult<()> {
        self.store_join_row(table, &row)
    }
}

impl StorageBackend for InMemoryBackend {
    fn load_record(&self, entity: EntityKind, id: RecordId) -> StorageResult<Option<Record>> {
        let op = StorageOp::LoadRecord(entity, id);
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned {
            op,
            lock: "records read",
        })?;
        Ok(records
            .get(&entity)
            .and_then(|table| table.get(&id))
            .cloned())
    }

    fn scan_records(&self, entity: EntityKind) -> StorageResult<Vec<Record>> {
        let op = StorageOp::ScanRecords(entity);
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned {
            op,
            lock: "records read",
        })?;
        Ok(records
            .get(&entity)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    fn store_record(&self, record: &Record) -> StorageResult<()> {
        let op = StorageOp::StoreRecord(record.entity(), record.id());
        let mut records = self.records.write().map_err(|_| StorageError::LockPoisoned {
            op,
            lock: "records write",
        })?;
        records
            .entry(record.entity())
            .or_default()
            .insert(record.id(), record.clone());
        Ok(())
    }

    fn delete_record(&self, entity: EntityKind, id: RecordId) -> StorageResult<()> {
        let op = StorageOp::DeleteRecord(entity, id);
        let mut records = self.records.write().map_err(|_| StorageError::LockPoisoned {
            op,
            lock: "records write",
        })?;
        if let Some(table) = records.get_mut(&entity) {
            table.remove(&id);
        }
        Ok(())
    }

    fn join_rows_by_subject(
        &self,
        table: JoinTable,
        subject: RecordId,
    ) -> StorageResult<Vec<JoinRecord>> {
        let op = StorageOp::LoadJoinRows(table, subject);
        let joins = self.joins.read().map_err(|_| StorageError::LockPoisoned {
            op,
            lock: "joins read",
        })?;
        Ok(joins
            .get(&table)
            .into_iter()
            .flatten()
            .filter(|row| row.subject() == subject)
            .cloned()
            .collect())
    }

    fn store_join_row(&self, table: JoinTable, row: &JoinRecord) -> StorageResult<()> {
        let op = StorageOp::StoreJoinRow(table, row.subject(), row.attribute());
        let mut joins = self.joins.write().map_err(|_| StorageError::LockPoisoned {
            op,
            lock: "joins write",
        })?;
        let rows = joins.entry(table).or_default();
        match rows
            .iter_mut()
            .find(|existing| existing.subject() == row.subject() && existing.attribute() == row.attribute())
        {
            Some(existing) => *existing = row.clone(),
            None => rows.push(row.clone()),
        }
        Ok(())
    }

    fn delete_join_rows(&self, table: JoinTable, subject: RecordId) -> StorageResult<()> {
        let op = StorageOp::DeleteJoinRows(table, subject);
        let mut joins = self.joins.write().map_err(|_| StorageError::LockPoisoned {
            op,
            lock: "joins write",
        })?;
        if let Some(rows) = joins.get_mut(&table) {
            rows.retain(|row| row.subject() != subject);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_backend_round_trip() {
        let backend = InMemoryBackend::new();
        let record = Record::empty(EntityKind::Factory, 1).with("name", "F1");

        backend.store_record(&record).unwrap();
        let loaded = backend.load_record(EntityKind::Factory, 1).unwrap();
        assert_eq!(loaded, Some(record));

        backend.delete_record(EntityKind::Factory, 1).unwrap();
        assert!(backend.load_record(EntityKind::Factory, 1).unwrap().is_none());
    }

    #[test]
    fn records_are_partitioned_by_entity() {
        let backend = InMemoryBackend::new();
        backend
            .insert_record(Record::empty(EntityKind::Factory, 1))
            .unwrap();

        assert!(backend.load_record(EntityKind::Worker, 1).unwrap().is_none());
        assert!(backend.scan_records(EntityKind::Worker).unwrap().is_empty());
    }

    #[test]
    fn join_rows_keep_insertion_order_and_replace_on_same_key() {
        let backend = InMemoryBackend::new();
        let table = JoinTable::IncidentCheckAnswer;
        backend.insert_join_row(table, JoinRecord::new(5, 2, true)).unwrap();
        backend.insert_join_row(table, JoinRecord::new(5, 1, true)).unwrap();
        backend.insert_join_row(table, JoinRecord::new(6, 1, true)).unwrap();
        backend.insert_join_row(table, JoinRecord::new(5, 2, false)).unwrap();

        let rows = backend.join_rows_by_subject(table, 5).unwrap();
        assert_eq!(
            rows,
            vec![JoinRecord::new(5, 2, false), JoinRecord::new(5, 1, true)]
        );
    }

    #[test]
    fn deleting_join_rows_leaves_other_subjects() {
        let backend = InMemoryBackend::new();
        let table = JoinTable::IncidentCheckAnswer;
        backend.insert_join_row(table, JoinRecord::new(5, 1, true)).unwrap();
        backend.insert_join_row(table, JoinRecord::new(6, 1, false)).unwrap();

        backend.delete_join_rows(table, 5).unwrap();

        assert!(backend.join_rows_by_subject(table, 5).unwrap().is_empty());
        assert_eq!(backend.join_rows_by_subject(table, 6).unwrap().len(), 1);
    }
}
