use std::fmt;
use std::io;

use common::entity::{EntityKind, JoinTable};
use common::join::JoinRecord;
use common::record::{Record, RecordId};
use thiserror::Error;

pub mod memory;
pub mod simple;

pub use memory::InMemoryBackend;
pub use simple::SimpleStorage;

pub type StorageResult<T> = Result<T, StorageError>;

/// The storage operation that was in flight when an error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    LoadRecord(EntityKind, RecordId),
    ScanRecords(EntityKind),
    StoreRecord(EntityKind, RecordId),
    DeleteRecord(EntityKind, RecordId),
    LoadJoinRows(JoinTable, RecordId),
    StoreJoinRow(JoinTable, RecordId, RecordId),
    DeleteJoinRows(JoinTable, RecordId),
    Prepare(&'static str),
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageOp::LoadRecord(entity, id) => write!(f, "load {entity}#{id}"),
            StorageOp::ScanRecords(entity) => write!(f, "scan {entity}"),
            StorageOp::StoreRecord(entity, id) => write!(f, "store {entity}#{id}"),
            StorageOp::DeleteRecord(entity, id) => write!(f, "delete {entity}#{id}"),
            StorageOp::LoadJoinRows(table, subject) => {
                write!(f, "load {table} rows for subject {subject}")
            }
            StorageOp::StoreJoinRow(table, subject, attribute) => {
                write!(f, "store {table} row ({subject}, {attribute})")
            }
            StorageOp::DeleteJoinRows(table, subject) => {
                write!(f, "delete {table} rows for subject {subject}")
            }
            StorageOp::Prepare(what) => write!(f, "prepare {what}"),
        }
    }
}

/// Errors produced by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error during {op}: {source}")]
    Io {
        op: StorageOp,
        #[source]
        source: io::Error,
    },

    #[error("serialization error during {op}: {source}")]
    Serialization {
        op: StorageOp,
        #[source]
        source: serde_json::Error,
    },

    #[error("lock poisoned during {op}: {lock}")]
    LockPoisoned { op: StorageOp, lock: &'static str },

    #[error("corrupt data during {op}: {reason}")]
    Corrupt { op: StorageOp, reason: String },
}

/// Read and write access to persisted records and join rows.
///
/// Scans return records in a backend-defined order; both bundled backends
/// order by ascending id.
pub trait StorageBackend: Send + Sync {
    fn load_record(&self, entity: EntityKind, id: RecordId) -> StorageResult<Option<Record>>;
    fn scan_records(&self, entity: EntityKind) -> StorageResult<Vec<Record>>;
    fn store_record(&self, record: &Record) -> StorageResult<()>;
    fn delete_record(&self, entity: EntityKind, id: RecordId) -> StorageResult<()>;

    fn join_rows_by_subject(
        &self,
        table: JoinTable,
        subject: RecordId,
    ) -> StorageResult<Vec<JoinRecord>>;
    fn store_join_row(&self, table: JoinTable, row: &JoinRecord) -> StorageResult<()>;
    /// Removes every row of `table` whose subject is `subject`.
    fn delete_join_rows(&self, table: JoinTable, subject: RecordId) -> StorageResult<()>;

    /// Smallest id greater than every stored id of `entity`, starting at 1.
    fn next_record_id(&self, entity: EntityKind) -> StorageResult<RecordId> {
        let max = self
            .scan_records(entity)?
            .iter()
            .map(Record::id)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }
}
