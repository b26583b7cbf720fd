use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use common::attr::{FieldContainer, FieldValue};
use common::entity::{EntityKind, JoinTable};
use common::join::JoinRecord;
use common::record::{Record, RecordId};
use incidentdb_core::resolve::AssociationMap;
use incidentdb_core::schema::check_answers;
use incidentdb_core::storage::StorageOp;
use incidentdb_core::{
    incident_registry, seed_reference_catalog, Assembler, CatalogSeed, CollectionReport,
    Document, InMemoryBackend, Materializer, ResolveError, ResolveResult, SimpleStorage,
    StorageBackend, StorageError,
};
use serde::Deserialize;

use crate::config::{DaemonConfig, ResolutionSettings, StorageBackendKind};
use crate::error::{DaemonError, Result};

pub type DatabaseHandle = Arc<IncidentDatabase>;

/// Request body of `POST /incidents`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewIncident {
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub factory_id: RecordId,
    #[serde(default)]
    pub worker_id: Option<RecordId>,
    #[serde(default, rename = "threatType_id")]
    pub threat_type_id: Option<RecordId>,
    #[serde(default, rename = "checkAnswers")]
    pub check_answers: Vec<NewCheckAnswer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCheckAnswer {
    pub question_id: RecordId,
    pub value: bool,
}

impl NewIncident {
    fn to_record(&self, id: RecordId) -> Record {
        Record::empty(EntityKind::Incident, id)
            .with("title", self.title.as_str())
            .with("description", self.description.as_str())
            .with("date", self.date)
            .with("factory_id", self.factory_id)
            .with("worker_id", self.worker_id)
            .with("threatType_id", self.threat_type_id)
    }
}

/// Incident service: read endpoints go through the shared assembler, writes
/// are serialized so id assignment cannot race.
pub struct IncidentDatabase {
    assembler: Assembler<dyn StorageBackend>,
    policies: ResolutionSettings,
    writes: Mutex<()>,
}

impl IncidentDatabase {
    pub fn from_config(config: &DaemonConfig) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = match config.storage().backend {
            StorageBackendKind::Memory => {
                log::info!("initialising in-memory backend");
                Arc::new(InMemoryBackend::new())
            }
            StorageBackendKind::Simple => {
                let directory = config.storage().directory.as_ref().ok_or_else(|| {
                    DaemonError::Config("storage.directory must be set for simple backend".into())
                })?;
                log::info!(
                    "initialising simple storage backend at {}",
                    directory.display()
                );
                Arc::new(SimpleStorage::new(directory)?)
            }
        };

        if let Some(path) = config.storage().seed_file.as_ref() {
            log::info!("seeding reference catalogs from {}", path.display());
            let seed = CatalogSeed::load(path)?;
            let report = seed_reference_catalog(storage.as_ref(), &seed)?;
            log::info!(
                "seeded {} catalog entries ({} already present)",
                report.added,
                report.skipped
            );
        }

        Self::with_storage(storage, *config.resolution())
    }

    pub fn with_storage(
        storage: Arc<dyn StorageBackend>,
        policies: ResolutionSettings,
    ) -> Result<Self> {
        let registry = Arc::new(incident_registry()?);
        Ok(Self {
            assembler: Assembler::new(registry, storage),
            policies,
            writes: Mutex::new(()),
        })
    }

    pub fn incidents(&self) -> ResolveResult<CollectionReport> {
        self.assembler
            .resolve_collection(EntityKind::Incident, self.policies.incidents)
    }

    pub fn incident(&self, id: RecordId) -> ResolveResult<Document> {
        self.assembler
            .resolve_detail_with(EntityKind::Incident, id, &[check_answers()])
    }

    /// Incidents filed against one factory; an unknown factory is
    /// `NotFound` rather than an empty list.
    pub fn incidents_by_factory(&self, factory_id: RecordId) -> ResolveResult<CollectionReport> {
        self.require(EntityKind::Factory, factory_id)?;
        let wanted = FieldValue::Integer(factory_id);
        self.assembler.resolve_collection_where(
            EntityKind::Incident,
            self.policies.incidents_by_factory,
            |record| record.field("factory_id") == Some(&wanted),
        )
    }

    pub fn incident_answers(&self, id: RecordId) -> ResolveResult<AssociationMap> {
        self.require(EntityKind::Incident, id)?;
        let spec = check_answers();
        self.assembler
            .aggregate_associations(id, spec.table(), spec.attribute())
    }

    pub fn factories(&self) -> ResolveResult<CollectionReport> {
        self.assembler
            .resolve_collection(EntityKind::Factory, self.policies.factories)
    }

    pub fn factory(&self, id: RecordId) -> ResolveResult<Document> {
        self.assembler.resolve_detail(EntityKind::Factory, id)
    }

    pub fn workers(&self) -> ResolveResult<CollectionReport> {
        self.assembler
            .resolve_collection(EntityKind::Worker, self.policies.workers)
    }

    pub fn worker(&self, id: RecordId) -> ResolveResult<Document> {
        self.assembler.resolve_detail(EntityKind::Worker, id)
    }

    /// Validates every reference of `incident`, stores it under the next
    /// free id together with its checklist answers and returns the resolved
    /// document.
    pub fn create_incident(&self, incident: NewIncident) -> Result<Document> {
        let _guard = self.writes.lock().map_err(|_| {
            DaemonError::Storage(StorageError::LockPoisoned {
                op: StorageOp::Prepare("create incident"),
                lock: "incident writes",
            })
        })?;

        let storage = self.assembler.storage();
        let mut questions = HashSet::new();
        for answer in &incident.check_answers {
            if !questions.insert(answer.question_id) {
                return Err(DaemonError::BadRequest(format!(
                    "check question {} answered more than once",
                    answer.question_id
                )));
            }
            self.require_reference(EntityKind::CheckQuestion, answer.question_id)?;
        }

        let id = storage.next_record_id(EntityKind::Incident)?;
        let record = incident.to_record(id);
        Materializer::new(self.assembler.registry(), storage).resolve(&record)?;

        storage.store_record(&record)?;
        if let Err(err) = Self::store_answers(storage, id, &incident.check_answers) {
            log::warn!("rolling back incident {id}: {err}");
            Self::discard_incident(storage, id);
            return Err(err.into());
        }
        log::info!(
            "created incident {id} for factory {} with {} check answers",
            incident.factory_id,
            incident.check_answers.len()
        );

        Ok(self.incident(id)?)
    }

    fn store_answers(
        storage: &dyn StorageBackend,
        id: RecordId,
        answers: &[NewCheckAnswer],
    ) -> std::result::Result<(), StorageError> {
        for answer in answers {
            storage.store_join_row(
                JoinTable::IncidentCheckAnswer,
                &JoinRecord::new(id, answer.question_id, answer.value),
            )?;
        }
        Ok(())
    }

    /// Best-effort removal of a partially written incident. Failures are
    /// logged; the caller reports the original write error.
    fn discard_incident(storage: &dyn StorageBackend, id: RecordId) {
        if let Err(err) = storage.delete_join_rows(JoinTable::IncidentCheckAnswer, id) {
            log::error!("failed to remove check answers of incident {id}: {err}");
        }
        if let Err(err) = storage.delete_record(EntityKind::Incident, id) {
            log::error!("failed to remove incident {id}: {err}");
        }
    }

    fn require(&self, entity: EntityKind, id: RecordId) -> ResolveResult<()> {
        match self.assembler.storage().load_record(entity, id)? {
            Some(_) => Ok(()),
            None => Err(ResolveError::NotFound { entity, id }),
        }
    }

    fn require_reference(&self, entity: EntityKind, id: RecordId) -> ResolveResult<()> {
        self.require(entity, id).map_err(|err| match err {
            ResolveError::NotFound { entity, id } => ResolveError::ReferenceNotFound { entity, id },
            other => other,
        })
    }
}

pub fn shared_database(config: &DaemonConfig) -> Result<DatabaseHandle> {
    let db = IncidentDatabase::from_config(config)?;
    Ok(Arc::new(db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use incidentdb_core::StorageResult;

    fn database() -> IncidentDatabase {
        let storage = InMemoryBackend::new();
        let seed: CatalogSeed = serde_json::from_str(
            r#"{"factories":[{"name":"F1"},{"name":"F2"}],"checkQuestions":[{"question":"q1"}]}"#,
        )
        .unwrap();
        seed_reference_catalog(&storage, &seed).unwrap();
        IncidentDatabase::with_storage(Arc::new(storage), ResolutionSettings::default()).unwrap()
    }

    fn new_incident(factory_id: RecordId) -> NewIncident {
        NewIncident {
            title: "Spill".into(),
            description: "Solvent spill".into(),
            date: Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
            factory_id,
            worker_id: None,
            threat_type_id: None,
            check_answers: vec![NewCheckAnswer {
                question_id: 1,
                value: true,
            }],
        }
    }

    #[test]
    fn created_incident_is_resolved_with_answers() {
        let db = database();

        let document = db.create_incident(new_incident(2)).unwrap();

        assert_eq!(document.id(), Some(1));
        let factory = document.nested("factory").unwrap();
        assert_eq!(factory.scalar("name"), Some(&FieldValue::from("F2")));
        let answers = document.associations("checkAnswers").unwrap();
        assert_eq!(answers.payload_for(1), Some(&FieldValue::Boolean(true)));
    }

    #[test]
    fn missing_factory_is_rejected_without_storing() {
        let db = database();

        let err = db.create_incident(new_incident(9)).unwrap_err();

        match err {
            DaemonError::Resolve(err) => {
                assert_eq!(err.missing(), Some((EntityKind::Factory, 9)))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(db.incidents().unwrap().documents.is_empty());
    }

    /// Accepts records but refuses every join row.
    struct FailingJoins {
        inner: InMemoryBackend,
    }

    impl StorageBackend for FailingJoins {
        fn load_record(&self, entity: EntityKind, id: RecordId) -> StorageResult<Option<Record>> {
            self.inner.load_record(entity, id)
        }

        fn scan_records(&self, entity: EntityKind) -> StorageResult<Vec<Record>> {
            self.inner.scan_records(entity)
        }

        fn store_record(&self, record: &Record) -> StorageResult<()> {
            self.inner.store_record(record)
        }

        fn delete_record(&self, entity: EntityKind, id: RecordId) -> StorageResult<()> {
            self.inner.delete_record(entity, id)
        }

        fn join_rows_by_subject(
            &self,
            table: JoinTable,
            subject: RecordId,
        ) -> StorageResult<Vec<JoinRecord>> {
            self.inner.join_rows_by_subject(table, subject)
        }

        fn store_join_row(&self, table: JoinTable, row: &JoinRecord) -> StorageResult<()> {
            Err(StorageError::Corrupt {
                op: StorageOp::StoreJoinRow(table, row.subject(), row.attribute()),
                reason: "disk full".into(),
            })
        }

        fn delete_join_rows(&self, table: JoinTable, subject: RecordId) -> StorageResult<()> {
            self.inner.delete_join_rows(table, subject)
        }
    }

    #[test]
    fn failed_answer_write_leaves_no_incident_behind() {
        let inner = InMemoryBackend::new();
        let seed: CatalogSeed = serde_json::from_str(
            r#"{"factories":[{"name":"F1"}],"checkQuestions":[{"question":"q1"}]}"#,
        )
        .unwrap();
        seed_reference_catalog(&inner, &seed).unwrap();
        let storage = Arc::new(FailingJoins { inner });
        let db = IncidentDatabase::with_storage(
            Arc::clone(&storage) as Arc<dyn StorageBackend>,
            ResolutionSettings::default(),
        )
        .unwrap();

        let err = db.create_incident(new_incident(1)).unwrap_err();

        assert!(matches!(err, DaemonError::Storage(_)));
        assert!(matches!(
            db.incident(1).unwrap_err(),
            ResolveError::NotFound {
                entity: EntityKind::Incident,
                id: 1
            }
        ));
        assert!(storage
            .join_rows_by_subject(JoinTable::IncidentCheckAnswer, 1)
            .unwrap()
            .is_empty());
        assert_eq!(storage.next_record_id(EntityKind::Incident).unwrap(), 1);
    }

    #[test]
    fn duplicate_answers_are_a_bad_request() {
        let db = database();
        let mut incident = new_incident(1);
        incident.check_answers.push(NewCheckAnswer {
            question_id: 1,
            value: false,
        });

        let err = db.create_incident(incident).unwrap_err();
        assert!(matches!(err, DaemonError::BadRequest(_)));
    }

    #[test]
    fn incidents_by_factory_filters_and_checks_factory() {
        let db = database();
        db.create_incident(new_incident(1)).unwrap();
        db.create_incident(new_incident(2)).unwrap();
        db.create_incident(new_incident(1)).unwrap();

        let ids: Vec<_> = db
            .incidents_by_factory(1)
            .unwrap()
            .documents
            .iter()
            .filter_map(Document::id)
            .collect();
        assert_eq!(ids, vec![1, 3]);

        let err = db.incidents_by_factory(42).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::NotFound {
                entity: EntityKind::Factory,
                id: 42
            }
        ));
    }
}
