use std::sync::Arc;

use common::attr::{FieldValue, ScalarType};
use common::entity::{EntityKind, JoinTable};
use common::join::JoinRecord;
use common::record::Record;
use incidentdb_core::schema::EntityDef;
use incidentdb_core::{
    Assembler, CollectionPolicy, InMemoryBackend, Registry, ResolveError,
};
use serde_json::json;

fn registry() -> Arc<Registry> {
    let registry = Registry::builder()
        .entity(EntityDef::new(EntityKind::Factory).field("name", ScalarType::String))
        .entity(EntityDef::new(EntityKind::CheckQuestion).field("question", ScalarType::String))
        .entity(
            EntityDef::new(EntityKind::Incident)
                .field("description", ScalarType::String)
                .reference("factory_id", EntityKind::Factory)
                .associations("checkAnswers", EntityKind::CheckQuestion),
        )
        .join(
            JoinTable::IncidentCheckAnswer,
            EntityKind::Incident,
            EntityKind::CheckQuestion,
            ScalarType::Boolean,
        )
        .build()
        .expect("registry");
    Arc::new(registry)
}

fn incident(id: i64, factory: i64) -> Record {
    Record::empty(EntityKind::Incident, id)
        .with("description", "d")
        .with("factory_id", factory)
}

fn assembler_with(records: Vec<Record>) -> Assembler<InMemoryBackend> {
    let storage = InMemoryBackend::new();
    storage
        .insert_record(Record::empty(EntityKind::Factory, 1).with("name", "F1"))
        .unwrap();
    for record in records {
        storage.insert_record(record).unwrap();
    }
    Assembler::new(registry(), Arc::new(storage))
}

#[test]
fn detail_nests_referenced_factory() {
    let assembler = assembler_with(vec![incident(10, 1)]);

    let document = assembler
        .resolve_detail(EntityKind::Incident, 10)
        .expect("resolve incident");

    assert_eq!(
        serde_json::to_value(&document).unwrap(),
        json!({"id": 10, "description": "d", "factory": {"id": 1, "name": "F1"}})
    );
}

#[test]
fn dangling_factory_is_reference_not_found() {
    let assembler = assembler_with(vec![incident(11, 999)]);

    let err = assembler
        .resolve_detail(EntityKind::Incident, 11)
        .unwrap_err();

    match err {
        ResolveError::ReferenceNotFound { entity, id } => {
            assert_eq!(entity, EntityKind::Factory);
            assert_eq!(id, 999);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn check_answers_aggregate_into_two_entries() {
    let assembler = assembler_with(vec![incident(5, 1)]);
    let storage = assembler.storage();
    storage
        .insert_record(Record::empty(EntityKind::CheckQuestion, 1).with("question", "q1"))
        .unwrap();
    storage
        .insert_record(Record::empty(EntityKind::CheckQuestion, 2).with("question", "q2"))
        .unwrap();
    storage
        .insert_join_row(JoinTable::IncidentCheckAnswer, JoinRecord::new(5, 1, true))
        .unwrap();
    storage
        .insert_join_row(JoinTable::IncidentCheckAnswer, JoinRecord::new(5, 2, false))
        .unwrap();

    let answers = assembler
        .aggregate_associations(5, JoinTable::IncidentCheckAnswer, EntityKind::CheckQuestion)
        .expect("aggregate");

    assert_eq!(answers.len(), 2);
    assert_eq!(answers.payload_for(1), Some(&FieldValue::Boolean(true)));
    assert_eq!(answers.payload_for(2), Some(&FieldValue::Boolean(false)));
    assert_eq!(
        serde_json::to_value(&answers).unwrap(),
        json!([
            {"checkQuestion": {"id": 1, "question": "q1"}, "value": true},
            {"checkQuestion": {"id": 2, "question": "q2"}, "value": false},
        ])
    );
}

#[test]
fn skip_and_continue_returns_resolvable_records() {
    let assembler = assembler_with(vec![incident(1, 1), incident(2, 999), incident(3, 1)]);

    let report = assembler
        .resolve_collection(EntityKind::Incident, CollectionPolicy::SkipAndContinue)
        .expect("collection");

    let ids: Vec<_> = report.documents.iter().filter_map(|d| d.id()).collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].entity, EntityKind::Incident);
    assert_eq!(report.skipped[0].id, 2);
    assert_eq!(report.skipped[0].reason, "referenced factory 999 not found");
}

#[test]
fn fail_fast_surfaces_the_dangling_reference() {
    let assembler = assembler_with(vec![incident(1, 1), incident(2, 999), incident(3, 1)]);

    let err = assembler
        .resolve_collection(EntityKind::Incident, CollectionPolicy::FailFast)
        .unwrap_err();

    assert_eq!(err.missing(), Some((EntityKind::Factory, 999)));
}
