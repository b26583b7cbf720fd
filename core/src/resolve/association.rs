use common::entity::{EntityKind, JoinTable};
use common::record::RecordId;
use tracing::debug;

use super::document::{Association, AssociationMap};
use super::error::{ResolveError, ResolveResult};
use super::materializer::Materializer;
use crate::schema::Registry;
use crate::storage::StorageBackend;

/// Resolves many-to-many join rows for one subject into an
/// [`AssociationMap`].
pub struct Aggregator<'a, B: StorageBackend + ?Sized> {
    registry: &'a Registry,
    storage: &'a B,
}

impl<'a, B: StorageBackend + ?Sized> Aggregator<'a, B> {
    pub fn new(registry: &'a Registry, storage: &'a B) -> Self {
        Self { registry, storage }
    }

    /// One entry per join row of `subject` in `table`, in store order.
    ///
    /// Each attribute-side id is loaded and resolved like any other
    /// reference, so a dangling row fails with `ReferenceNotFound`.
    pub fn aggregate(
        &self,
        subject: RecordId,
        table: JoinTable,
        attribute: EntityKind,
    ) -> ResolveResult<AssociationMap> {
        let join = *self.registry.join(table)?;
        if join.attribute != attribute {
            return Err(ResolveError::schema_mismatch(
                attribute,
                format!("{table} links {} to {}, not {attribute}", join.subject, join.attribute),
            ));
        }

        let rows = self.storage.join_rows_by_subject(table, subject)?;
        debug!(%table, subject, rows = rows.len(), "aggregating associations");

        let materializer = Materializer::new(self.registry, self.storage);
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let payload = row.payload();
            if !payload.is_null() && !join.payload.accepts(payload) {
                return Err(ResolveError::schema_mismatch(
                    join.subject,
                    format!(
                        "{table} row ({subject}, {}) carries {payload:?}, expected a {}",
                        row.attribute(),
                        join.payload
                    ),
                ));
            }

            let id = row.attribute();
            let record = self
                .storage
                .load_record(attribute, id)?
                .ok_or(ResolveError::ReferenceNotFound {
                    entity: attribute,
                    id,
                })?;
            let document = materializer.resolve(&record)?;
            entries.push(Association::new(document, row.into_payload()));
        }

        Ok(AssociationMap::new(attribute, entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityDef;
    use crate::storage::InMemoryBackend;
    use common::attr::{FieldValue, ScalarType};
    use common::join::JoinRecord;
    use common::record::Record;

    fn registry() -> Registry {
        Registry::builder()
            .entity(EntityDef::new(EntityKind::CheckQuestion).field("question", ScalarType::String))
            .entity(EntityDef::new(EntityKind::Incident).field("title", ScalarType::String))
            .join(
                JoinTable::IncidentCheckAnswer,
                EntityKind::Incident,
                EntityKind::CheckQuestion,
                ScalarType::Boolean,
            )
            .build()
            .unwrap()
    }

    #[test]
    fn dangling_attribute_is_reference_not_found() {
        let registry = registry();
        let storage = InMemoryBackend::new();
        storage
            .insert_join_row(JoinTable::IncidentCheckAnswer, JoinRecord::new(5, 77, true))
            .unwrap();

        let err = Aggregator::new(&registry, &storage)
            .aggregate(5, JoinTable::IncidentCheckAnswer, EntityKind::CheckQuestion)
            .unwrap_err();
        assert_eq!(err.missing(), Some((EntityKind::CheckQuestion, 77)));
    }

    #[test]
    fn mistyped_payload_is_schema_mismatch() {
        let registry = registry();
        let storage = InMemoryBackend::new();
        storage
            .insert_record(Record::empty(EntityKind::CheckQuestion, 1).with("question", "q1"))
            .unwrap();
        storage
            .insert_join_row(JoinTable::IncidentCheckAnswer, JoinRecord::new(5, 1, "yes"))
            .unwrap();

        let err = Aggregator::new(&registry, &storage)
            .aggregate(5, JoinTable::IncidentCheckAnswer, EntityKind::CheckQuestion)
            .unwrap_err();
        assert!(err.is_configuration_defect());
    }

    #[test]
    fn wrong_attribute_entity_is_schema_mismatch() {
        let registry = registry();
        let storage = InMemoryBackend::new();

        let err = Aggregator::new(&registry, &storage)
            .aggregate(5, JoinTable::IncidentCheckAnswer, EntityKind::Incident)
            .unwrap_err();
        assert!(err.is_configuration_defect());
    }

    #[test]
    fn null_payload_is_kept() {
        let registry = registry();
        let storage = InMemoryBackend::new();
        storage
            .insert_record(Record::empty(EntityKind::CheckQuestion, 1).with("question", "q1"))
            .unwrap();
        storage
            .insert_join_row(
                JoinTable::IncidentCheckAnswer,
                JoinRecord::new(5, 1, FieldValue::Null),
            )
            .unwrap();

        let map = Aggregator::new(&registry, &storage)
            .aggregate(5, JoinTable::IncidentCheckAnswer, EntityKind::CheckQuestion)
            .unwrap();
        assert_eq!(map.payload_for(1), Some(&FieldValue::Null));
    }
}
