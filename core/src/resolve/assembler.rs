use std::sync::Arc;

use common::entity::{EntityKind, JoinTable};
use common::record::{Record, RecordId};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::association::Aggregator;
use super::document::{AssociationMap, DocValue, Document, ExtraFields};
use super::error::{ResolveError, ResolveResult};
use super::materializer::Materializer;
use crate::schema::Registry;
use crate::storage::StorageBackend;

/// How a collection lookup treats a record that fails to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionPolicy {
    /// The first failure aborts the whole collection.
    #[default]
    FailFast,
    /// Records with a dangling reference are logged, reported and omitted.
    /// Any other failure still aborts.
    SkipAndContinue,
}

/// An association field to graft onto a detail document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationSpec {
    field: String,
    table: JoinTable,
    attribute: EntityKind,
}

impl AssociationSpec {
    pub fn new(field: impl Into<String>, table: JoinTable, attribute: EntityKind) -> Self {
        Self {
            field: field.into(),
            table,
            attribute,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn table(&self) -> JoinTable {
        self.table
    }

    pub fn attribute(&self) -> EntityKind {
        self.attribute
    }
}

/// A record left out of a skip-and-continue collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub entity: EntityKind,
    pub id: RecordId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedRecord>,
}

impl CollectionReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Per-request orchestration over a shared registry and store.
pub struct Assembler<B: StorageBackend + ?Sized> {
    registry: Arc<Registry>,
    storage: Arc<B>,
}

impl<B: StorageBackend + ?Sized> Clone for Assembler<B> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<B: StorageBackend + ?Sized> Assembler<B> {
    pub fn new(registry: Arc<Registry>, storage: Arc<B>) -> Self {
        Self { registry, storage }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn storage(&self) -> &B {
        &self.storage
    }

    fn materializer(&self) -> Materializer<'_, B> {
        Materializer::new(&self.registry, &*self.storage)
    }

    pub fn resolve_detail(&self, entity: EntityKind, id: RecordId) -> ResolveResult<Document> {
        self.resolve_detail_with(entity, id, &[])
    }

    /// Detail lookup with association fields grafted on. A missing root
    /// record is `NotFound`.
    pub fn resolve_detail_with(
        &self,
        entity: EntityKind,
        id: RecordId,
        associations: &[AssociationSpec],
    ) -> ResolveResult<Document> {
        let record = self
            .storage
            .load_record(entity, id)?
            .ok_or(ResolveError::NotFound { entity, id })?;

        let mut extra = ExtraFields::new();
        for spec in associations {
            let subject = self.registry.join(spec.table)?.subject;
            if subject != entity {
                error!(%entity, table = %spec.table, "association spec on a foreign join table");
                return Err(ResolveError::schema_mismatch(
                    entity,
                    format!(
                        "association '{}' uses {} whose subject is {subject}",
                        spec.field, spec.table
                    ),
                ));
            }
            let map = self.aggregate_associations(id, spec.table, spec.attribute)?;
            extra.insert(spec.field.clone(), DocValue::Associations(map));
        }

        self.materializer().resolve_with(&record, extra)
    }

    pub fn resolve_collection(
        &self,
        entity: EntityKind,
        policy: CollectionPolicy,
    ) -> ResolveResult<CollectionReport> {
        self.resolve_collection_where(entity, policy, |_| true)
    }

    /// Resolves every stored `entity` record accepted by `filter`, in scan
    /// order, under `policy`.
    pub fn resolve_collection_where<F>(
        &self,
        entity: EntityKind,
        policy: CollectionPolicy,
        filter: F,
    ) -> ResolveResult<CollectionReport>
    where
        F: Fn(&Record) -> bool,
    {
        self.registry.lookup(entity)?;
        let materializer = self.materializer();

        let mut report = CollectionReport {
            documents: Vec::new(),
            skipped: Vec::new(),
        };
        for record in self.storage.scan_records(entity)? {
            if !filter(&record) {
                continue;
            }

            match materializer.resolve(&record) {
                Ok(document) => report.documents.push(document),
                Err(err @ ResolveError::ReferenceNotFound { .. })
                    if policy == CollectionPolicy::SkipAndContinue =>
                {
                    warn!(%entity, id = record.id(), error = %err, "skipping unresolvable record");
                    report.skipped.push(SkippedRecord {
                        entity,
                        id: record.id(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    if err.is_configuration_defect() {
                        error!(%entity, id = record.id(), error = %err, "record does not match registry");
                    }
                    return Err(err);
                }
            }
        }

        Ok(report)
    }

    pub fn aggregate_associations(
        &self,
        subject: RecordId,
        table: JoinTable,
        attribute: EntityKind,
    ) -> ResolveResult<AssociationMap> {
        Aggregator::new(&self.registry, &*self.storage).aggregate(subject, table, attribute)
    }
}
