use std::collections::BTreeMap;

use common::attr::{FieldContainer, FieldValue};
use common::entity::EntityKind;
use common::record::Record;
use tracing::{debug, trace};

use super::document::{DocValue, Document, ExtraFields};
use super::error::{ResolveError, ResolveResult};
use crate::schema::{OutputField, OutputKind, ReferenceDef, Registry, ID_FIELD};
use crate::storage::StorageBackend;

/// Turns flat storage records into nested output documents.
///
/// Every non-null reference costs exactly one point read and is resolved
/// recursively; nothing is cached between or within resolutions.
pub struct Materializer<'a, B: StorageBackend + ?Sized> {
    registry: &'a Registry,
    storage: &'a B,
}

impl<'a, B: StorageBackend + ?Sized> Materializer<'a, B> {
    pub fn new(registry: &'a Registry, storage: &'a B) -> Self {
        Self { registry, storage }
    }

    pub fn resolve(&self, record: &Record) -> ResolveResult<Document> {
        self.resolve_with(record, ExtraFields::new())
    }

    /// Resolves `record` and merges `extra` into the result before the
    /// output shape is checked. Extra entries override colliding keys.
    pub fn resolve_with(&self, record: &Record, extra: ExtraFields) -> ResolveResult<Document> {
        let entity = record.entity();
        let entry = self.registry.lookup(entity)?;
        trace!(%entity, id = record.id(), "resolving record");

        let mut raw = record.fields().clone();
        let mut references = Vec::with_capacity(entry.definition().references().len());
        for reference in entry.definition().references() {
            let value = raw.remove(reference.field()).unwrap_or(FieldValue::Null);
            references.push((reference, value));
        }

        let mut fields: BTreeMap<String, DocValue> = raw
            .into_iter()
            .map(|(name, value)| (name, DocValue::Scalar(value)))
            .collect();

        for (reference, value) in references {
            let name = reference.output_name().ok_or_else(|| {
                ResolveError::schema_mismatch(
                    entity,
                    format!("reference field '{}' has no output name", reference.field()),
                )
            })?;
            let nested = self.resolve_reference(entity, reference, &value)?;
            if fields
                .insert(name.to_string(), DocValue::Nested(nested))
                .is_some()
            {
                return Err(ResolveError::schema_mismatch(
                    entity,
                    format!("stored field '{name}' collides with reference '{}'", reference.field()),
                ));
            }
        }

        fields.insert(
            ID_FIELD.to_string(),
            DocValue::Scalar(FieldValue::Integer(record.id())),
        );
        fields.extend(extra);

        conform(entity, entry.output(), fields)
    }

    fn resolve_reference(
        &self,
        entity: EntityKind,
        reference: &ReferenceDef,
        value: &FieldValue,
    ) -> ResolveResult<Option<Box<Document>>> {
        if value.is_null() {
            return Ok(None);
        }

        let id = value.as_integer().ok_or_else(|| {
            ResolveError::schema_mismatch(
                entity,
                format!("reference field '{}' holds {value:?}, expected an id", reference.field()),
            )
        })?;

        let target = reference.target();
        debug!(%entity, field = reference.field(), %target, id, "following reference");
        let record = self
            .storage
            .load_record(target, id)?
            .ok_or(ResolveError::ReferenceNotFound { entity: target, id })?;
        if record.entity() != target {
            return Err(ResolveError::schema_mismatch(
                target,
                format!("store returned a {} record for {target}#{id}", record.entity()),
            ));
        }

        Ok(Some(Box::new(self.resolve(&record)?)))
    }
}

/// Checks the assembled map against the declared output shape. Optional
/// scalars and references that are absent become null; absent optional
/// associations are left out.
fn conform(
    entity: EntityKind,
    shape: &[OutputField],
    mut fields: BTreeMap<String, DocValue>,
) -> ResolveResult<Document> {
    let mut conformed = BTreeMap::new();
    for field in shape {
        let value = match fields.remove(field.name()) {
            Some(value) => value,
            None if field.required() => {
                return Err(ResolveError::schema_mismatch(
                    entity,
                    format!("missing required field '{}'", field.name()),
                ))
            }
            None => match field.kind() {
                OutputKind::Scalar(_) => DocValue::Scalar(FieldValue::Null),
                OutputKind::Nested(_) => DocValue::Nested(None),
                OutputKind::Associations(_) => continue,
            },
        };

        if !conforms(field, &value) {
            return Err(ResolveError::schema_mismatch(
                entity,
                format!("field '{}' does not hold {}", field.name(), describe(field.kind())),
            ));
        }
        conformed.insert(field.name().to_string(), value);
    }

    if let Some(name) = fields.keys().next() {
        return Err(ResolveError::schema_mismatch(
            entity,
            format!("undeclared field '{name}'"),
        ));
    }

    Ok(Document::new(entity, conformed))
}

fn conforms(field: &OutputField, value: &DocValue) -> bool {
    match (field.kind(), value) {
        (OutputKind::Scalar(_), DocValue::Scalar(FieldValue::Null)) => !field.required(),
        (OutputKind::Scalar(ty), DocValue::Scalar(value)) => ty.accepts(value),
        (OutputKind::Nested(_), DocValue::Nested(None)) => !field.required(),
        (OutputKind::Nested(target), DocValue::Nested(Some(document))) => {
            document.entity() == target
        }
        (OutputKind::Associations(attribute), DocValue::Associations(map)) => {
            map.attribute() == attribute
        }
        _ => false,
    }
}

fn describe(kind: OutputKind) -> String {
    match kind {
        OutputKind::Scalar(ty) => format!("a {ty}"),
        OutputKind::Nested(target) => format!("a nested {target}"),
        OutputKind::Associations(attribute) => format!("{attribute} associations"),
    }
}
