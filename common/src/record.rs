use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attr::{FieldContainer, FieldValue};
use crate::entity::EntityKind;

pub type RecordId = i64;

/// Flat, persisted form of an entity instance. Reference fields hold the raw
/// id of the referenced record (or `Null`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    entity: EntityKind,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(entity: EntityKind, id: RecordId, fields: BTreeMap<String, FieldValue>) -> Self {
        Self { id, entity, fields }
    }

    /// Starts an empty record; chain [`Record::with`] to add fields.
    pub fn empty(entity: EntityKind, id: RecordId) -> Self {
        Self::new(entity, id, BTreeMap::new())
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn into_fields(self) -> BTreeMap<String, FieldValue> {
        self.fields
    }
}

impl FieldContainer for Record {
    fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }
}
