use std::collections::BTreeMap;

use common::attr::FieldValue;
use common::entity::EntityKind;
use common::record::RecordId;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::schema::ID_FIELD;

/// Extra entries merged into a document after reference resolution.
pub type ExtraFields = BTreeMap<String, DocValue>;

/// Fully resolved, nested form of a storage record.
///
/// Serializes as a plain JSON object: scalars untagged, nested documents as
/// objects, absent optional references as `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    entity: EntityKind,
    fields: BTreeMap<String, DocValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    Scalar(FieldValue),
    /// A resolved reference; `None` when an optional reference is null.
    Nested(Option<Box<Document>>),
    Associations(AssociationMap),
}

impl Document {
    pub fn new(entity: EntityKind, fields: BTreeMap<String, DocValue>) -> Self {
        Self { entity, fields }
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn id(&self) -> Option<RecordId> {
        self.scalar(ID_FIELD).and_then(FieldValue::as_integer)
    }

    pub fn fields(&self) -> &BTreeMap<String, DocValue> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&DocValue> {
        self.fields.get(name)
    }

    pub fn scalar(&self, name: &str) -> Option<&FieldValue> {
        match self.fields.get(name) {
            Some(DocValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    /// The nested document under `name`; `None` if absent, null or not a
    /// reference.
    pub fn nested(&self, name: &str) -> Option<&Document> {
        match self.fields.get(name) {
            Some(DocValue::Nested(Some(document))) => Some(document),
            _ => None,
        }
    }

    pub fn associations(&self, name: &str) -> Option<&AssociationMap> {
        match self.fields.get(name) {
            Some(DocValue::Associations(map)) => Some(map),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }
}

impl DocValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DocValue::Scalar(value) => value.to_json(),
            DocValue::Nested(Some(document)) => document.to_json(),
            DocValue::Nested(None) => serde_json::Value::Null,
            DocValue::Associations(map) => map.to_json(),
        }
    }
}

impl From<FieldValue> for DocValue {
    fn from(value: FieldValue) -> Self {
        DocValue::Scalar(value)
    }
}

impl From<Document> for DocValue {
    fn from(document: Document) -> Self {
        DocValue::Nested(Some(Box::new(document)))
    }
}

impl From<AssociationMap> for DocValue {
    fn from(map: AssociationMap) -> Self {
        DocValue::Associations(map)
    }
}

/// One resolved join row: the attribute-side document and the row payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    document: Document,
    payload: FieldValue,
}

impl Association {
    pub fn new(document: Document, payload: FieldValue) -> Self {
        Self { document, payload }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn payload(&self) -> &FieldValue {
        &self.payload
    }
}

/// Mapping from resolved attribute documents to association payloads, in
/// the order the store returned the join rows.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationMap {
    attribute: EntityKind,
    entries: Vec<Association>,
}

impl AssociationMap {
    pub fn new(attribute: EntityKind, entries: Vec<Association>) -> Self {
        Self { attribute, entries }
    }

    pub fn attribute(&self) -> EntityKind {
        self.attribute
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Association> {
        self.entries.iter()
    }

    /// Payload recorded for the given attribute document.
    pub fn get(&self, document: &Document) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|entry| &entry.document == document)
            .map(Association::payload)
    }

    /// Payload recorded for the attribute record with id `id`.
    pub fn payload_for(&self, id: RecordId) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|entry| entry.document.id() == Some(id))
            .map(Association::payload)
    }

    /// `[{"<attribute>": {...}, "value": <payload>}, ...]`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.entries
                .iter()
                .map(|entry| {
                    let mut object = serde_json::Map::with_capacity(2);
                    object.insert(self.attribute.name().to_string(), entry.document.to_json());
                    object.insert("value".to_string(), entry.payload.to_json());
                    serde_json::Value::Object(object)
                })
                .collect(),
        )
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for DocValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DocValue::Scalar(value) => value.to_json().serialize(serializer),
            DocValue::Nested(Some(document)) => document.serialize(serializer),
            DocValue::Nested(None) => serializer.serialize_none(),
            DocValue::Associations(map) => map.serialize(serializer),
        }
    }
}

impl Serialize for AssociationMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.entries.len()))?;
        for entry in &self.entries {
            seq.serialize_element(&AssociationEntry {
                key: self.attribute.name(),
                entry,
            })?;
        }
        seq.end()
    }
}

struct AssociationEntry<'a> {
    key: &'static str,
    entry: &'a Association,
}

impl Serialize for AssociationEntry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(self.key, &self.entry.document)?;
        map.serialize_entry("value", &self.entry.payload.to_json())?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn factory() -> Document {
        Document::new(
            EntityKind::Factory,
            BTreeMap::from([
                ("id".to_string(), DocValue::from(FieldValue::Integer(1))),
                ("name".to_string(), DocValue::from(FieldValue::from("F1"))),
            ]),
        )
    }

    #[test]
    fn serializes_as_plain_nested_json() {
        let incident = Document::new(
            EntityKind::Incident,
            BTreeMap::from([
                ("id".to_string(), DocValue::from(FieldValue::Integer(10))),
                ("factory".to_string(), DocValue::from(factory())),
                ("worker".to_string(), DocValue::Nested(None)),
            ]),
        );

        let value = serde_json::to_value(&incident).unwrap();
        assert_eq!(
            value,
            json!({"id": 10, "factory": {"id": 1, "name": "F1"}, "worker": null})
        );
        assert_eq!(incident.to_json(), value);
    }

    #[test]
    fn associations_serialize_as_keyed_entries() {
        let map = AssociationMap::new(
            EntityKind::Factory,
            vec![Association::new(factory(), FieldValue::Boolean(true))],
        );

        let value = serde_json::to_value(&map).unwrap();
        assert_eq!(value, json!([{"factory": {"id": 1, "name": "F1"}, "value": true}]));
        assert_eq!(map.to_json(), value);
    }

    #[test]
    fn association_lookup_by_document_and_id() {
        let map = AssociationMap::new(
            EntityKind::Factory,
            vec![Association::new(factory(), FieldValue::Boolean(false))],
        );

        assert_eq!(map.get(&factory()), Some(&FieldValue::Boolean(false)));
        assert_eq!(map.payload_for(1), Some(&FieldValue::Boolean(false)));
        assert_eq!(map.payload_for(2), None);
    }
}
