//! Per-entity storage and output shapes.

use common::attr::ScalarType;
use common::entity::EntityKind;

/// Naming convention for reference fields: `<entity>_id`.
pub const REFERENCE_SUFFIX: &str = "_id";

/// Name of the implicit primary-key field every output document carries.
pub const ID_FIELD: &str = "id";

/// A scalar column of a storage record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    name: String,
    ty: ScalarType,
    required: bool,
}

impl FieldDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ScalarType {
        self.ty
    }

    pub fn required(&self) -> bool {
        self.required
    }
}

/// A declared reference edge: `field` holds the id of a `target` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDef {
    field: String,
    target: EntityKind,
    optional: bool,
}

impl ReferenceDef {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn target(&self) -> EntityKind {
        self.target
    }

    pub fn optional(&self) -> bool {
        self.optional
    }

    /// Key under which the resolved document is placed: the field name with
    /// the `_id` suffix stripped. `None` if the field breaks the convention.
    pub fn output_name(&self) -> Option<&str> {
        self.field
            .strip_suffix(REFERENCE_SUFFIX)
            .filter(|stem| !stem.is_empty())
    }
}

/// A synthetic field grafted on at request time from a join table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDef {
    name: String,
    attribute: EntityKind,
}

impl AssociationDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self) -> EntityKind {
        self.attribute
    }
}

/// Declaration of one entity: its scalar columns, its outgoing reference
/// edges and any synthetic association fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    kind: EntityKind,
    fields: Vec<FieldDef>,
    references: Vec<ReferenceDef>,
    associations: Vec<AssociationDef>,
}

impl EntityDef {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
            references: Vec::new(),
            associations: Vec::new(),
        }
    }

    pub fn field(self, name: impl Into<String>, ty: ScalarType) -> Self {
        self.push_field(name, ty, true)
    }

    pub fn optional_field(self, name: impl Into<String>, ty: ScalarType) -> Self {
        self.push_field(name, ty, false)
    }

    pub fn reference(self, field: impl Into<String>, target: EntityKind) -> Self {
        self.push_reference(field, target, false)
    }

    pub fn optional_reference(self, field: impl Into<String>, target: EntityKind) -> Self {
        self.push_reference(field, target, true)
    }

    pub fn associations(mut self, name: impl Into<String>, attribute: EntityKind) -> Self {
        self.associations.push(AssociationDef {
            name: name.into(),
            attribute,
        });
        self
    }

    fn push_field(mut self, name: impl Into<String>, ty: ScalarType, required: bool) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
            required,
        });
        self
    }

    fn push_reference(mut self, field: impl Into<String>, target: EntityKind, optional: bool) -> Self {
        self.references.push(ReferenceDef {
            field: field.into(),
            target,
            optional,
        });
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn references(&self) -> &[ReferenceDef] {
        &self.references
    }

    pub fn association_defs(&self) -> &[AssociationDef] {
        &self.associations
    }

    /// Reference-catalog entities have no outgoing edges and terminate
    /// resolution.
    pub fn is_leaf(&self) -> bool {
        self.references.is_empty()
    }

    /// Output shape derived from the declaration: `id`, scalar fields,
    /// nested references and association fields, in that order. Assumes the
    /// reference names were validated.
    pub(crate) fn output_shape(&self) -> Vec<OutputField> {
        let mut shape = Vec::with_capacity(
            1 + self.fields.len() + self.references.len() + self.associations.len(),
        );
        shape.push(OutputField {
            name: ID_FIELD.to_string(),
            kind: OutputKind::Scalar(ScalarType::Integer),
            required: true,
        });
        shape.extend(self.fields.iter().map(|field| OutputField {
            name: field.name.clone(),
            kind: OutputKind::Scalar(field.ty),
            required: field.required,
        }));
        shape.extend(self.references.iter().map(|reference| OutputField {
            name: reference
                .output_name()
                .unwrap_or(reference.field())
                .to_string(),
            kind: OutputKind::Nested(reference.target),
            required: !reference.optional,
        }));
        shape.extend(self.associations.iter().map(|association| OutputField {
            name: association.name.clone(),
            kind: OutputKind::Associations(association.attribute),
            required: false,
        }));
        shape
    }
}

/// What an output document holds under one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Scalar(ScalarType),
    Nested(EntityKind),
    Associations(EntityKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputField {
    name: String,
    kind: OutputKind,
    required: bool,
}

impl OutputField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn required(&self) -> bool {
        self.required
    }
}
