//! Entity declarations and the type registry built from them.

pub mod entity;
pub mod incident;
pub mod registry;

pub use entity::{
    AssociationDef, EntityDef, FieldDef, OutputField, OutputKind, ReferenceDef, ID_FIELD,
    REFERENCE_SUFFIX,
};
pub use incident::{check_answers, incident_registry, label_field, CHECK_ANSWERS_FIELD};
pub use registry::{
    JoinDef, Registry, RegistryBuilder, RegistryEntry, RegistryError, RegistryResult,
};
