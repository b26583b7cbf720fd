//! The incident-reporting schema: reference catalogs, workers, incidents and
//! the incident checklist answers.

use common::attr::ScalarType;
use common::entity::{EntityKind, JoinTable};

use super::entity::EntityDef;
use super::registry::{Registry, RegistryResult};
use crate::resolve::AssociationSpec;

/// Synthetic incident field carrying the resolved checklist answers.
pub const CHECK_ANSWERS_FIELD: &str = "checkAnswers";

/// The scalar column that names a reference-catalog entry, if `entity` is a
/// catalog.
pub fn label_field(entity: EntityKind) -> Option<&'static str> {
    match entity {
        EntityKind::Factory | EntityKind::ThreatType => Some("name"),
        EntityKind::AgeRange | EntityKind::WorkExperienceRange => Some("range"),
        EntityKind::CheckQuestion => Some("question"),
        EntityKind::Worker | EntityKind::Incident => None,
    }
}

/// How an incident's checklist answers are grafted onto its document.
pub fn check_answers() -> AssociationSpec {
    AssociationSpec::new(
        CHECK_ANSWERS_FIELD,
        JoinTable::IncidentCheckAnswer,
        EntityKind::CheckQuestion,
    )
}

/// Builds the registry for the incident backend.
pub fn incident_registry() -> RegistryResult<Registry> {
    let mut builder = Registry::builder();
    for kind in EntityKind::ALL {
        if let Some(label) = label_field(kind) {
            builder = builder.entity(EntityDef::new(kind).field(label, ScalarType::String));
        }
    }

    builder
        .entity(
            EntityDef::new(EntityKind::Worker)
                .field("name", ScalarType::String)
                .optional_field("sex", ScalarType::String)
                .optional_reference("ageRange_id", EntityKind::AgeRange)
                .optional_reference("workExperienceRange_id", EntityKind::WorkExperienceRange),
        )
        .entity(
            EntityDef::new(EntityKind::Incident)
                .field("title", ScalarType::String)
                .field("description", ScalarType::String)
                .field("date", ScalarType::Timestamp)
                .reference("factory_id", EntityKind::Factory)
                .optional_reference("worker_id", EntityKind::Worker)
                .optional_reference("threatType_id", EntityKind::ThreatType)
                .associations(CHECK_ANSWERS_FIELD, EntityKind::CheckQuestion),
        )
        .join(
            JoinTable::IncidentCheckAnswer,
            EntityKind::Incident,
            EntityKind::CheckQuestion,
            ScalarType::Boolean,
        )
        .build()
}
