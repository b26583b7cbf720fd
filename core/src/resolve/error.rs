use common::entity::EntityKind;
use common::record::RecordId;
use thiserror::Error;

use crate::storage::StorageError;

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Failures while turning storage records into output documents.
///
/// `NotFound` and `ReferenceNotFound` describe caller-visible data
/// conditions. `UnknownEntity` and `SchemaMismatch` mean the registry and the
/// stored data have drifted apart and are never expected in a correctly
/// configured deployment.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: RecordId },

    #[error("referenced {entity} {id} not found")]
    ReferenceNotFound { entity: EntityKind, id: RecordId },

    #[error("no registry entry for '{0}'")]
    UnknownEntity(String),

    #[error("{entity} does not match its registered shape: {reason}")]
    SchemaMismatch { entity: EntityKind, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ResolveError {
    pub(crate) fn schema_mismatch(entity: EntityKind, reason: impl Into<String>) -> Self {
        ResolveError::SchemaMismatch {
            entity,
            reason: reason.into(),
        }
    }

    /// Missing records: surfaced to the caller as "not found".
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ResolveError::NotFound { .. } | ResolveError::ReferenceNotFound { .. }
        )
    }

    /// Registry/schema drift: fatal, never recovered locally.
    pub fn is_configuration_defect(&self) -> bool {
        matches!(
            self,
            ResolveError::UnknownEntity(_) | ResolveError::SchemaMismatch { .. }
        )
    }

    /// The entity and id of the missing record, for user-facing errors.
    pub fn missing(&self) -> Option<(EntityKind, RecordId)> {
        match self {
            ResolveError::NotFound { entity, id }
            | ResolveError::ReferenceNotFound { entity, id } => Some((*entity, *id)),
            _ => None,
        }
    }
}
