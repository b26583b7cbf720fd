use serde::{Deserialize, Serialize};

use crate::attr::FieldValue;
use crate::record::RecordId;

/// One row of a many-to-many join table, keyed by (subject, attribute).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRecord {
    subject: RecordId,
    attribute: RecordId,
    payload: FieldValue,
}

impl JoinRecord {
    pub fn new(subject: RecordId, attribute: RecordId, payload: impl Into<FieldValue>) -> Self {
        Self {
            subject,
            attribute,
            payload: payload.into(),
        }
    }

    pub fn subject(&self) -> RecordId {
        self.subject
    }

    pub fn attribute(&self) -> RecordId {
        self.attribute
    }

    pub fn payload(&self) -> &FieldValue {
        &self.payload
    }

    pub fn into_payload(self) -> FieldValue {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_preserves_key_and_payload() {
        let row = JoinRecord::new(5, 2, false);

        assert_eq!(row.subject(), 5);
        assert_eq!(row.attribute(), 2);
        assert_eq!(row.payload(), &FieldValue::Boolean(false));
    }
}
