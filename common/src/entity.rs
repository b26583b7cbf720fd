//! The closed set of entity kinds and join tables known to the system.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every kind of record the incident backend stores.
///
/// The wire name (`name()`) is the camel-cased form used in reference field
/// names, so `factory_id` points at `EntityKind::Factory` and `ageRange_id`
/// at `EntityKind::AgeRange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Factory,
    ThreatType,
    AgeRange,
    WorkExperienceRange,
    CheckQuestion,
    Worker,
    Incident,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Factory,
        EntityKind::ThreatType,
        EntityKind::AgeRange,
        EntityKind::WorkExperienceRange,
        EntityKind::CheckQuestion,
        EntityKind::Worker,
        EntityKind::Incident,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Factory => "factory",
            EntityKind::ThreatType => "threatType",
            EntityKind::AgeRange => "ageRange",
            EntityKind::WorkExperienceRange => "workExperienceRange",
            EntityKind::CheckQuestion => "checkQuestion",
            EntityKind::Worker => "worker",
            EntityKind::Incident => "incident",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown name '{0}'")]
pub struct UnknownName(pub String);

impl FromStr for EntityKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// Many-to-many association tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinTable {
    /// An incident's answers to the fixed safety checklist.
    IncidentCheckAnswer,
}

impl JoinTable {
    pub const ALL: [JoinTable; 1] = [JoinTable::IncidentCheckAnswer];

    pub fn name(self) -> &'static str {
        match self {
            JoinTable::IncidentCheckAnswer => "incidentCheckAnswer",
        }
    }
}

impl fmt::Display for JoinTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JoinTable {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JoinTable::ALL
            .into_iter()
            .find(|table| table.name() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.name().parse::<EntityKind>(), Ok(kind));
        }
        for table in JoinTable::ALL {
            assert_eq!(table.name().parse::<JoinTable>(), Ok(table));
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "warehouse".parse::<EntityKind>().unwrap_err();
        assert_eq!(err, UnknownName("warehouse".into()));
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&EntityKind::WorkExperienceRange).unwrap();
        assert_eq!(json, "\"workExperienceRange\"");
    }
}
