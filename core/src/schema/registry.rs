use std::collections::{BTreeMap, HashMap, HashSet};

use common::attr::ScalarType;
use common::entity::{EntityKind, JoinTable};
use thiserror::Error;

use super::entity::{EntityDef, OutputField, ID_FIELD};
use crate::resolve::{ResolveError, ResolveResult};

/// Errors surfaced while building a [`Registry`]. Every one of these is a
/// schema defect caught before any request is served.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("entity {0} registered twice")]
    DuplicateEntity(EntityKind),
    #[error("join table {0} registered twice")]
    DuplicateJoin(JoinTable),
    #[error("{entity}.{field} does not follow the <entity>_id naming convention")]
    ReferenceNaming { entity: EntityKind, field: String },
    #[error("{entity} declares output field '{field}' more than once")]
    DuplicateField { entity: EntityKind, field: String },
    #[error("{entity}.{field} refers to unregistered entity {target}")]
    UnknownTarget {
        entity: EntityKind,
        field: String,
        target: EntityKind,
    },
    #[error("join table {table} refers to unregistered entity {entity}")]
    UnknownJoinEntity { table: JoinTable, entity: EntityKind },
    #[error("reference cycle: {}", display_path(.0))]
    Cycle(Vec<EntityKind>),
}

fn display_path(path: &[EntityKind]) -> String {
    path.iter()
        .map(|kind| kind.name())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Storage and output shape of one registered entity.
#[derive(Debug)]
pub struct RegistryEntry {
    definition: EntityDef,
    output: Vec<OutputField>,
}

impl RegistryEntry {
    /// The storage-record shape: scalar columns plus declared reference edges.
    pub fn definition(&self) -> &EntityDef {
        &self.definition
    }

    /// The output-document shape.
    pub fn output(&self) -> &[OutputField] {
        &self.output
    }
}

/// A join table: rows link a `subject` record to an `attribute` record and
/// carry a payload of type `payload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinDef {
    pub table: JoinTable,
    pub subject: EntityKind,
    pub attribute: EntityKind,
    pub payload: ScalarType,
}

/// Immutable mapping from entity kind to its shapes. Built once with
/// [`RegistryBuilder`] and shared read-only afterwards.
#[derive(Debug)]
pub struct Registry {
    entities: BTreeMap<EntityKind, RegistryEntry>,
    joins: BTreeMap<JoinTable, JoinDef>,
    order: Vec<EntityKind>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn lookup(&self, entity: EntityKind) -> ResolveResult<&RegistryEntry> {
        self.entities
            .get(&entity)
            .ok_or_else(|| ResolveError::UnknownEntity(entity.name().to_string()))
    }

    pub fn join(&self, table: JoinTable) -> ResolveResult<&JoinDef> {
        self.joins
            .get(&table)
            .ok_or_else(|| ResolveError::UnknownEntity(table.name().to_string()))
    }

    pub fn contains(&self, entity: EntityKind) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.entities.keys().copied()
    }

    /// Registered entities ordered so that every entity appears after all
    /// entities it references (leaves first).
    pub fn topological_order(&self) -> &[EntityKind] {
        &self.order
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityDef>,
    joins: Vec<JoinDef>,
}

impl RegistryBuilder {
    pub fn entity(mut self, definition: EntityDef) -> Self {
        self.entities.push(definition);
        self
    }

    pub fn join(
        mut self,
        table: JoinTable,
        subject: EntityKind,
        attribute: EntityKind,
        payload: ScalarType,
    ) -> Self {
        self.joins.push(JoinDef {
            table,
            subject,
            attribute,
            payload,
        });
        self
    }

    /// Validates every declaration and freezes the registry.
    pub fn build(self) -> RegistryResult<Registry> {
        let mut definitions = BTreeMap::new();
        for definition in self.entities {
            let kind = definition.kind();
            if definitions.insert(kind, definition).is_some() {
                return Err(RegistryError::DuplicateEntity(kind));
            }
        }

        for definition in definitions.values() {
            check_definition(definition, &definitions)?;
        }

        let mut joins = BTreeMap::new();
        for join in self.joins {
            for entity in [join.subject, join.attribute] {
                if !definitions.contains_key(&entity) {
                    return Err(RegistryError::UnknownJoinEntity {
                        table: join.table,
                        entity,
                    });
                }
            }
            if joins.insert(join.table, join).is_some() {
                return Err(RegistryError::DuplicateJoin(join.table));
            }
        }

        let order = topological_order(&definitions)?;

        let entities = definitions
            .into_iter()
            .map(|(kind, definition)| {
                let output = definition.output_shape();
                (kind, RegistryEntry { definition, output })
            })
            .collect();

        Ok(Registry {
            entities,
            joins,
            order,
        })
    }
}

fn check_definition(
    definition: &EntityDef,
    registered: &BTreeMap<EntityKind, EntityDef>,
) -> RegistryResult<()> {
    let entity = definition.kind();
    let mut names: HashSet<String> = HashSet::from([ID_FIELD.to_string()]);
    let mut claim = |name: &str| -> RegistryResult<()> {
        if names.insert(name.to_string()) {
            Ok(())
        } else {
            Err(RegistryError::DuplicateField {
                entity,
                field: name.to_string(),
            })
        }
    };

    for field in definition.fields() {
        claim(field.name())?;
    }

    for reference in definition.references() {
        let output = reference
            .output_name()
            .ok_or_else(|| RegistryError::ReferenceNaming {
                entity,
                field: reference.field().to_string(),
            })?;
        claim(output)?;
        if !registered.contains_key(&reference.target()) {
            return Err(RegistryError::UnknownTarget {
                entity,
                field: reference.field().to_string(),
                target: reference.target(),
            });
        }
    }

    for association in definition.association_defs() {
        claim(association.name())?;
        if !registered.contains_key(&association.attribute()) {
            return Err(RegistryError::UnknownTarget {
                entity,
                field: association.name().to_string(),
                target: association.attribute(),
            });
        }
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn topological_order(
    definitions: &BTreeMap<EntityKind, EntityDef>,
) -> RegistryResult<Vec<EntityKind>> {
    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    let mut order = Vec::with_capacity(definitions.len());
    for &kind in definitions.keys() {
        visit(kind, definitions, &mut marks, &mut stack, &mut order)?;
    }
    Ok(order)
}

fn visit(
    kind: EntityKind,
    definitions: &BTreeMap<EntityKind, EntityDef>,
    marks: &mut HashMap<EntityKind, Mark>,
    stack: &mut Vec<EntityKind>,
    order: &mut Vec<EntityKind>,
) -> RegistryResult<()> {
    match marks.get(&kind) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|k| *k == kind).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(kind);
            return Err(RegistryError::Cycle(cycle));
        }
        None => {}
    }

    marks.insert(kind, Mark::Visiting);
    stack.push(kind);
    if let Some(definition) = definitions.get(&kind) {
        for reference in definition.references() {
            visit(reference.target(), definitions, marks, stack, order)?;
        }
    }
    stack.pop();
    marks.insert(kind, Mark::Done);
    order.push(kind);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(kind: EntityKind) -> EntityDef {
        EntityDef::new(kind).field("name", ScalarType::String)
    }

    #[test]
    fn lookup_returns_entry_for_registered_entity() {
        let registry = Registry::builder()
            .entity(leaf(EntityKind::Factory))
            .build()
            .unwrap();

        let entry = registry.lookup(EntityKind::Factory).unwrap();
        assert_eq!(entry.definition().kind(), EntityKind::Factory);
        assert_eq!(entry.output().len(), 2);
    }

    #[test]
    fn lookup_of_unregistered_entity_is_unknown_entity() {
        let registry = Registry::builder().build().unwrap();

        match registry.lookup(EntityKind::Worker) {
            Err(ResolveError::UnknownEntity(name)) => assert_eq!(name, "worker"),
            other => panic!("unexpected lookup result: {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_entity() {
        let err = Registry::builder()
            .entity(leaf(EntityKind::Factory))
            .entity(leaf(EntityKind::Factory))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateEntity(EntityKind::Factory));
    }

    #[test]
    fn rejects_reference_without_id_suffix() {
        let err = Registry::builder()
            .entity(leaf(EntityKind::Factory))
            .entity(EntityDef::new(EntityKind::Incident).reference("factory", EntityKind::Factory))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::ReferenceNaming {
                entity: EntityKind::Incident,
                field: "factory".into()
            }
        );
    }

    #[test]
    fn rejects_reference_to_unregistered_target() {
        let err = Registry::builder()
            .entity(EntityDef::new(EntityKind::Incident).reference("factory_id", EntityKind::Factory))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::UnknownTarget {
                target: EntityKind::Factory,
                ..
            }
        ));
    }

    #[test]
    fn rejects_output_name_collision() {
        let err = Registry::builder()
            .entity(leaf(EntityKind::Factory))
            .entity(
                EntityDef::new(EntityKind::Incident)
                    .field("factory", ScalarType::String)
                    .reference("factory_id", EntityKind::Factory),
            )
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateField {
                entity: EntityKind::Incident,
                field: "factory".into()
            }
        );
    }

    #[test]
    fn rejects_field_named_id() {
        let err = Registry::builder()
            .entity(EntityDef::new(EntityKind::Factory).field("id", ScalarType::Integer))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateField { .. }));
    }

    #[test]
    fn rejects_cycles_and_names_the_path() {
        let err = Registry::builder()
            .entity(EntityDef::new(EntityKind::Factory).optional_reference("worker_id", EntityKind::Worker))
            .entity(EntityDef::new(EntityKind::Worker).reference("factory_id", EntityKind::Factory))
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::Cycle(vec![EntityKind::Factory, EntityKind::Worker, EntityKind::Factory])
        );
        assert_eq!(err.to_string(), "reference cycle: factory -> worker -> factory");
    }

    #[test]
    fn rejects_self_reference() {
        let err = Registry::builder()
            .entity(EntityDef::new(EntityKind::Incident).optional_reference("incident_id", EntityKind::Incident))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::Cycle(vec![EntityKind::Incident, EntityKind::Incident])
        );
    }

    #[test]
    fn topological_order_places_leaves_first() {
        let registry = Registry::builder()
            .entity(
                EntityDef::new(EntityKind::Incident)
                    .reference("factory_id", EntityKind::Factory)
                    .reference("worker_id", EntityKind::Worker),
            )
            .entity(EntityDef::new(EntityKind::Worker).reference("ageRange_id", EntityKind::AgeRange))
            .entity(leaf(EntityKind::AgeRange))
            .entity(leaf(EntityKind::Factory))
            .build()
            .unwrap();

        let order = registry.topological_order();
        let position = |kind| order.iter().position(|k| *k == kind).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(EntityKind::Factory) < position(EntityKind::Incident));
        assert!(position(EntityKind::AgeRange) < position(EntityKind::Worker));
        assert!(position(EntityKind::Worker) < position(EntityKind::Incident));
    }

    #[test]
    fn join_requires_registered_entities() {
        let err = Registry::builder()
            .entity(leaf(EntityKind::CheckQuestion))
            .join(
                JoinTable::IncidentCheckAnswer,
                EntityKind::Incident,
                EntityKind::CheckQuestion,
                ScalarType::Boolean,
            )
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownJoinEntity {
                table: JoinTable::IncidentCheckAnswer,
                entity: EntityKind::Incident
            }
        );
    }
}
