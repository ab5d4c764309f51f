//! Entity metadata registry.
//!
//! # Responsibility
//! - Hold every registered [`EntityDescriptor`] for lookup by entity name.
//! - Reject conflicting or malformed registrations at startup.
//!
//! # Invariants
//! - Re-registering an identical descriptor is a no-op.
//! - Re-registering a name with a different shape fails immediately.
//! - The registry is read-only once shared; lookups need no locking.

use super::{Entity, EntityDescriptor};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Lookup of a name that was never registered.
    UnmappedEntity(String),
    ConflictingDescriptor(String),
    DuplicateField { entity: String, field: String },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnmappedEntity(entity) => write!(f, "entity is not registered: {entity}"),
            Self::ConflictingDescriptor(entity) => write!(
                f,
                "entity `{entity}` is already registered with a different shape"
            ),
            Self::DuplicateField { entity, field } => {
                write!(f, "entity `{entity}` declares field `{field}` twice")
            }
        }
    }
}

impl Error for RegistryError {}

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entries: BTreeMap<String, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one descriptor.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> Result<(), RegistryError> {
        let mut seen = BTreeSet::new();
        for name in descriptor.names() {
            if !seen.insert(name) {
                return Err(RegistryError::DuplicateField {
                    entity: descriptor.name().to_string(),
                    field: name.to_string(),
                });
            }
        }

        if let Some(existing) = self.entries.get(descriptor.name()) {
            if existing.as_ref() == &descriptor {
                debug!(
                    "event=entity_register module=metadata status=skipped entity={}",
                    descriptor.name()
                );
                return Ok(());
            }
            return Err(RegistryError::ConflictingDescriptor(
                descriptor.name().to_string(),
            ));
        }

        info!(
            "event=entity_register module=metadata status=ok entity={} table={} fields={} associations={}",
            descriptor.name(),
            descriptor.table(),
            descriptor.fields().len(),
            descriptor.associations().len()
        );
        self.entries
            .insert(descriptor.name().to_string(), Arc::new(descriptor));
        Ok(())
    }

    /// Registers the descriptor declared by `E`.
    pub fn register_entity<E: Entity>(&mut self) -> Result<(), RegistryError> {
        let descriptor = E::descriptor();
        if descriptor.name() != E::NAME {
            return Err(RegistryError::ConflictingDescriptor(E::NAME.to_string()));
        }
        self.register(descriptor)
    }

    pub fn describe(&self, entity: &str) -> Result<&EntityDescriptor, RegistryError> {
        self.entries
            .get(entity)
            .map(Arc::as_ref)
            .ok_or_else(|| RegistryError::UnmappedEntity(entity.to_string()))
    }

    /// Shared handle used by query plans so they outlive registry borrows.
    pub(crate) fn describe_shared(
        &self,
        entity: &str,
    ) -> Result<Arc<EntityDescriptor>, RegistryError> {
        self.entries
            .get(entity)
            .cloned()
            .ok_or_else(|| RegistryError::UnmappedEntity(entity.to_string()))
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entries.contains_key(entity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered entity names, sorted.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}
