//! Entity metadata: descriptors, the `Entity` trait and the registry.
//!
//! # Responsibility
//! - Describe each entity's identifier, scalar fields and to-one links.
//! - Give Rust types a static bridge to their descriptor and records.
//!
//! # Invariants
//! - Descriptors are built once and never mutated after registration.
//! - Field, identifier and association names share one namespace per entity.

use crate::model::record::{FromRecord, Related};
use crate::model::value::{FieldType, Value};
use serde::{Deserialize, Serialize};

pub mod registry;

/// Identifier or scalar field mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub field_type: FieldType,
}

/// To-one association mapped by a foreign-key column on the owning table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationDescriptor {
    pub name: String,
    /// Target entity name as registered.
    pub target: String,
    pub foreign_key: String,
}

/// Where a field name resolves on a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRef<'a> {
    Id(&'a FieldDescriptor),
    Scalar(&'a FieldDescriptor),
    Association(&'a AssociationDescriptor),
}

impl FieldRef<'_> {
    /// Column holding the field's stored value (foreign key for associations).
    pub fn column(&self) -> &str {
        match self {
            Self::Id(field) | Self::Scalar(field) => field.column.as_str(),
            Self::Association(association) => association.foreign_key.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    id: FieldDescriptor,
    fields: Vec<FieldDescriptor>,
    associations: Vec<AssociationDescriptor>,
}

impl EntityDescriptor {
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            name: name.into(),
            table: table.into(),
            id: FieldDescriptor {
                name: "id".to_string(),
                column: "id".to_string(),
                field_type: FieldType::Integer,
            },
            fields: Vec::new(),
            associations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> &FieldDescriptor {
        &self.id
    }

    /// Scalar fields in declaration order, identifier excluded.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn associations(&self) -> &[AssociationDescriptor] {
        &self.associations
    }

    /// Looks up the identifier or a scalar field.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        if self.id.name == name {
            return Some(&self.id);
        }
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn association(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.associations
            .iter()
            .find(|association| association.name == name)
    }

    pub fn resolve(&self, name: &str) -> Option<FieldRef<'_>> {
        if self.id.name == name {
            return Some(FieldRef::Id(&self.id));
        }
        if let Some(field) = self.fields.iter().find(|field| field.name == name) {
            return Some(FieldRef::Scalar(field));
        }
        self.association(name).map(FieldRef::Association)
    }

    /// All names in declaration order: identifier, scalars, associations.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.name.as_str())
            .chain(self.fields.iter().map(|field| field.name.as_str()))
            .chain(
                self.associations
                    .iter()
                    .map(|association| association.name.as_str()),
            )
    }
}

/// Builder for [`EntityDescriptor`]. The identifier defaults to `id INTEGER`.
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    name: String,
    table: String,
    id: FieldDescriptor,
    fields: Vec<FieldDescriptor>,
    associations: Vec<AssociationDescriptor>,
}

impl EntityDescriptorBuilder {
    pub fn id(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        self.id = FieldDescriptor {
            name: name.into(),
            column: column.into(),
            field_type,
        };
        self
    }

    /// Adds a scalar field stored in a column of the same name.
    pub fn field(self, name: &str, field_type: FieldType) -> Self {
        self.field_with_column(name, name, field_type)
    }

    pub fn field_with_column(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            column: column.into(),
            field_type,
        });
        self
    }

    pub fn association(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.associations.push(AssociationDescriptor {
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
        });
        self
    }

    pub fn build(self) -> EntityDescriptor {
        EntityDescriptor {
            name: self.name,
            table: self.table,
            id: self.id,
            fields: self.fields,
            associations: self.associations,
        }
    }
}

/// Static bridge between a Rust type and its mapping.
///
/// Implementations are plain code; there is no reflection or derive step.
pub trait Entity: FromRecord {
    /// Registered entity name; unique per registry.
    const NAME: &'static str;

    fn descriptor() -> EntityDescriptor;

    /// Identifier value, `None` before the entity was first saved.
    fn id(&self) -> Option<Value>;

    /// Persisted values keyed by field name, identifier excluded.
    ///
    /// Associations contribute their foreign key (see [`Related::key`]).
    fn values(&self) -> Vec<(&'static str, Value)>;
}

impl<T: Entity> Related<T> {
    /// Foreign-key value to persist for this association.
    pub fn key(&self) -> Value {
        match self {
            Self::Unresolved(key) => key.clone(),
            Self::Loaded(Some(entity)) => entity.id().unwrap_or(Value::Null),
            Self::Loaded(None) => Value::Null,
        }
    }
}
