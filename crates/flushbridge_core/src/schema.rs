//! Schema metadata and the field accessor.
//!
//! Entities keep their state in slot-ordered vectors. [`ClassMetadata`]
//! maps property names to slots once, so operations touch fields through a
//! typed [`PropertyAccessor`] instead of looking names up on the entity.

use crate::entity::{EntityData, PersistentCollection};
use crate::error::{StoreError, StoreResult};
use flushbridge_protocol::{Identity, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// How identifiers of new entities are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenerator {
    /// The client supplies every identifier component.
    Assigned,
    /// The store assigns the next integer of a per-type sequence.
    Sequence,
    /// The store assigns a random UUID (v4) as text.
    Uuid,
}

impl IdGenerator {
    /// Returns true if the store produces the identifier.
    pub fn is_generated(&self) -> bool {
        !matches!(self, IdGenerator::Assigned)
    }
}

/// A scalar field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    /// Field name.
    pub name: String,
    /// Whether null is an acceptable committed value.
    pub nullable: bool,
}

/// Cardinality of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    /// Single-valued.
    ToOne,
    /// Many-valued.
    ToMany,
}

/// An association to another entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationMapping {
    /// Association name.
    pub name: String,
    /// Target entity type.
    pub target_type: String,
    /// Cardinality.
    pub kind: AssociationKind,
}

/// Position of a scalar field in an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSlot(usize);

impl FieldSlot {
    /// Returns the slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Position of an association in an entity (per kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssociationSlot(usize);

impl AssociationSlot {
    /// Returns the slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Typed accessor for one property, resolved from metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAccessor {
    /// A scalar field.
    Field(FieldSlot),
    /// A single-valued association.
    ToOne(AssociationSlot),
    /// A many-valued association.
    ToMany(AssociationSlot),
}

impl PropertyAccessor {
    /// Returns true for many-valued associations.
    pub fn is_to_many(&self) -> bool {
        matches!(self, PropertyAccessor::ToMany(_))
    }
}

/// Metadata describing one entity type.
#[derive(Debug, Clone)]
pub struct ClassMetadata {
    entity_type: String,
    identifier: Vec<String>,
    identifier_slots: Vec<FieldSlot>,
    fields: Vec<FieldMapping>,
    to_one: Vec<AssociationMapping>,
    to_many: Vec<AssociationMapping>,
    properties: HashMap<String, PropertyAccessor>,
    id_generator: IdGenerator,
}

impl ClassMetadata {
    /// Starts building metadata for an entity type.
    pub fn builder(entity_type: impl Into<String>) -> ClassMetadataBuilder {
        ClassMetadataBuilder::new(entity_type)
    }

    /// Returns the entity type name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the identifier field names, in declaration order.
    pub fn identifier(&self) -> &[String] {
        &self.identifier
    }

    /// Returns the identifier field slots, in declaration order.
    pub fn identifier_slots(&self) -> &[FieldSlot] {
        &self.identifier_slots
    }

    /// Returns the identifier generation strategy.
    pub fn id_generator(&self) -> IdGenerator {
        self.id_generator
    }

    /// Returns every scalar field in slot order.
    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }

    /// Returns every to-one association in slot order.
    pub fn to_one_associations(&self) -> &[AssociationMapping] {
        &self.to_one
    }

    /// Returns every to-many association in slot order.
    pub fn to_many_associations(&self) -> &[AssociationMapping] {
        &self.to_many
    }

    /// Returns the field mapping at a slot.
    pub fn field(&self, slot: FieldSlot) -> &FieldMapping {
        &self.fields[slot.0]
    }

    /// Returns the to-one mapping at a slot.
    pub fn to_one(&self, slot: AssociationSlot) -> &AssociationMapping {
        &self.to_one[slot.0]
    }

    /// Returns the to-many mapping at a slot.
    pub fn to_many(&self, slot: AssociationSlot) -> &AssociationMapping {
        &self.to_many[slot.0]
    }

    /// Resolves a property name to its accessor.
    pub fn classify(&self, property: &str) -> Option<PropertyAccessor> {
        self.properties.get(property).copied()
    }

    /// Returns true if the slot holds an identifier component.
    pub fn is_identifier(&self, slot: FieldSlot) -> bool {
        self.identifier_slots.contains(&slot)
    }

    /// Reads the identity out of slot-ordered field values.
    pub fn identity_of(&self, fields: &[Value]) -> Identity {
        let mut identity = Identity::new();
        for (name, slot) in self.identifier.iter().zip(&self.identifier_slots) {
            identity.insert(name.clone(), fields[slot.0].clone());
        }
        identity
    }

    /// Reads the identity out of named field values.
    ///
    /// Returns `None` unless every identifier field is present and non-null.
    pub fn extract_identity(&self, fields: &BTreeMap<String, Value>) -> Option<Identity> {
        let mut identity = Identity::new();
        for name in &self.identifier {
            match fields.get(name) {
                Some(value) if !value.is_null() => identity.insert(name.clone(), value.clone()),
                _ => return None,
            }
        }
        Some(identity)
    }

    /// Returns true if the identity has exactly this type's identifier fields.
    pub fn matches_identifier(&self, identity: &Identity) -> bool {
        identity.len() == self.identifier.len()
            && self.identifier.iter().all(|name| identity.get(name).is_some())
    }

    /// Creates empty state for a new entity: null fields, unset
    /// references, initialized empty collections.
    pub fn new_entity_data(&self) -> EntityData {
        EntityData::new(
            vec![Value::Null; self.fields.len()],
            vec![None; self.to_one.len()],
            (0..self.to_many.len())
                .map(|_| PersistentCollection::initialized(Vec::new()))
                .collect(),
        )
    }
}

/// Builder for [`ClassMetadata`].
#[derive(Debug, Clone)]
pub struct ClassMetadataBuilder {
    entity_type: String,
    identifier: Vec<String>,
    fields: Vec<FieldMapping>,
    associations: Vec<AssociationMapping>,
    id_generator: IdGenerator,
}

impl ClassMetadataBuilder {
    fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            identifier: Vec::new(),
            fields: Vec::new(),
            associations: Vec::new(),
            id_generator: IdGenerator::Assigned,
        }
    }

    /// Declares a non-nullable identifier field.
    #[must_use]
    pub fn id(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.identifier.push(name.clone());
        self.fields.push(FieldMapping {
            name,
            nullable: false,
        });
        self
    }

    /// Declares a nullable scalar field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldMapping {
            name: name.into(),
            nullable: true,
        });
        self
    }

    /// Declares a non-nullable scalar field.
    #[must_use]
    pub fn required_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldMapping {
            name: name.into(),
            nullable: false,
        });
        self
    }

    /// Declares a single-valued association.
    #[must_use]
    pub fn to_one(mut self, name: impl Into<String>, target_type: impl Into<String>) -> Self {
        self.associations.push(AssociationMapping {
            name: name.into(),
            target_type: target_type.into(),
            kind: AssociationKind::ToOne,
        });
        self
    }

    /// Declares a many-valued association.
    #[must_use]
    pub fn to_many(mut self, name: impl Into<String>, target_type: impl Into<String>) -> Self {
        self.associations.push(AssociationMapping {
            name: name.into(),
            target_type: target_type.into(),
            kind: AssociationKind::ToMany,
        });
        self
    }

    /// Sets the identifier generation strategy.
    #[must_use]
    pub fn generator(mut self, id_generator: IdGenerator) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Validates and builds the metadata.
    pub fn build(self) -> StoreResult<ClassMetadata> {
        if self.entity_type.is_empty() {
            return Err(StoreError::invalid_schema("entity type name is empty"));
        }
        if self.identifier.is_empty() {
            return Err(StoreError::invalid_schema(format!(
                "{} declares no identifier",
                self.entity_type
            )));
        }
        if self.id_generator.is_generated() && self.identifier.len() != 1 {
            return Err(StoreError::invalid_schema(format!(
                "{} uses a generated identifier but declares {} identifier fields",
                self.entity_type,
                self.identifier.len()
            )));
        }

        let mut properties = HashMap::new();
        for (i, field) in self.fields.iter().enumerate() {
            if properties
                .insert(field.name.clone(), PropertyAccessor::Field(FieldSlot(i)))
                .is_some()
            {
                return Err(duplicate_property(&self.entity_type, &field.name));
            }
        }

        let mut to_one = Vec::new();
        let mut to_many = Vec::new();
        for association in self.associations {
            let accessor = match association.kind {
                AssociationKind::ToOne => {
                    to_one.push(association.clone());
                    PropertyAccessor::ToOne(AssociationSlot(to_one.len() - 1))
                }
                AssociationKind::ToMany => {
                    to_many.push(association.clone());
                    PropertyAccessor::ToMany(AssociationSlot(to_many.len() - 1))
                }
            };
            if properties.insert(association.name.clone(), accessor).is_some() {
                return Err(duplicate_property(&self.entity_type, &association.name));
            }
        }

        let identifier_slots = self
            .identifier
            .iter()
            .map(|name| match properties.get(name) {
                Some(PropertyAccessor::Field(slot)) => Ok(*slot),
                _ => Err(StoreError::invalid_schema(format!(
                    "{}: identifier {name} is not a scalar field",
                    self.entity_type
                ))),
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(ClassMetadata {
            entity_type: self.entity_type,
            identifier: self.identifier,
            identifier_slots,
            fields: self.fields,
            to_one,
            to_many,
            properties,
            id_generator: self.id_generator,
        })
    }
}

fn duplicate_property(entity_type: &str, name: &str) -> StoreError {
    StoreError::invalid_schema(format!("{entity_type}: property {name} declared twice"))
}

/// Registry of entity metadata by type name.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    classes: HashMap<String, Arc<ClassMetadata>>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers metadata, replacing any previous entry for the type.
    pub fn register(&mut self, metadata: ClassMetadata) {
        self.classes
            .insert(metadata.entity_type().to_string(), Arc::new(metadata));
    }

    /// Registers metadata (builder form).
    #[must_use]
    pub fn with(mut self, metadata: ClassMetadata) -> Self {
        self.register(metadata);
        self
    }

    /// Looks up metadata for a type.
    pub fn get(&self, entity_type: &str) -> StoreResult<Arc<ClassMetadata>> {
        self.classes
            .get(entity_type)
            .cloned()
            .ok_or_else(|| StoreError::unknown_entity_type(entity_type))
    }

    /// Checks that every association targets a registered type.
    pub fn validate(&self) -> StoreResult<()> {
        for metadata in self.classes.values() {
            let associations = metadata
                .to_one_associations()
                .iter()
                .chain(metadata.to_many_associations());
            for association in associations {
                if !self.classes.contains_key(&association.target_type) {
                    return Err(StoreError::invalid_schema(format!(
                        "{}.{} targets unknown type {}",
                        metadata.entity_type(),
                        association.name,
                        association.target_type
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if no type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
