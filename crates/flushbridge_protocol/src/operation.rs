//! Client-described edit operations.

use crate::identity::DetachedEntity;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A new entity the client wants created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOperation {
    /// CBOR-encoded [`WireEntity`](crate::WireEntity); decoded by the
    /// deserialization walker, never by the envelope layer.
    pub entity: Vec<u8>,
    /// Client-local identifier of the entity until it is saved.
    pub temporary_uid: String,
}

impl PersistOperation {
    /// Creates a persist operation.
    pub fn new(entity: Vec<u8>, temporary_uid: impl Into<String>) -> Self {
        Self {
            entity,
            temporary_uid: temporary_uid.into(),
        }
    }
}

/// The new value of a single-valued property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    /// A scalar field value.
    Scalar(Value),
    /// A to-one association target; `None` unsets the association.
    Entity(Option<DetachedEntity>),
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        PropertyValue::Scalar(value)
    }
}

impl From<DetachedEntity> for PropertyValue {
    fn from(entity: DetachedEntity) -> Self {
        PropertyValue::Entity(Some(entity))
    }
}

/// A scalar field set or a to-one association set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyChangeOperation {
    /// The entity being changed.
    pub entity: DetachedEntity,
    /// Field or association name.
    pub property: String,
    /// The new value.
    pub value: PropertyValue,
}

impl PropertyChangeOperation {
    /// Creates a property change.
    pub fn new(
        entity: DetachedEntity,
        property: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self {
            entity,
            property: property.into(),
            value: value.into(),
        }
    }
}

/// Type of collection change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionChangeType {
    /// Add the items that are not members yet.
    Add,
    /// Remove the items that are members.
    Remove,
    /// Replace the whole membership with the items.
    Reset,
}

impl CollectionChangeType {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            CollectionChangeType::Add => 1,
            CollectionChangeType::Remove => 2,
            CollectionChangeType::Reset => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CollectionChangeType::Add),
            2 => Some(CollectionChangeType::Remove),
            3 => Some(CollectionChangeType::Reset),
            _ => None,
        }
    }
}

/// A mutation of a to-many association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionChangeOperation {
    /// The entity owning the collection.
    pub entity: DetachedEntity,
    /// Association name.
    pub property: String,
    /// Kind of change.
    #[serde(rename = "type")]
    pub change_type: CollectionChangeType,
    /// Entities added, removed, or forming the new membership.
    #[serde(default)]
    pub items: Vec<DetachedEntity>,
}

impl CollectionChangeOperation {
    /// Creates a collection change.
    pub fn new(
        entity: DetachedEntity,
        property: impl Into<String>,
        change_type: CollectionChangeType,
        items: Vec<DetachedEntity>,
    ) -> Self {
        Self {
            entity,
            property: property.into(),
            change_type,
            items,
        }
    }
}

/// A deletion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOperation {
    /// The entity to delete.
    pub entity: DetachedEntity,
}

impl RemoveOperation {
    /// Creates a remove operation.
    pub fn new(entity: DetachedEntity) -> Self {
        Self { entity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_change_type_codes() {
        assert_eq!(CollectionChangeType::Add.to_code(), 1);
        assert_eq!(CollectionChangeType::Remove.to_code(), 2);
        assert_eq!(CollectionChangeType::Reset.to_code(), 3);

        assert_eq!(
            CollectionChangeType::from_code(3),
            Some(CollectionChangeType::Reset)
        );
        assert_eq!(CollectionChangeType::from_code(0), None);
        assert_eq!(CollectionChangeType::from_code(4), None);
    }

    #[test]
    fn property_value_conversions() {
        let scalar: PropertyValue = Value::from("x").into();
        assert!(matches!(scalar, PropertyValue::Scalar(Value::Text(_))));

        let entity: PropertyValue = DetachedEntity::with_id("Author", "id", 1).into();
        assert!(matches!(entity, PropertyValue::Entity(Some(_))));
    }
}
