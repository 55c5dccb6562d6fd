//! Wire shape of a full entity.

use crate::cbor::{from_cbor, to_cbor};
use crate::error::{ProtocolError, ProtocolResult};
use crate::identity::DetachedEntity;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A complete entity as it travels between client and server.
///
/// Persist operations carry a CBOR-encoded `WireEntity`; the change-set
/// returned after a flush describes every touched entity in this shape.
/// Associations are expressed through detached references so the payload
/// never embeds another entity's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntity {
    /// Entity type name.
    pub entity_type: String,
    /// Scalar fields, identifier fields included.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Single-valued associations.
    #[serde(default)]
    pub references: BTreeMap<String, Option<DetachedEntity>>,
    /// Many-valued associations. Absent entries were not loaded.
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<DetachedEntity>>,
}

impl WireEntity {
    /// Creates an entity with no properties.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
            references: BTreeMap::new(),
            collections: BTreeMap::new(),
        }
    }

    /// Sets a scalar field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a single-valued association.
    #[must_use]
    pub fn reference(mut self, name: impl Into<String>, target: Option<DetachedEntity>) -> Self {
        self.references.insert(name.into(), target);
        self
    }

    /// Sets a many-valued association.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>, items: Vec<DetachedEntity>) -> Self {
        self.collections.insert(name.into(), items);
        self
    }

    /// Returns a scalar field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let entity: Self = from_cbor(bytes)?;
        if entity.entity_type.is_empty() {
            return Err(ProtocolError::invalid_structure(
                "entity payload has an empty entity type",
            ));
        }
        Ok(entity)
    }
}
