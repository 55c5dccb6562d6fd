//! The flush set envelope.

use crate::cbor::{from_cbor, to_cbor};
use crate::error::ProtocolResult;
use crate::operation::{
    CollectionChangeOperation, PersistOperation, PropertyChangeOperation, RemoveOperation,
};
use serde::{Deserialize, Serialize};

/// A batch of client edits, partitioned by operation type.
///
/// The four sequences are applied in a fixed order: persists, property
/// changes, collection changes, removes. Order within a sequence is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushSet {
    /// New entities.
    #[serde(default)]
    pub persists: Vec<PersistOperation>,
    /// Scalar and to-one changes.
    #[serde(default)]
    pub property_changes: Vec<PropertyChangeOperation>,
    /// To-many changes.
    #[serde(default)]
    pub collection_changes: Vec<CollectionChangeOperation>,
    /// Deletions.
    #[serde(default)]
    pub removes: Vec<RemoveOperation>,
}

impl FlushSet {
    /// Creates an empty flush set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a persist operation.
    #[must_use]
    pub fn with_persist(mut self, op: PersistOperation) -> Self {
        self.persists.push(op);
        self
    }

    /// Appends a property change.
    #[must_use]
    pub fn with_property_change(mut self, op: PropertyChangeOperation) -> Self {
        self.property_changes.push(op);
        self
    }

    /// Appends a collection change.
    #[must_use]
    pub fn with_collection_change(mut self, op: CollectionChangeOperation) -> Self {
        self.collection_changes.push(op);
        self
    }

    /// Appends a remove operation.
    #[must_use]
    pub fn with_remove(mut self, op: RemoveOperation) -> Self {
        self.removes.push(op);
        self
    }

    /// Returns the total number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.persists.len()
            + self.property_changes.len()
            + self.collection_changes.len()
            + self.removes.len()
    }

    /// Returns true if the flush set has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR bytes.
    ///
    /// An empty payload or a CBOR null decodes to an empty flush set.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let decoded: Option<Self> = from_cbor(bytes)?;
        Ok(decoded.unwrap_or_default())
    }
}
