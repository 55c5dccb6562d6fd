//! The change-set envelope returned to the client.

use crate::cbor::{from_cbor, to_cbor};
use crate::entity::WireEntity;
use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized description of a committed flush.
///
/// Every mapping is keyed by the server's internal object id for the
/// entity. `temporary_uid_map` ties the object ids of newly persisted
/// entities back to the client's placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChangeSet {
    /// Inserted entities, identifiers populated.
    #[serde(default)]
    pub entity_insertions: BTreeMap<u32, WireEntity>,
    /// Updated entities.
    #[serde(default)]
    pub entity_updates: BTreeMap<u32, WireEntity>,
    /// Deleted entities, identifiers restored.
    #[serde(default)]
    pub entity_deletions: BTreeMap<u32, WireEntity>,
    /// Object id to temporary uid of each persisted entity.
    #[serde(default)]
    pub temporary_uid_map: BTreeMap<u32, String>,
}

impl WireChangeSet {
    /// Returns true if nothing was inserted, updated, or deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_insertions.is_empty()
            && self.entity_updates.is_empty()
            && self.entity_deletions.is_empty()
    }

    /// Finds the inserted entity that replaced a client placeholder.
    #[must_use]
    pub fn inserted_for_temporary_uid(&self, temporary_uid: &str) -> Option<&WireEntity> {
        self.temporary_uid_map
            .iter()
            .find(|(_, uid)| uid.as_str() == temporary_uid)
            .and_then(|(oid, _)| self.entity_insertions.get(oid))
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_temporary_uid() {
        let mut change_set = WireChangeSet::default();
        assert!(change_set.is_empty());

        change_set
            .entity_insertions
            .insert(4, WireEntity::new("Book").field("id", 11));
        change_set.temporary_uid_map.insert(4, "tmp1".into());

        let book = change_set.inserted_for_temporary_uid("tmp1").unwrap();
        assert_eq!(book.get("id"), Some(&crate::Value::Integer(11)));
        assert!(change_set.inserted_for_temporary_uid("tmp2").is_none());
        assert!(!change_set.is_empty());
    }

    #[test]
    fn decode_reads_encoded_change_set() {
        let mut change_set = WireChangeSet::default();
        change_set
            .entity_deletions
            .insert(2, WireEntity::new("Tag").field("code", "old"));
        let decoded = WireChangeSet::decode(&change_set.encode().unwrap()).unwrap();
        assert_eq!(decoded, change_set);
    }
}
