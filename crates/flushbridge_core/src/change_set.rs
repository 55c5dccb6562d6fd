//! The result of a flush.

use crate::types::Handle;
use flushbridge_protocol::{WireChangeSet, WireEntity};
use std::collections::BTreeMap;

/// What a committed flush inserted, updated, and deleted.
///
/// Entities are keyed by the handle the store assigned them. Inserted
/// entities carry their generated identifiers; deleted entities carry the
/// identifiers they had before deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Inserted entities.
    pub entity_insertions: BTreeMap<Handle, WireEntity>,
    /// Updated entities.
    pub entity_updates: BTreeMap<Handle, WireEntity>,
    /// Deleted entities.
    pub entity_deletions: BTreeMap<Handle, WireEntity>,
    /// Temporary uid of every entity persisted by the flush.
    pub temporary_uid_map: BTreeMap<Handle, String>,
}

impl ChangeSet {
    /// Returns true if nothing was inserted, updated, or deleted.
    pub fn is_empty(&self) -> bool {
        self.entity_insertions.is_empty()
            && self.entity_updates.is_empty()
            && self.entity_deletions.is_empty()
    }

    /// Returns the handle persisted under a temporary uid.
    pub fn handle_for_temporary_uid(&self, temporary_uid: &str) -> Option<Handle> {
        self.temporary_uid_map
            .iter()
            .find(|(_, uid)| uid.as_str() == temporary_uid)
            .map(|(handle, _)| *handle)
    }

    /// Returns the inserted entity that replaced a client placeholder.
    pub fn inserted_for_temporary_uid(&self, temporary_uid: &str) -> Option<&WireEntity> {
        self.handle_for_temporary_uid(temporary_uid)
            .and_then(|handle| self.entity_insertions.get(&handle))
    }

    /// Converts to the wire envelope.
    pub fn to_wire(&self) -> WireChangeSet {
        self.clone().into_wire()
    }

    /// Converts to the wire envelope, consuming the change-set.
    pub fn into_wire(self) -> WireChangeSet {
        fn rekey<V>(map: BTreeMap<Handle, V>) -> BTreeMap<u32, V> {
            map.into_iter().map(|(h, v)| (h.as_u32(), v)).collect()
        }
        WireChangeSet {
            entity_insertions: rekey(self.entity_insertions),
            entity_updates: rekey(self.entity_updates),
            entity_deletions: rekey(self.entity_deletions),
            temporary_uid_map: rekey(self.temporary_uid_map),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_uid_lookup() {
        let mut change_set = ChangeSet::default();
        assert!(change_set.is_empty());

        let author = WireEntity::new("Author").field("id", 7).field("name", "Butler");
        change_set.entity_insertions.insert(Handle::new(4), author.clone());
        change_set
            .temporary_uid_map
            .insert(Handle::new(4), "tmp-a".to_string());

        assert!(!change_set.is_empty());
        assert_eq!(change_set.handle_for_temporary_uid("tmp-a"), Some(Handle::new(4)));
        assert_eq!(change_set.inserted_for_temporary_uid("tmp-a"), Some(&author));
        assert_eq!(change_set.inserted_for_temporary_uid("tmp-b"), None);
    }

    #[test]
    fn wire_form_is_keyed_by_raw_handle() {
        let mut change_set = ChangeSet::default();
        change_set
            .entity_deletions
            .insert(Handle::new(9), WireEntity::new("Tag").field("code", "old"));
        change_set
            .temporary_uid_map
            .insert(Handle::new(2), "tmp".to_string());

        let wire = change_set.to_wire();
        assert!(wire.entity_deletions.contains_key(&9));
        assert_eq!(wire.temporary_uid_map.get(&2).map(String::as_str), Some("tmp"));
        assert!(wire.entity_insertions.is_empty());
    }
}
