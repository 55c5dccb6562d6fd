//! Managed entity model.

use crate::schema::{AssociationSlot, ClassMetadata, FieldSlot};
use crate::types::Handle;
use flushbridge_protocol::{Identity, Value};
use std::sync::Arc;

/// Lifecycle of a tracked entity within a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Registered for insertion, not yet committed.
    New,
    /// Known to the store and tracked for changes.
    Managed,
    /// Registered for deletion, not yet committed.
    Removed,
    /// No longer tracked (deleted, or un-persisted before commit).
    Detached,
}

/// Membership of a to-many association.
///
/// A collection loaded from storage starts uninitialized: its members are
/// unknown until the store initializes it. Membership changes mark it dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentCollection {
    items: Vec<Handle>,
    initialized: bool,
    dirty: bool,
}

impl PersistentCollection {
    /// Creates an initialized collection.
    #[must_use]
    pub fn initialized(items: Vec<Handle>) -> Self {
        Self {
            items,
            initialized: true,
            dirty: false,
        }
    }

    /// Creates a collection whose members have not been loaded.
    #[must_use]
    pub fn uninitialized() -> Self {
        Self {
            items: Vec::new(),
            initialized: false,
            dirty: false,
        }
    }

    /// Returns true if the members are known.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns true if membership changed since load or last commit.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the members in insertion order.
    pub fn items(&self) -> &[Handle] {
        &self.items
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if there are no members.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if the handle is a member.
    pub fn contains(&self, handle: Handle) -> bool {
        self.items.contains(&handle)
    }

    /// Adds a member unless already present. Returns true if added.
    pub fn add(&mut self, handle: Handle) -> bool {
        if self.contains(handle) {
            return false;
        }
        self.items.push(handle);
        self.dirty = true;
        true
    }

    /// Removes a member if present. Returns true if removed.
    pub fn remove_element(&mut self, handle: Handle) -> bool {
        match self.items.iter().position(|h| *h == handle) {
            Some(pos) => {
                self.items.remove(pos);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.dirty = true;
        }
        self.items.clear();
    }

    /// Replaces the members with loaded state.
    pub(crate) fn load(&mut self, items: Vec<Handle>) {
        self.items = items;
        self.initialized = true;
        self.dirty = false;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Loaded state of an entity, in metadata slot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityData {
    fields: Vec<Value>,
    to_one: Vec<Option<Handle>>,
    to_many: Vec<PersistentCollection>,
}

impl EntityData {
    /// Creates entity state from slot-ordered parts.
    pub fn new(
        fields: Vec<Value>,
        to_one: Vec<Option<Handle>>,
        to_many: Vec<PersistentCollection>,
    ) -> Self {
        Self {
            fields,
            to_one,
            to_many,
        }
    }

    /// Returns a scalar field.
    pub fn field(&self, slot: FieldSlot) -> &Value {
        &self.fields[slot.index()]
    }

    /// Sets a scalar field.
    pub fn set_field(&mut self, slot: FieldSlot, value: Value) {
        self.fields[slot.index()] = value;
    }

    /// Returns a to-one target.
    pub fn to_one(&self, slot: AssociationSlot) -> Option<Handle> {
        self.to_one[slot.index()]
    }

    /// Sets or unsets a to-one target.
    pub fn set_to_one(&mut self, slot: AssociationSlot, target: Option<Handle>) {
        self.to_one[slot.index()] = target;
    }

    /// Returns a to-many collection.
    pub fn collection(&self, slot: AssociationSlot) -> &PersistentCollection {
        &self.to_many[slot.index()]
    }

    /// Returns a to-many collection for mutation.
    pub fn collection_mut(&mut self, slot: AssociationSlot) -> &mut PersistentCollection {
        &mut self.to_many[slot.index()]
    }

    /// Returns every scalar field in slot order.
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    /// Returns every to-one target in slot order.
    pub fn to_one_targets(&self) -> &[Option<Handle>] {
        &self.to_one
    }

    /// Returns every collection in slot order.
    pub fn collections(&self) -> &[PersistentCollection] {
        &self.to_many
    }

    pub(crate) fn collections_mut(&mut self) -> &mut [PersistentCollection] {
        &mut self.to_many
    }
}

/// Whether an entity's state has been materialized.
///
/// A `Reference` knows only its identity; it is enough to be the target of
/// an association but must be loaded before its own state is read or
/// changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityState {
    /// Fully materialized.
    Loaded(EntityData),
    /// Identity only.
    Reference(Identity),
}

/// An entity tracked by a store.
#[derive(Debug, Clone)]
pub struct ManagedEntity {
    metadata: Arc<ClassMetadata>,
    state: EntityState,
    lifecycle: Lifecycle,
}

impl ManagedEntity {
    /// Creates a tracked entity.
    pub fn new(metadata: Arc<ClassMetadata>, state: EntityState, lifecycle: Lifecycle) -> Self {
        Self {
            metadata,
            state,
            lifecycle,
        }
    }

    /// Returns the entity type name.
    pub fn entity_type(&self) -> &str {
        self.metadata.entity_type()
    }

    /// Returns the entity's metadata.
    pub fn metadata(&self) -> &Arc<ClassMetadata> {
        &self.metadata
    }

    /// Returns the materialization state.
    pub fn state(&self) -> &EntityState {
        &self.state
    }

    /// Returns true if the state is materialized.
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, EntityState::Loaded(_))
    }

    /// Returns the lifecycle.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Returns the current identity. Components may be null for new
    /// entities whose identifier is generated at commit.
    pub fn identity(&self) -> Identity {
        match &self.state {
            EntityState::Loaded(data) => self.metadata.identity_of(data.fields()),
            EntityState::Reference(identity) => identity.clone(),
        }
    }

    /// Returns the loaded state, if materialized.
    pub fn data(&self) -> Option<&EntityData> {
        match &self.state {
            EntityState::Loaded(data) => Some(data),
            EntityState::Reference(_) => None,
        }
    }

    /// Returns the loaded state for mutation, if materialized.
    pub fn data_mut(&mut self) -> Option<&mut EntityData> {
        match &mut self.state {
            EntityState::Loaded(data) => Some(data),
            EntityState::Reference(_) => None,
        }
    }

    pub(crate) fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyAccessor;

    fn tag_metadata() -> Arc<ClassMetadata> {
        Arc::new(
            ClassMetadata::builder("Tag")
                .id("code")
                .field("label")
                .to_many("aliases", "Tag")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn collection_add_is_idempotent() {
        let mut collection = PersistentCollection::initialized(vec![Handle::new(1)]);
        assert!(!collection.add(Handle::new(1)));
        assert!(!collection.is_dirty());
        assert!(collection.add(Handle::new(2)));
        assert_eq!(collection.len(), 2);
        assert!(collection.is_dirty());
    }

    #[test]
    fn collection_remove_absent_is_noop() {
        let mut collection = PersistentCollection::initialized(vec![Handle::new(1)]);
        assert!(!collection.remove_element(Handle::new(9)));
        assert!(!collection.is_dirty());
        assert!(collection.remove_element(Handle::new(1)));
        assert!(collection.is_empty());
    }

    #[test]
    fn clear_of_empty_collection_stays_clean() {
        let mut collection = PersistentCollection::initialized(Vec::new());
        collection.clear();
        assert!(!collection.is_dirty());
    }

    #[test]
    fn uninitialized_collection_loads() {
        let mut collection = PersistentCollection::uninitialized();
        assert!(!collection.is_initialized());
        collection.load(vec![Handle::new(3)]);
        assert!(collection.is_initialized());
        assert!(collection.contains(Handle::new(3)));
        assert!(!collection.is_dirty());
    }

    #[test]
    fn reference_has_no_data() {
        let identity = Identity::single("code", "rust");
        let mut entity = ManagedEntity::new(
            tag_metadata(),
            EntityState::Reference(identity.clone()),
            Lifecycle::Managed,
        );
        assert!(!entity.is_loaded());
        assert!(entity.data_mut().is_none());
        assert_eq!(entity.identity(), identity);
    }

    #[test]
    fn loaded_identity_follows_fields() {
        let metadata = tag_metadata();
        let mut data = metadata.new_entity_data();
        let Some(PropertyAccessor::Field(slot)) = metadata.classify("code") else {
            panic!("code is a field");
        };
        data.set_field(slot, Value::from("rust"));

        let entity = ManagedEntity::new(metadata, EntityState::Loaded(data), Lifecycle::New);
        assert_eq!(entity.identity(), Identity::single("code", "rust"));
        assert_eq!(entity.entity_type(), "Tag");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        proptest! {
            #[test]
            fn collection_behaves_as_set(
                ops in prop::collection::vec((any::<bool>(), 0u32..6), 0..24)
            ) {
                let mut collection = PersistentCollection::initialized(Vec::new());
                let mut model = BTreeSet::new();
                for (add, id) in ops {
                    let handle = Handle::new(id);
                    if add {
                        prop_assert_eq!(collection.add(handle), model.insert(id));
                    } else {
                        prop_assert_eq!(collection.remove_element(handle), model.remove(&id));
                    }
                }
                let mut items: Vec<u32> = collection.items().iter().map(|h| h.as_u32()).collect();
                items.sort_unstable();
                prop_assert_eq!(items, model.into_iter().collect::<Vec<_>>());
            }
        }
    }
}
