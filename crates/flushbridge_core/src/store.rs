//! The entity store contract.
//!
//! The flush engine never talks to storage directly. It consumes this
//! narrow contract: metadata lookup, identity-map and repository lookups,
//! staging of inserts and deletes, explicit loading, and a commit that
//! calls back into the engine before anything is written.

use crate::entity::{EntityData, EntityState, ManagedEntity};
use crate::error::StoreResult;
use crate::schema::{AssociationSlot, ClassMetadata};
use crate::types::Handle;
use flushbridge_protocol::{DetachedEntity, Identity, WireEntity};
use std::sync::Arc;

/// Callback invoked by [`EntityStore::commit`] after staged changes are
/// final and before they are written.
///
/// The hook only receives a read-only view, so it can inspect staged
/// changes but cannot stage more. Returning an error aborts the commit.
pub type CommitHook<'a> = dyn FnMut(&dyn UnitOfWork) -> StoreResult<()> + 'a;

/// The store's in-flight tracking state.
pub trait UnitOfWork {
    /// Looks up an entity already tracked under this identity.
    fn try_get_by_id(&self, entity_type: &str, identity: &Identity) -> Option<Handle>;

    /// Returns the identity of a managed entity as currently known.
    fn entity_identifier(&self, handle: Handle) -> StoreResult<Identity>;

    /// Entities staged for insertion, in staging order.
    fn scheduled_entity_insertions(&self) -> Vec<Handle>;

    /// Managed entities whose state differs from what was loaded.
    fn scheduled_entity_updates(&self) -> Vec<Handle>;

    /// Entities staged for deletion, in staging order.
    fn scheduled_entity_deletions(&self) -> Vec<Handle>;
}

/// An authoritative entity store with a unit of work.
///
/// A store session is not safe for concurrent mutation; callers sharing one
/// must serialize access (see [`Session`](crate::Session)).
pub trait EntityStore {
    /// Returns metadata for an entity type.
    fn class_metadata(&self, entity_type: &str) -> StoreResult<Arc<ClassMetadata>>;

    /// Returns the unit of work.
    fn unit_of_work(&self) -> &dyn UnitOfWork;

    /// Finds a stored entity by identity, registering it with the unit of
    /// work. May return an unloaded reference.
    fn find_one_by(&mut self, entity_type: &str, identity: &Identity)
        -> StoreResult<Option<Handle>>;

    /// Registers a new entity for insertion.
    fn persist(&mut self, entity_type: &str, data: EntityData) -> StoreResult<Handle>;

    /// Registers an entity for deletion.
    fn remove(&mut self, handle: Handle) -> StoreResult<()>;

    /// Returns true if the entity's state is materialized.
    fn is_loaded(&self, handle: Handle) -> StoreResult<bool>;

    /// Materializes an entity's state.
    fn force_load(&mut self, handle: Handle) -> StoreResult<()>;

    /// Returns a tracked entity.
    fn entity(&self, handle: Handle) -> StoreResult<&ManagedEntity>;

    /// Returns a tracked entity for mutation.
    fn entity_mut(&mut self, handle: Handle) -> StoreResult<&mut ManagedEntity>;

    /// Loads the members of a to-many collection, loading the owner first
    /// if needed. No-op when already initialized.
    fn initialize_collection(&mut self, handle: Handle, slot: AssociationSlot) -> StoreResult<()>;

    /// Commits every staged change atomically, calling `hook` first.
    fn commit(&mut self, hook: &mut CommitHook<'_>) -> StoreResult<()>;

    /// Drops every staged, uncommitted change from the unit of work.
    fn discard(&mut self);

    /// Ends the unit of work after a successful commit. Every tracked
    /// entity is detached and previously issued handles become invalid.
    fn close(&mut self);

    /// Renders a tracked entity in wire form.
    ///
    /// Associations become detached references carrying the targets'
    /// current identities. Uninitialized collections are left out.
    fn snapshot(&self, handle: Handle) -> StoreResult<WireEntity> {
        let entity = self.entity(handle)?;
        let metadata = entity.metadata();
        let mut wire = WireEntity::new(metadata.entity_type());

        let data = match entity.state() {
            EntityState::Loaded(data) => data,
            EntityState::Reference(identity) => {
                for (field, value) in identity.iter() {
                    wire.fields.insert(field.to_string(), value.clone());
                }
                return Ok(wire);
            }
        };

        for (mapping, value) in metadata.fields().iter().zip(data.fields()) {
            wire.fields.insert(mapping.name.clone(), value.clone());
        }
        for (mapping, target) in metadata
            .to_one_associations()
            .iter()
            .zip(data.to_one_targets())
        {
            let reference = match target {
                Some(target) => Some(detached_reference(self.entity(*target)?)),
                None => None,
            };
            wire.references.insert(mapping.name.clone(), reference);
        }
        for (mapping, collection) in metadata
            .to_many_associations()
            .iter()
            .zip(data.collections())
        {
            if !collection.is_initialized() {
                continue;
            }
            let items = collection
                .items()
                .iter()
                .map(|item| self.entity(*item).map(detached_reference))
                .collect::<StoreResult<Vec<_>>>()?;
            wire.collections.insert(mapping.name.clone(), items);
        }
        Ok(wire)
    }
}

fn detached_reference(entity: &ManagedEntity) -> DetachedEntity {
    DetachedEntity::from_identity(entity.entity_type(), &entity.identity())
}
