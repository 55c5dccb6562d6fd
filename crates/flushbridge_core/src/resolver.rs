//! Identity resolution.
//!
//! Detached references from the client are never used directly. The
//! resolver maps each one to the store's managed instance, checking, in
//! order: entities persisted earlier in the same flush (by temporary uid),
//! the unit of work's identity map, and finally a repository lookup.
//! Because the store registers every lookup result in its identity map,
//! resolving the same reference twice yields the same handle.

use crate::error::{FlushError, FlushResult, StoreError};
use crate::stats::ResolverStats;
use crate::store::EntityStore;
use crate::types::Handle;
use flushbridge_protocol::DetachedEntity;
use std::collections::HashMap;
use tracing::trace;

/// Resolves detached references to managed entities for one flush.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    pending: HashMap<(String, String), Handle>,
    stats: ResolverStats,
}

impl IdentityResolver {
    /// Creates a resolver with no pending entities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes an entity persisted in this flush addressable by its
    /// temporary uid.
    pub fn register_pending(
        &mut self,
        entity_type: &str,
        temporary_uid: &str,
        handle: Handle,
    ) -> FlushResult<()> {
        let key = (entity_type.to_string(), temporary_uid.to_string());
        if self.pending.contains_key(&key) {
            return Err(FlushError::invalid_operation(format!(
                "temporary uid {temporary_uid} is used by more than one {entity_type}"
            )));
        }
        self.pending.insert(key, handle);
        Ok(())
    }

    /// Returns the entity persisted under a temporary uid, if any.
    pub fn pending(&self, entity_type: &str, temporary_uid: &str) -> Option<Handle> {
        self.pending
            .get(&(entity_type.to_string(), temporary_uid.to_string()))
            .copied()
    }

    /// Returns the resolution counters.
    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    /// Resolves a detached reference.
    ///
    /// `None` resolves to `None`. With `force_load` the returned entity is
    /// materialized; otherwise it may still be a reference placeholder.
    ///
    /// # Errors
    ///
    /// `EntityNotFound` if nothing matches, `InvalidOperation` if the
    /// reference carries neither a complete identifier nor a temporary uid.
    pub fn resolve<S: EntityStore + ?Sized>(
        &mut self,
        store: &mut S,
        detached: Option<&DetachedEntity>,
        force_load: bool,
    ) -> FlushResult<Option<Handle>> {
        let Some(detached) = detached else {
            return Ok(None);
        };
        let handle = self.locate(store, detached)?;

        if force_load && !store.is_loaded(handle)? {
            store.force_load(handle).map_err(|err| match err {
                StoreError::MissingRow {
                    entity_type,
                    identity,
                } => FlushError::EntityNotFound {
                    entity_type,
                    identity,
                },
                other => FlushError::Store(other),
            })?;
            self.stats.forced_loads += 1;
        }
        Ok(Some(handle))
    }

    /// Resolves a reference that must name an entity.
    pub fn resolve_required<S: EntityStore + ?Sized>(
        &mut self,
        store: &mut S,
        detached: &DetachedEntity,
        force_load: bool,
    ) -> FlushResult<Handle> {
        self.resolve(store, Some(detached), force_load)?
            .ok_or_else(|| FlushError::entity_not_found(&detached.entity_type, "none"))
    }

    fn locate<S: EntityStore + ?Sized>(
        &mut self,
        store: &mut S,
        detached: &DetachedEntity,
    ) -> FlushResult<Handle> {
        let entity_type = detached.entity_type.as_str();

        if let Some(uid) = &detached.temporary_uid {
            if let Some(handle) = self.pending(entity_type, uid) {
                self.stats.pending_hits += 1;
                trace!(entity_type, temporary_uid = %uid, %handle, "resolved pending entity");
                return Ok(handle);
            }
        }

        let metadata = store.class_metadata(entity_type)?;
        let Some(identity) = metadata.extract_identity(&detached.fields) else {
            return Err(match &detached.temporary_uid {
                Some(uid) => {
                    FlushError::entity_not_found(entity_type, format!("temporary uid {uid}"))
                }
                None => FlushError::invalid_operation(format!(
                    "reference to {entity_type} carries no identifier"
                )),
            });
        };

        if let Some(handle) = store.unit_of_work().try_get_by_id(entity_type, &identity) {
            self.stats.identity_map_hits += 1;
            trace!(entity_type, %identity, %handle, "resolved from identity map");
            return Ok(handle);
        }

        match store.find_one_by(entity_type, &identity)? {
            Some(handle) => {
                self.stats.store_lookups += 1;
                trace!(entity_type, %identity, %handle, "resolved by lookup");
                Ok(handle)
            }
            None => Err(FlushError::entity_not_found(entity_type, identity.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::library_store;
    use flushbridge_protocol::Identity;

    #[test]
    fn none_resolves_to_none() {
        let mut store = library_store();
        let mut resolver = IdentityResolver::new();
        assert_eq!(resolver.resolve(&mut store, None, true).unwrap(), None);
    }

    #[test]
    fn same_reference_resolves_to_same_handle() {
        let mut store = library_store();
        let mut resolver = IdentityResolver::new();
        let book = DetachedEntity::with_id("Book", "id", 1);

        let first = resolver.resolve_required(&mut store, &book, false).unwrap();
        let second = resolver.resolve_required(&mut store, &book, true).unwrap();

        assert_eq!(first, second);
        assert_eq!(resolver.stats().store_lookups, 1);
        assert_eq!(resolver.stats().identity_map_hits, 1);
        assert_eq!(resolver.stats().forced_loads, 1);
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn without_force_load_reference_stays_unloaded() {
        let mut store = library_store();
        let mut resolver = IdentityResolver::new();
        let author = DetachedEntity::with_id("Author", "id", 2);

        let handle = resolver.resolve_required(&mut store, &author, false).unwrap();
        assert!(!store.is_loaded(handle).unwrap());
        assert_eq!(store.load_count(), 0);
    }

    #[test]
    fn composite_identity_lookup() {
        let mut store = library_store();
        let mut resolver = IdentityResolver::new();
        let line = DetachedEntity::new("OrderLine")
            .field("order", 100)
            .field("line", 2);

        let handle = resolver.resolve_required(&mut store, &line, true).unwrap();
        let identity = store.unit_of_work().entity_identifier(handle).unwrap();
        assert_eq!(
            identity,
            Identity::from_pairs([("order", 100), ("line", 2)])
        );
    }

    #[test]
    fn unknown_identity_is_not_found() {
        let mut store = library_store();
        let mut resolver = IdentityResolver::new();
        let missing = DetachedEntity::with_id("Book", "id", 404);

        let err = resolver.resolve(&mut store, Some(&missing), true).unwrap_err();
        assert!(matches!(err, FlushError::EntityNotFound { .. }));
        assert!(err.to_string().contains("Book"));
    }

    #[test]
    fn partial_composite_identity_is_invalid() {
        let mut store = library_store();
        let mut resolver = IdentityResolver::new();
        let partial = DetachedEntity::new("OrderLine").field("order", 100);

        let err = resolver.resolve(&mut store, Some(&partial), false).unwrap_err();
        assert!(matches!(err, FlushError::InvalidOperation { .. }));
    }

    #[test]
    fn pending_entities_resolve_by_temporary_uid() {
        let mut store = library_store();
        let mut resolver = IdentityResolver::new();
        let meta = store.class_metadata("Tag").unwrap();
        let handle = store.persist("Tag", meta.new_entity_data()).unwrap();
        resolver.register_pending("Tag", "tmp-1", handle).unwrap();

        let reference = DetachedEntity::pending("Tag", "tmp-1");
        assert_eq!(
            resolver.resolve_required(&mut store, &reference, true).unwrap(),
            handle
        );
        assert_eq!(resolver.stats().pending_hits, 1);

        let unknown = DetachedEntity::pending("Tag", "tmp-2");
        assert!(matches!(
            resolver.resolve(&mut store, Some(&unknown), false),
            Err(FlushError::EntityNotFound { .. })
        ));
        assert!(resolver.register_pending("Tag", "tmp-1", handle).is_err());
    }

    #[test]
    fn dangling_reference_is_not_found_on_load() {
        let mut store = library_store();
        let mut resolver = IdentityResolver::new();
        // Book 3 points at an author row that was never written.
        let book = DetachedEntity::with_id("Book", "id", 3);
        let handle = resolver.resolve_required(&mut store, &book, true).unwrap();
        let meta = store.class_metadata("Book").unwrap();
        let author_slot = crate::test_support::slot_of_one(&meta, "author");
        let author = store
            .entity(handle)
            .unwrap()
            .data()
            .unwrap()
            .to_one(author_slot)
            .unwrap();
        let author_ref =
            DetachedEntity::from_identity("Author", &store.entity(author).unwrap().identity());

        let err = resolver
            .resolve(&mut store, Some(&author_ref), true)
            .unwrap_err();
        assert!(matches!(err, FlushError::EntityNotFound { .. }));
    }
}
