//! The change-set reconciliation engine.
//!
//! A [`FlushExecutor`] applies one [`FlushSet`] to an entity store:
//!
//! 1. Every property and collection change is checked against metadata
//!    before anything is staged.
//! 2. Phases run in a fixed order: persists, property changes, collection
//!    changes, removes. Later phases may reference entities introduced by
//!    earlier ones.
//! 3. The store commits. A commit hook captures the staged insertions,
//!    updates and deletions, plus the identifiers of deleted entities,
//!    before anything is written.
//! 4. The captured handles are rendered into a [`ChangeSet`], inserted
//!    entities carrying their generated identifiers and deleted entities
//!    their former ones.
//!
//! Any error aborts the whole flush and discards the store's staged state.
//! No partial change-set is ever returned. A successful flush closes the
//! unit of work once the change-set is rendered, so no managed state
//! carries over into the next flush.
//!
//! Phases run back to back without intermediate commits; the store's dirty
//! check only happens once, at commit.

use crate::change_set::ChangeSet;
use crate::config::FlushConfig;
use crate::entity::EntityData;
use crate::error::{FlushError, FlushResult, StoreError, StoreResult};
use crate::resolver::IdentityResolver;
use crate::schema::{AssociationSlot, ClassMetadata, PropertyAccessor};
use crate::stats::FlushStats;
use crate::store::{EntityStore, UnitOfWork};
use crate::types::Handle;
use crate::walker::DeserializationWalker;
use flushbridge_protocol::{
    CollectionChangeOperation, CollectionChangeType, DetachedEntity, FlushSet, Identity,
    PersistOperation, PropertyChangeOperation, PropertyValue, RemoveOperation,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the commit hook saw.
#[derive(Debug, Default)]
struct Captured {
    insertions: Vec<Handle>,
    updates: Vec<Handle>,
    deletions: Vec<Handle>,
    deletion_ids: BTreeMap<Handle, Identity>,
}

/// Applies flush sets to an entity store.
pub struct FlushExecutor<'a, S: EntityStore + ?Sized, W: DeserializationWalker + ?Sized> {
    store: &'a mut S,
    walker: &'a mut W,
    config: FlushConfig,
    resolver: IdentityResolver,
    temporary_uids: BTreeMap<Handle, String>,
    stats: FlushStats,
}

impl<'a, S, W> FlushExecutor<'a, S, W>
where
    S: EntityStore + ?Sized,
    W: DeserializationWalker + ?Sized,
{
    /// Creates an executor with the default configuration.
    pub fn new(store: &'a mut S, walker: &'a mut W) -> Self {
        Self {
            store,
            walker,
            config: FlushConfig::default(),
            resolver: IdentityResolver::new(),
            temporary_uids: BTreeMap::new(),
            stats: FlushStats::default(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: FlushConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the counters of the last flush.
    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    /// Applies a flush set and commits it.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` when an operation does not fit the schema
    /// - `EntityNotFound` when a reference matches no entity
    /// - `StoreCommit` when the store rejects the commit
    ///
    /// The store's unit of work ends with the call: it is closed on success
    /// and discarded on error.
    pub fn flush(&mut self, flush_set: FlushSet) -> FlushResult<ChangeSet> {
        self.resolver = IdentityResolver::new();
        self.temporary_uids.clear();
        self.stats = FlushStats::default();

        let operations = flush_set.len();
        if !self.config.admits(operations) {
            return Err(FlushError::invalid_operation(format!(
                "flush set holds {operations} operations, limit is {}",
                self.config.max_operations
            )));
        }
        self.validate(&flush_set)?;

        let result = self.execute(&flush_set);
        self.stats.resolver = self.resolver.stats();
        match result {
            Ok(change_set) => {
                self.store.close();
                info!(
                    operations,
                    inserted = change_set.entity_insertions.len(),
                    updated = change_set.entity_updates.len(),
                    deleted = change_set.entity_deletions.len(),
                    "flush committed"
                );
                Ok(change_set)
            }
            Err(err) => {
                self.store.discard();
                warn!(operations, error = %err, "flush aborted");
                Err(err)
            }
        }
    }

    fn execute(&mut self, flush_set: &FlushSet) -> FlushResult<ChangeSet> {
        debug!(count = flush_set.persists.len(), "persist phase");
        for op in &flush_set.persists {
            self.apply_persist(op)?;
        }
        debug!(count = flush_set.property_changes.len(), "property change phase");
        for op in &flush_set.property_changes {
            self.apply_property_change(op)?;
        }
        debug!(count = flush_set.collection_changes.len(), "collection change phase");
        for op in &flush_set.collection_changes {
            self.apply_collection_change(op)?;
        }
        debug!(count = flush_set.removes.len(), "remove phase");
        for op in &flush_set.removes {
            self.apply_remove(op)?;
        }

        let captured = self.commit()?;
        self.build_change_set(captured)
    }

    /// Checks every operation that can be checked without touching the
    /// store's state.
    fn validate(&self, flush_set: &FlushSet) -> FlushResult<()> {
        let mut uids = HashSet::new();
        for op in &flush_set.persists {
            if op.temporary_uid.is_empty() {
                return Err(FlushError::invalid_operation(
                    "persist operation without temporary uid",
                ));
            }
            if !uids.insert(op.temporary_uid.as_str()) {
                return Err(FlushError::invalid_operation(format!(
                    "temporary uid {} is used by more than one persist",
                    op.temporary_uid
                )));
            }
        }

        for op in &flush_set.property_changes {
            let metadata = self.metadata(&op.entity.entity_type)?;
            match (metadata.classify(&op.property), &op.value) {
                (None, _) => return Err(unknown_property(&metadata, &op.property)),
                (Some(PropertyAccessor::ToMany(_)), _) => {
                    return Err(FlushError::invalid_operation(format!(
                        "property change on to-many association {}.{}",
                        metadata.entity_type(),
                        op.property
                    )));
                }
                (Some(PropertyAccessor::Field(slot)), PropertyValue::Scalar(_)) => {
                    if metadata.is_identifier(slot) {
                        return Err(FlushError::invalid_operation(format!(
                            "identifier field {}.{} cannot be changed",
                            metadata.entity_type(),
                            op.property
                        )));
                    }
                }
                (Some(PropertyAccessor::ToOne(slot)), PropertyValue::Entity(target)) => {
                    if let Some(target) = target {
                        let target_type = &metadata.to_one(slot).target_type;
                        check_target(&metadata, target_type, &op.property, target)?;
                    }
                }
                (Some(PropertyAccessor::Field(_)), PropertyValue::Entity(_)) => {
                    return Err(FlushError::invalid_operation(format!(
                        "{}.{} is a field but was given an entity",
                        metadata.entity_type(),
                        op.property
                    )));
                }
                (Some(PropertyAccessor::ToOne(_)), PropertyValue::Scalar(_)) => {
                    return Err(FlushError::invalid_operation(format!(
                        "{}.{} is an association but was given a scalar",
                        metadata.entity_type(),
                        op.property
                    )));
                }
            }
        }

        for op in &flush_set.collection_changes {
            let metadata = self.metadata(&op.entity.entity_type)?;
            let slot = to_many_slot(&metadata, &op.property)?;
            let target_type = &metadata.to_many(slot).target_type;
            for item in &op.items {
                check_target(&metadata, target_type, &op.property, item)?;
            }
        }

        for op in &flush_set.removes {
            self.metadata(&op.entity.entity_type)?;
        }
        Ok(())
    }

    fn apply_persist(&mut self, op: &PersistOperation) -> FlushResult<()> {
        let wire = self.walker.walk(&op.entity)?;
        let metadata = self.metadata(&wire.entity_type)?;
        let mut data = metadata.new_entity_data();

        for (name, value) in &wire.fields {
            match metadata.classify(name) {
                Some(PropertyAccessor::Field(slot)) => data.set_field(slot, value.clone()),
                Some(_) => return Err(not_a_field(&metadata, name)),
                None => return Err(unknown_property(&metadata, name)),
            }
        }
        for (name, target) in &wire.references {
            let slot = match metadata.classify(name) {
                Some(PropertyAccessor::ToOne(slot)) => slot,
                Some(_) => return Err(not_a_to_one(&metadata, name)),
                None => return Err(unknown_property(&metadata, name)),
            };
            if let Some(target) = target {
                check_target(&metadata, &metadata.to_one(slot).target_type, name, target)?;
            }
            let target = self
                .resolver
                .resolve(&mut *self.store, target.as_ref(), false)?;
            data.set_to_one(slot, target);
        }
        for (name, items) in &wire.collections {
            let slot = to_many_slot(&metadata, name)?;
            for item in items {
                check_target(&metadata, &metadata.to_many(slot).target_type, name, item)?;
                let member = self.resolver.resolve_required(&mut *self.store, item, false)?;
                data.collection_mut(slot).add(member);
            }
        }

        let handle = self.store.persist(metadata.entity_type(), data)?;
        self.resolver
            .register_pending(metadata.entity_type(), &op.temporary_uid, handle)?;
        self.temporary_uids.insert(handle, op.temporary_uid.clone());
        self.stats.persists += 1;
        debug!(
            entity_type = metadata.entity_type(),
            temporary_uid = %op.temporary_uid,
            %handle,
            "persisted"
        );
        Ok(())
    }

    fn apply_property_change(&mut self, op: &PropertyChangeOperation) -> FlushResult<()> {
        let handle = self
            .resolver
            .resolve_required(&mut *self.store, &op.entity, true)?;
        let metadata = Arc::clone(self.store.entity(handle)?.metadata());

        match (metadata.classify(&op.property), &op.value) {
            (Some(PropertyAccessor::Field(slot)), PropertyValue::Scalar(value)) => {
                self.loaded_mut(handle)?.set_field(slot, value.clone());
            }
            (Some(PropertyAccessor::ToOne(slot)), PropertyValue::Entity(target)) => {
                let target = self
                    .resolver
                    .resolve(&mut *self.store, target.as_ref(), false)?;
                self.loaded_mut(handle)?.set_to_one(slot, target);
            }
            _ => {
                return Err(FlushError::invalid_operation(format!(
                    "property change on {}.{} does not fit its mapping",
                    metadata.entity_type(),
                    op.property
                )));
            }
        }
        self.stats.property_changes += 1;
        debug!(
            entity_type = metadata.entity_type(),
            property = %op.property,
            %handle,
            "property changed"
        );
        Ok(())
    }

    fn apply_collection_change(&mut self, op: &CollectionChangeOperation) -> FlushResult<()> {
        let handle = self
            .resolver
            .resolve_required(&mut *self.store, &op.entity, true)?;
        let metadata = Arc::clone(self.store.entity(handle)?.metadata());
        let slot = to_many_slot(&metadata, &op.property)?;

        // Membership tests need the current members.
        self.store.initialize_collection(handle, slot)?;

        let members = op
            .items
            .iter()
            .map(|item| {
                self.resolver
                    .resolve_required(&mut *self.store, item, false)
            })
            .collect::<FlushResult<Vec<_>>>()?;

        let collection = self.loaded_mut(handle)?.collection_mut(slot);
        match op.change_type {
            CollectionChangeType::Add => {
                for member in members {
                    collection.add(member);
                }
            }
            CollectionChangeType::Remove => {
                for member in members {
                    collection.remove_element(member);
                }
            }
            CollectionChangeType::Reset => {
                collection.clear();
                for member in members {
                    collection.add(member);
                }
            }
        }
        let size = collection.len();
        self.stats.collection_changes += 1;
        debug!(
            entity_type = metadata.entity_type(),
            property = %op.property,
            change = ?op.change_type,
            size,
            %handle,
            "collection changed"
        );
        Ok(())
    }

    fn apply_remove(&mut self, op: &RemoveOperation) -> FlushResult<()> {
        let handle = self
            .resolver
            .resolve_required(&mut *self.store, &op.entity, true)?;
        self.store.remove(handle)?;
        self.stats.removes += 1;
        debug!(entity_type = %op.entity.entity_type, %handle, "removed");
        Ok(())
    }

    fn commit(&mut self) -> FlushResult<Captured> {
        let capture_updates = self.config.capture_updates;
        let mut captured = Captured::default();
        self.store
            .commit(&mut |uow: &dyn UnitOfWork| -> StoreResult<()> {
                captured.insertions = uow.scheduled_entity_insertions();
                if capture_updates {
                    captured.updates = uow.scheduled_entity_updates();
                }
                captured.deletions = uow.scheduled_entity_deletions();
                for handle in &captured.deletions {
                    captured
                        .deletion_ids
                        .insert(*handle, uow.entity_identifier(*handle)?);
                }
                Ok(())
            })
            .map_err(FlushError::StoreCommit)?;
        Ok(captured)
    }

    fn build_change_set(&mut self, captured: Captured) -> FlushResult<ChangeSet> {
        let mut change_set = ChangeSet::default();

        for handle in captured.insertions {
            let mut entity = self.store.snapshot(handle)?;
            let identity = self.store.unit_of_work().entity_identifier(handle)?;
            for (field, value) in identity.iter() {
                entity.fields.insert(field.to_string(), value.clone());
            }
            change_set.entity_insertions.insert(handle, entity);
        }
        for handle in captured.updates {
            change_set
                .entity_updates
                .insert(handle, self.store.snapshot(handle)?);
        }
        for handle in captured.deletions {
            let mut entity = self.store.snapshot(handle)?;
            if let Some(identity) = captured.deletion_ids.get(&handle) {
                for (field, value) in identity.iter() {
                    entity.fields.insert(field.to_string(), value.clone());
                }
            }
            change_set.entity_deletions.insert(handle, entity);
        }

        // Entities persisted and removed within the flush were never inserted.
        let temporary_uids = std::mem::take(&mut self.temporary_uids);
        change_set.temporary_uid_map = temporary_uids
            .into_iter()
            .filter(|(handle, _)| change_set.entity_insertions.contains_key(handle))
            .collect();
        Ok(change_set)
    }

    fn metadata(&self, entity_type: &str) -> FlushResult<Arc<ClassMetadata>> {
        self.store
            .class_metadata(entity_type)
            .map_err(|err| match err {
                StoreError::UnknownEntityType { entity_type } => {
                    FlushError::invalid_operation(format!("unknown entity type {entity_type}"))
                }
                other => FlushError::Store(other),
            })
    }

    fn loaded_mut(&mut self, handle: Handle) -> FlushResult<&mut EntityData> {
        let entity = self.store.entity_mut(handle)?;
        let description = format!("{} {}", entity.entity_type(), entity.identity());
        entity
            .data_mut()
            .ok_or_else(|| FlushError::invalid_operation(format!("{description} is not loaded")))
    }
}

fn to_many_slot(metadata: &ClassMetadata, property: &str) -> FlushResult<AssociationSlot> {
    match metadata.classify(property) {
        Some(PropertyAccessor::ToMany(slot)) => Ok(slot),
        _ => Err(FlushError::invalid_operation(format!(
            "collection change on {}.{}, which is not a to-many association",
            metadata.entity_type(),
            property
        ))),
    }
}

fn check_target(
    metadata: &ClassMetadata,
    target_type: &str,
    property: &str,
    target: &DetachedEntity,
) -> FlushResult<()> {
    if target.entity_type == target_type {
        return Ok(());
    }
    Err(FlushError::invalid_operation(format!(
        "{}.{} expects {target_type}, got {}",
        metadata.entity_type(),
        property,
        target.entity_type
    )))
}

fn unknown_property(metadata: &ClassMetadata, property: &str) -> FlushError {
    FlushError::invalid_operation(format!(
        "{} has no property {property}",
        metadata.entity_type()
    ))
}

fn not_a_field(metadata: &ClassMetadata, property: &str) -> FlushError {
    FlushError::invalid_operation(format!(
        "{}.{property} is an association, not a field",
        metadata.entity_type()
    ))
}

fn not_a_to_one(metadata: &ClassMetadata, property: &str) -> FlushError {
    FlushError::invalid_operation(format!(
        "{}.{property} is not a to-one association",
        metadata.entity_type()
    ))
}
