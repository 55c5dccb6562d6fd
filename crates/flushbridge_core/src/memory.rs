//! In-memory entity store.
//!
//! `MemoryStore` keeps committed rows in per-type tables and tracks
//! entities in an arena indexed by [`Handle`]. It implements the full
//! store contract, including lazy references, dirty checking and an
//! all-or-nothing commit, and is what the engine's tests run against.

use crate::entity::{EntityData, EntityState, Lifecycle, ManagedEntity, PersistentCollection};
use crate::error::{StoreError, StoreResult};
use crate::schema::{AssociationSlot, ClassMetadata, IdGenerator, PropertyAccessor, Schema};
use crate::store::{CommitHook, EntityStore, UnitOfWork};
use crate::types::Handle;
use flushbridge_protocol::{DetachedEntity, Identity, Value, WireEntity};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A committed row. Associations are stored by target identity.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredRow {
    fields: Vec<Value>,
    to_one: Vec<Option<Identity>>,
    to_many: Vec<Vec<Identity>>,
}

/// State of an entity as last loaded or committed, for dirty checking.
#[derive(Debug, Clone)]
struct Original {
    identity: Identity,
    fields: Vec<Value>,
    to_one: Vec<Option<Handle>>,
}

#[derive(Debug)]
struct Tracked {
    entity: ManagedEntity,
    original: Option<Original>,
}

impl Tracked {
    fn is_dirty(&self) -> bool {
        match (self.entity.data(), &self.original) {
            (Some(data), Some(original)) => {
                data.fields() != original.fields.as_slice()
                    || data.to_one_targets() != original.to_one.as_slice()
                    || data.collections().iter().any(PersistentCollection::is_dirty)
            }
            _ => false,
        }
    }

    /// Identity of the stored row backing this entity, if any.
    fn stored_identity(&self) -> Identity {
        match &self.original {
            Some(original) => original.identity.clone(),
            None => self.entity.identity(),
        }
    }
}

struct RowWrite {
    handle: Handle,
    entity_type: String,
    identity: Identity,
    row: StoredRow,
}

struct CommitPlan {
    sequences: HashMap<String, i64>,
    assigned: HashMap<Handle, Identity>,
    deletes: Vec<(Handle, String, Identity)>,
    writes: Vec<RowWrite>,
}

/// An entity store held entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    schema: Schema,
    tables: HashMap<String, BTreeMap<Identity, StoredRow>>,
    arena: Vec<Tracked>,
    identity_map: HashMap<(String, Identity), Handle>,
    insertions: Vec<Handle>,
    deletions: Vec<Handle>,
    sequences: HashMap<String, i64>,
    available: bool,
    load_count: u64,
    commit_count: u64,
}

impl MemoryStore {
    /// Creates an empty store for a schema.
    pub fn new(schema: Schema) -> StoreResult<Self> {
        schema.validate()?;
        Ok(Self {
            schema,
            tables: HashMap::new(),
            arena: Vec::new(),
            identity_map: HashMap::new(),
            insertions: Vec::new(),
            deletions: Vec::new(),
            sequences: HashMap::new(),
            available: true,
            load_count: 0,
            commit_count: 0,
        })
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Writes a committed row directly, bypassing the unit of work.
    ///
    /// Missing generated identifiers are assigned. Returns the row's identity.
    pub fn seed(&mut self, entity: WireEntity) -> StoreResult<Identity> {
        let metadata = self.schema.get(&entity.entity_type)?;

        let mut fields = vec![Value::Null; metadata.fields().len()];
        for (name, value) in &entity.fields {
            match metadata.classify(name) {
                Some(PropertyAccessor::Field(slot)) => fields[slot.index()] = value.clone(),
                _ => return Err(not_a(&metadata, name, "field")),
            }
        }
        let mut identity = metadata.identity_of(&fields);
        if identity.is_complete() {
            bump_sequence(&mut self.sequences, &metadata, &identity);
        } else {
            let value = next_identifier(&mut self.sequences, &metadata, &identity)?;
            let slot = metadata.identifier_slots()[0];
            fields[slot.index()] = value;
            identity = metadata.identity_of(&fields);
        }

        let mut to_one = vec![None; metadata.to_one_associations().len()];
        for (name, target) in &entity.references {
            let Some(PropertyAccessor::ToOne(slot)) = metadata.classify(name) else {
                return Err(not_a(&metadata, name, "to-one association"));
            };
            if let Some(target) = target {
                to_one[slot.index()] = Some(self.detached_identity(target)?);
            }
        }

        let mut to_many = vec![Vec::new(); metadata.to_many_associations().len()];
        for (name, items) in &entity.collections {
            let Some(PropertyAccessor::ToMany(slot)) = metadata.classify(name) else {
                return Err(not_a(&metadata, name, "to-many association"));
            };
            to_many[slot.index()] = items
                .iter()
                .map(|item| self.detached_identity(item))
                .collect::<StoreResult<_>>()?;
        }

        self.tables
            .entry(metadata.entity_type().to_string())
            .or_default()
            .insert(
                identity.clone(),
                StoredRow {
                    fields,
                    to_one,
                    to_many,
                },
            );
        Ok(identity)
    }

    /// Reads a committed row.
    pub fn row(&self, entity_type: &str, identity: &Identity) -> Option<WireEntity> {
        let metadata = self.schema.get(entity_type).ok()?;
        let row = self.tables.get(entity_type)?.get(identity)?;

        let mut wire = WireEntity::new(entity_type);
        for (mapping, value) in metadata.fields().iter().zip(&row.fields) {
            wire.fields.insert(mapping.name.clone(), value.clone());
        }
        for (mapping, target) in metadata.to_one_associations().iter().zip(&row.to_one) {
            let reference = target
                .as_ref()
                .map(|identity| DetachedEntity::from_identity(&mapping.target_type, identity));
            wire.references.insert(mapping.name.clone(), reference);
        }
        for (mapping, items) in metadata.to_many_associations().iter().zip(&row.to_many) {
            let items = items
                .iter()
                .map(|identity| DetachedEntity::from_identity(&mapping.target_type, identity))
                .collect();
            wire.collections.insert(mapping.name.clone(), items);
        }
        Some(wire)
    }

    /// Returns the number of committed rows of a type.
    pub fn count(&self, entity_type: &str) -> usize {
        self.tables.get(entity_type).map_or(0, BTreeMap::len)
    }

    /// Detaches every tracked entity. Committed rows are untouched and
    /// previously issued handles become invalid.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.identity_map.clear();
        self.insertions.clear();
        self.deletions.clear();
    }

    /// Simulates loss (or recovery) of connectivity.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Returns how many entities have been materialized from rows.
    pub fn load_count(&self) -> u64 {
        self.load_count
    }

    /// Returns how many commits succeeded.
    pub fn commit_count(&self) -> u64 {
        self.commit_count
    }

    /// Returns the number of entities in the arena.
    pub fn tracked_count(&self) -> usize {
        self.arena.len()
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store is offline"))
        }
    }

    fn tracked(&self, handle: Handle) -> StoreResult<&Tracked> {
        self.arena
            .get(handle.index())
            .ok_or(StoreError::UnknownHandle { handle })
    }

    fn tracked_mut(&mut self, handle: Handle) -> StoreResult<&mut Tracked> {
        self.arena
            .get_mut(handle.index())
            .ok_or(StoreError::UnknownHandle { handle })
    }

    fn register(&mut self, entity: ManagedEntity) -> StoreResult<Handle> {
        let handle = next_handle(self.arena.len())?;
        self.arena.push(Tracked {
            entity,
            original: None,
        });
        Ok(handle)
    }

    /// Returns the tracked entity for an identity, registering an unloaded
    /// reference if none is tracked yet.
    fn reference_handle(
        &mut self,
        metadata: Arc<ClassMetadata>,
        identity: Identity,
    ) -> StoreResult<Handle> {
        let key = (metadata.entity_type().to_string(), identity);
        if let Some(handle) = self.identity_map.get(&key) {
            return Ok(*handle);
        }
        let handle = self.register(ManagedEntity::new(
            metadata,
            EntityState::Reference(key.1.clone()),
            Lifecycle::Managed,
        ))?;
        self.identity_map.insert(key, handle);
        Ok(handle)
    }

    fn detached_identity(&self, detached: &DetachedEntity) -> StoreResult<Identity> {
        let metadata = self.schema.get(&detached.entity_type)?;
        metadata.extract_identity(&detached.fields).ok_or_else(|| {
            StoreError::constraint(format!(
                "reference to {} carries no identifier",
                detached.entity_type
            ))
        })
    }

    fn stored_row(&self, entity_type: &str, identity: &Identity) -> Option<&StoredRow> {
        self.tables.get(entity_type)?.get(identity)
    }

    /// Validates every staged change and computes the writes, without
    /// touching committed state.
    fn plan(&self, updates: &[Handle]) -> StoreResult<CommitPlan> {
        let mut sequences = self.sequences.clone();
        let mut assigned = HashMap::new();

        let mut deletes = Vec::with_capacity(self.deletions.len());
        let mut deleting = HashSet::new();
        for handle in &self.deletions {
            let tracked = self.tracked(*handle)?;
            let entity_type = tracked.entity.entity_type().to_string();
            let identity = tracked.stored_identity();
            deleting.insert((entity_type.clone(), identity.clone()));
            deletes.push((*handle, entity_type, identity));
        }

        let mut inserting = HashSet::new();
        for handle in &self.insertions {
            let entity = &self.tracked(*handle)?.entity;
            let metadata = entity.metadata();
            let mut identity = entity.identity();
            if identity.is_complete() {
                bump_sequence(&mut sequences, metadata, &identity);
            } else {
                let value = next_identifier(&mut sequences, metadata, &identity)?;
                identity = Identity::single(metadata.identifier()[0].clone(), value);
            }

            let key = (metadata.entity_type().to_string(), identity.clone());
            let exists = self
                .stored_row(metadata.entity_type(), &identity)
                .is_some()
                && !deleting.contains(&key);
            if exists || !inserting.insert(key) {
                return Err(StoreError::constraint(format!(
                    "duplicate identity {} {identity}",
                    metadata.entity_type()
                )));
            }
            assigned.insert(*handle, identity);
        }

        let mut writes = Vec::with_capacity(self.insertions.len() + updates.len());
        for handle in self.insertions.iter().chain(updates) {
            let tracked = self.tracked(*handle)?;
            let metadata = tracked.entity.metadata();
            let identity = match assigned.get(handle) {
                Some(identity) => identity.clone(),
                None => {
                    let identity = tracked.stored_identity();
                    if tracked.entity.identity() != identity {
                        return Err(StoreError::constraint(format!(
                            "identifier of {} {identity} changed",
                            metadata.entity_type()
                        )));
                    }
                    identity
                }
            };
            let row = self.build_row(tracked, &identity, &assigned)?;
            writes.push(RowWrite {
                handle: *handle,
                entity_type: metadata.entity_type().to_string(),
                identity,
                row,
            });
        }

        Ok(CommitPlan {
            sequences,
            assigned,
            deletes,
            writes,
        })
    }

    fn build_row(
        &self,
        tracked: &Tracked,
        identity: &Identity,
        assigned: &HashMap<Handle, Identity>,
    ) -> StoreResult<StoredRow> {
        let metadata = tracked.entity.metadata();
        let data = tracked.entity.data().ok_or_else(|| {
            StoreError::constraint(format!(
                "{} {identity} staged without being loaded",
                metadata.entity_type()
            ))
        })?;

        let mut fields = data.fields().to_vec();
        for (name, slot) in metadata.identifier().iter().zip(metadata.identifier_slots()) {
            fields[slot.index()] = identity.get(name).cloned().unwrap_or_default();
        }
        for (mapping, value) in metadata.fields().iter().zip(&fields) {
            if !mapping.nullable && value.is_null() {
                return Err(StoreError::constraint(format!(
                    "{}.{} must not be null",
                    metadata.entity_type(),
                    mapping.name
                )));
            }
        }

        let to_one = data
            .to_one_targets()
            .iter()
            .map(|target| {
                (*target)
                    .map(|target| self.target_identity(target, assigned))
                    .transpose()
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let stored = tracked
            .original
            .as_ref()
            .and_then(|original| self.stored_row(metadata.entity_type(), &original.identity));
        let mut to_many = Vec::with_capacity(data.collections().len());
        for (i, collection) in data.collections().iter().enumerate() {
            if collection.is_initialized() {
                to_many.push(
                    collection
                        .items()
                        .iter()
                        .map(|item| self.target_identity(*item, assigned))
                        .collect::<StoreResult<Vec<_>>>()?,
                );
            } else {
                to_many.push(stored.map(|row| row.to_many[i].clone()).unwrap_or_default());
            }
        }

        Ok(StoredRow {
            fields,
            to_one,
            to_many,
        })
    }

    fn target_identity(
        &self,
        target: Handle,
        assigned: &HashMap<Handle, Identity>,
    ) -> StoreResult<Identity> {
        if let Some(identity) = assigned.get(&target) {
            return Ok(identity.clone());
        }
        let tracked = self.tracked(target)?;
        let identity = tracked.stored_identity();
        match tracked.entity.lifecycle() {
            Lifecycle::Removed => Err(StoreError::constraint(format!(
                "reference to {} {identity} which is being deleted",
                tracked.entity.entity_type()
            ))),
            Lifecycle::Detached => Err(StoreError::constraint(format!(
                "reference to detached {} {identity}",
                tracked.entity.entity_type()
            ))),
            Lifecycle::New | Lifecycle::Managed if !identity.is_complete() => {
                Err(StoreError::constraint(format!(
                    "reference to {} without identifier",
                    tracked.entity.entity_type()
                )))
            }
            Lifecycle::New | Lifecycle::Managed => Ok(identity),
        }
    }

    fn apply(&mut self, plan: CommitPlan) {
        for (handle, entity_type, identity) in plan.deletes {
            if let Some(table) = self.tables.get_mut(&entity_type) {
                table.remove(&identity);
            }
            self.identity_map.remove(&(entity_type, identity));

            let tracked = &mut self.arena[handle.index()];
            let metadata = Arc::clone(tracked.entity.metadata());
            if let Some(data) = tracked.entity.data_mut() {
                for slot in metadata.identifier_slots() {
                    data.set_field(*slot, Value::Null);
                }
            }
            tracked.entity.set_lifecycle(Lifecycle::Detached);
            tracked.original = None;
        }

        for write in plan.writes {
            self.tables
                .entry(write.entity_type.clone())
                .or_default()
                .insert(write.identity.clone(), write.row);

            let tracked = &mut self.arena[write.handle.index()];
            let metadata = Arc::clone(tracked.entity.metadata());
            if let Some(data) = tracked.entity.data_mut() {
                if let Some(identity) = plan.assigned.get(&write.handle) {
                    for (name, slot) in metadata.identifier().iter().zip(metadata.identifier_slots())
                    {
                        data.set_field(*slot, identity.get(name).cloned().unwrap_or_default());
                    }
                }
                for collection in data.collections_mut() {
                    collection.mark_clean();
                }
                tracked.original = Some(Original {
                    identity: write.identity.clone(),
                    fields: data.fields().to_vec(),
                    to_one: data.to_one_targets().to_vec(),
                });
            }
            tracked.entity.set_lifecycle(Lifecycle::Managed);
            self.identity_map
                .insert((write.entity_type, write.identity), write.handle);
        }

        self.sequences = plan.sequences;
        self.insertions.clear();
        self.deletions.clear();
    }
}

impl UnitOfWork for MemoryStore {
    fn try_get_by_id(&self, entity_type: &str, identity: &Identity) -> Option<Handle> {
        self.identity_map
            .get(&(entity_type.to_string(), identity.clone()))
            .copied()
    }

    fn entity_identifier(&self, handle: Handle) -> StoreResult<Identity> {
        let tracked = self.tracked(handle)?;
        if tracked.entity.lifecycle() == Lifecycle::Detached {
            return Err(StoreError::NotManaged { handle });
        }
        Ok(tracked.entity.identity())
    }

    fn scheduled_entity_insertions(&self) -> Vec<Handle> {
        self.insertions.clone()
    }

    fn scheduled_entity_updates(&self) -> Vec<Handle> {
        self.arena
            .iter()
            .enumerate()
            .filter(|(_, tracked)| {
                tracked.entity.lifecycle() == Lifecycle::Managed && tracked.is_dirty()
            })
            .map(|(i, _)| Handle::new(i as u32))
            .collect()
    }

    fn scheduled_entity_deletions(&self) -> Vec<Handle> {
        self.deletions.clone()
    }
}

impl EntityStore for MemoryStore {
    fn class_metadata(&self, entity_type: &str) -> StoreResult<Arc<ClassMetadata>> {
        self.schema.get(entity_type)
    }

    fn unit_of_work(&self) -> &dyn UnitOfWork {
        self
    }

    fn find_one_by(
        &mut self,
        entity_type: &str,
        identity: &Identity,
    ) -> StoreResult<Option<Handle>> {
        self.ensure_available()?;
        let metadata = self.schema.get(entity_type)?;
        if !metadata.matches_identifier(identity) {
            return Err(StoreError::invalid_schema(format!(
                "{entity_type} lookups must use exactly its identifier fields, got {identity}"
            )));
        }
        if let Some(handle) = self.try_get_by_id(entity_type, identity) {
            return Ok(Some(handle));
        }
        if self.stored_row(entity_type, identity).is_none() {
            return Ok(None);
        }
        Ok(Some(self.reference_handle(metadata, identity.clone())?))
    }

    fn persist(&mut self, entity_type: &str, data: EntityData) -> StoreResult<Handle> {
        let metadata = self.schema.get(entity_type)?;
        if data.fields().len() != metadata.fields().len()
            || data.to_one_targets().len() != metadata.to_one_associations().len()
            || data.collections().len() != metadata.to_many_associations().len()
        {
            return Err(StoreError::invalid_schema(format!(
                "entity state does not match {entity_type} metadata"
            )));
        }

        let identity = metadata.identity_of(data.fields());
        let handle = self.register(ManagedEntity::new(
            Arc::clone(&metadata),
            EntityState::Loaded(data),
            Lifecycle::New,
        ))?;
        if identity.is_complete() {
            self.identity_map
                .entry((entity_type.to_string(), identity))
                .or_insert(handle);
        }
        self.insertions.push(handle);
        debug!(entity_type, %handle, "staged insertion");
        Ok(handle)
    }

    fn remove(&mut self, handle: Handle) -> StoreResult<()> {
        let tracked = self.tracked_mut(handle)?;
        match tracked.entity.lifecycle() {
            Lifecycle::New => {
                tracked.entity.set_lifecycle(Lifecycle::Detached);
                self.insertions.retain(|h| *h != handle);
                self.identity_map.retain(|_, h| *h != handle);
            }
            Lifecycle::Managed => {
                tracked.entity.set_lifecycle(Lifecycle::Removed);
                self.deletions.push(handle);
                debug!(%handle, "staged deletion");
            }
            Lifecycle::Removed => {}
            Lifecycle::Detached => return Err(StoreError::NotManaged { handle }),
        }
        Ok(())
    }

    fn is_loaded(&self, handle: Handle) -> StoreResult<bool> {
        Ok(self.tracked(handle)?.entity.is_loaded())
    }

    fn force_load(&mut self, handle: Handle) -> StoreResult<()> {
        let tracked = self.tracked(handle)?;
        let identity = match tracked.entity.state() {
            EntityState::Loaded(_) => return Ok(()),
            EntityState::Reference(identity) => identity.clone(),
        };
        self.ensure_available()?;
        let metadata = Arc::clone(tracked.entity.metadata());
        let row = self
            .stored_row(metadata.entity_type(), &identity)
            .cloned()
            .ok_or_else(|| StoreError::missing_row(metadata.entity_type(), &identity))?;

        let mut to_one = Vec::with_capacity(row.to_one.len());
        for (mapping, target) in metadata.to_one_associations().iter().zip(row.to_one) {
            let target = match target {
                Some(target) => {
                    let target_metadata = self.schema.get(&mapping.target_type)?;
                    Some(self.reference_handle(target_metadata, target)?)
                }
                None => None,
            };
            to_one.push(target);
        }
        let to_many = row
            .to_many
            .iter()
            .map(|_| PersistentCollection::uninitialized())
            .collect();

        let original = Original {
            identity: identity.clone(),
            fields: row.fields.clone(),
            to_one: to_one.clone(),
        };
        let tracked = self.tracked_mut(handle)?;
        tracked
            .entity
            .set_state(EntityState::Loaded(EntityData::new(row.fields, to_one, to_many)));
        tracked.original = Some(original);
        self.load_count += 1;
        debug!(entity_type = metadata.entity_type(), %identity, "loaded entity");
        Ok(())
    }

    fn entity(&self, handle: Handle) -> StoreResult<&ManagedEntity> {
        Ok(&self.tracked(handle)?.entity)
    }

    fn entity_mut(&mut self, handle: Handle) -> StoreResult<&mut ManagedEntity> {
        Ok(&mut self.tracked_mut(handle)?.entity)
    }

    fn initialize_collection(&mut self, handle: Handle, slot: AssociationSlot) -> StoreResult<()> {
        self.force_load(handle)?;
        let tracked = self.tracked(handle)?;
        let metadata = Arc::clone(tracked.entity.metadata());
        let Some(data) = tracked.entity.data() else {
            return Ok(());
        };
        if data.collection(slot).is_initialized() {
            return Ok(());
        }

        let identities = tracked
            .original
            .as_ref()
            .and_then(|original| self.stored_row(metadata.entity_type(), &original.identity))
            .map(|row| row.to_many[slot.index()].clone())
            .unwrap_or_default();
        let target_metadata = self.schema.get(&metadata.to_many(slot).target_type)?;
        let items = identities
            .into_iter()
            .map(|identity| self.reference_handle(Arc::clone(&target_metadata), identity))
            .collect::<StoreResult<Vec<_>>>()?;

        if let Some(data) = self.tracked_mut(handle)?.entity.data_mut() {
            data.collection_mut(slot).load(items);
        }
        debug!(
            entity_type = metadata.entity_type(),
            association = %metadata.to_many(slot).name,
            "initialized collection"
        );
        Ok(())
    }

    fn commit(&mut self, hook: &mut CommitHook<'_>) -> StoreResult<()> {
        self.ensure_available()?;
        let view: &dyn UnitOfWork = &*self;
        hook(view)?;

        let updates = self.scheduled_entity_updates();
        let plan = self.plan(&updates)?;
        let (inserted, deleted) = (plan.assigned.len(), plan.deletes.len());
        self.apply(plan);
        self.commit_count += 1;
        debug!(
            inserted,
            updated = updates.len(),
            deleted,
            commit = self.commit_count,
            "committed unit of work"
        );
        Ok(())
    }

    fn discard(&mut self) {
        let dropped = self.arena.len();
        self.clear();
        debug!(dropped, "discarded unit of work");
    }

    fn close(&mut self) {
        let released = self.arena.len();
        self.clear();
        debug!(released, "closed unit of work");
    }
}

fn next_handle(tracked: usize) -> StoreResult<Handle> {
    u32::try_from(tracked).map(Handle::new).map_err(|_| {
        StoreError::constraint(format!(
            "unit of work cannot track more than {} entities",
            u32::MAX
        ))
    })
}

fn not_a(metadata: &ClassMetadata, name: &str, what: &str) -> StoreError {
    StoreError::invalid_schema(format!(
        "{}.{name} is not a {what}",
        metadata.entity_type()
    ))
}

fn next_identifier(
    sequences: &mut HashMap<String, i64>,
    metadata: &ClassMetadata,
    identity: &Identity,
) -> StoreResult<Value> {
    match metadata.id_generator() {
        IdGenerator::Assigned => Err(StoreError::constraint(format!(
            "{} {identity}: identifier not assigned",
            metadata.entity_type()
        ))),
        IdGenerator::Sequence => {
            let current = sequences
                .entry(metadata.entity_type().to_string())
                .or_insert(0);
            *current = current.checked_add(1).ok_or_else(|| {
                StoreError::constraint(format!(
                    "{} identifier sequence exhausted",
                    metadata.entity_type()
                ))
            })?;
            Ok(Value::Integer(*current))
        }
        IdGenerator::Uuid => Ok(Value::Text(Uuid::new_v4().to_string())),
    }
}

fn bump_sequence(
    sequences: &mut HashMap<String, i64>,
    metadata: &ClassMetadata,
    identity: &Identity,
) {
    if metadata.id_generator() != IdGenerator::Sequence {
        return;
    }
    let Some(assigned) = identity.iter().next().and_then(|(_, v)| v.as_integer()) else {
        return;
    };
    let current = sequences
        .entry(metadata.entity_type().to_string())
        .or_insert(0);
    *current = (*current).max(assigned);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{library_store, slot_of_field, slot_of_many, slot_of_one};

    fn book(id: i64) -> Identity {
        Identity::single("id", id)
    }

    #[test]
    fn lookup_registers_unloaded_reference() {
        let mut store = library_store();
        let handle = store.find_one_by("Book", &book(1)).unwrap().unwrap();
        assert!(!store.is_loaded(handle).unwrap());
        assert_eq!(store.load_count(), 0);

        let again = store.find_one_by("Book", &book(1)).unwrap().unwrap();
        assert_eq!(handle, again);
        assert_eq!(store.try_get_by_id("Book", &book(1)), Some(handle));
        assert_eq!(store.find_one_by("Book", &book(99)).unwrap(), None);
    }

    #[test]
    fn lookup_rejects_non_identifier_criteria() {
        let mut store = library_store();
        let result = store.find_one_by("Book", &Identity::single("title", "Dune"));
        assert!(matches!(result, Err(StoreError::InvalidSchema { .. })));
    }

    #[test]
    fn force_load_materializes_references_lazily() {
        let mut store = library_store();
        let handle = store.find_one_by("Book", &book(1)).unwrap().unwrap();
        store.force_load(handle).unwrap();
        assert_eq!(store.load_count(), 1);

        let meta = store.class_metadata("Book").unwrap();
        let data = store.entity(handle).unwrap().data().unwrap();
        assert_eq!(
            data.field(slot_of_field(&meta, "title")),
            &Value::from("Earthsea")
        );
        let author = data.to_one(slot_of_one(&meta, "author")).unwrap();
        assert!(!store.is_loaded(author).unwrap());
        assert!(!data.collection(slot_of_many(&meta, "tags")).is_initialized());

        // Loading twice is a no-op.
        store.force_load(handle).unwrap();
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn initialize_collection_reads_members() {
        let mut store = library_store();
        let handle = store.find_one_by("Book", &book(2)).unwrap().unwrap();
        let meta = store.class_metadata("Book").unwrap();
        let tags = slot_of_many(&meta, "tags");
        store.initialize_collection(handle, tags).unwrap();

        let data = store.entity(handle).unwrap().data().unwrap();
        assert_eq!(data.collection(tags).len(), 2);
        let first = data.collection(tags).items()[0];
        assert_eq!(store.entity(first).unwrap().entity_type(), "Tag");
    }

    #[test]
    fn commit_assigns_sequence_identifiers() {
        let mut store = library_store();
        let meta = store.class_metadata("Author").unwrap();
        let mut data = meta.new_entity_data();
        data.set_field(slot_of_field(&meta, "name"), Value::from("Butler"));
        let handle = store.persist("Author", data).unwrap();
        assert!(store.entity_identifier(handle).unwrap().get("id").unwrap().is_null());

        store.commit(&mut |_| Ok(())).unwrap();

        // Two authors were seeded.
        let identity = store.entity_identifier(handle).unwrap();
        assert_eq!(identity, Identity::single("id", 3));
        assert_eq!(store.count("Author"), 3);
        assert_eq!(store.entity(handle).unwrap().lifecycle(), Lifecycle::Managed);
        assert_eq!(store.try_get_by_id("Author", &identity), Some(handle));
    }

    #[test]
    fn commit_clears_identifiers_of_deleted_entities() {
        let mut store = library_store();
        let handle = store.find_one_by("Tag", &Identity::single("code", "classic")).unwrap().unwrap();
        store.force_load(handle).unwrap();
        store.remove(handle).unwrap();

        let mut seen = Vec::new();
        store
            .commit(&mut |uow| {
                for h in uow.scheduled_entity_deletions() {
                    seen.push(uow.entity_identifier(h)?);
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, vec![Identity::single("code", "classic")]);
        assert!(store.row("Tag", &Identity::single("code", "classic")).is_none());
        let snapshot = store.snapshot(handle).unwrap();
        assert_eq!(snapshot.get("code"), Some(&Value::Null));
        assert!(matches!(
            store.entity_identifier(handle),
            Err(StoreError::NotManaged { .. })
        ));
    }

    #[test]
    fn failed_commit_writes_nothing() {
        let mut store = library_store();
        let meta = store.class_metadata("Tag").unwrap();

        let mut fresh = meta.new_entity_data();
        fresh.set_field(slot_of_field(&meta, "code"), Value::from("new"));
        store.persist("Tag", fresh).unwrap();

        let mut duplicate = meta.new_entity_data();
        duplicate.set_field(slot_of_field(&meta, "code"), Value::from("scifi"));
        store.persist("Tag", duplicate).unwrap();

        let result = store.commit(&mut |_| Ok(()));
        assert!(matches!(result, Err(StoreError::ConstraintViolation { .. })));
        assert_eq!(store.count("Tag"), 3);
        assert!(store.row("Tag", &Identity::single("code", "new")).is_none());
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn assigned_identifier_must_be_present() {
        let mut store = library_store();
        let meta = store.class_metadata("Tag").unwrap();
        store.persist("Tag", meta.new_entity_data()).unwrap();
        let result = store.commit(&mut |_| Ok(()));
        assert!(matches!(result, Err(StoreError::ConstraintViolation { .. })));
    }

    #[test]
    fn required_fields_are_enforced() {
        let mut store = library_store();
        let meta = store.class_metadata("Author").unwrap();
        store.persist("Author", meta.new_entity_data()).unwrap();
        let err = store.commit(&mut |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("Author.name must not be null"));
    }

    #[test]
    fn hook_failure_aborts_commit() {
        let mut store = library_store();
        let meta = store.class_metadata("Author").unwrap();
        let mut data = meta.new_entity_data();
        data.set_field(slot_of_field(&meta, "name"), Value::from("Butler"));
        store.persist("Author", data).unwrap();

        let result = store.commit(&mut |_| Err(StoreError::hook_failed("nope")));
        assert!(matches!(result, Err(StoreError::HookFailed { .. })));
        assert_eq!(store.count("Author"), 2);
    }

    #[test]
    fn field_change_schedules_update() {
        let mut store = library_store();
        let handle = store.find_one_by("Author", &Identity::single("id", 1)).unwrap().unwrap();
        store.force_load(handle).unwrap();
        assert!(store.scheduled_entity_updates().is_empty());

        let meta = store.class_metadata("Author").unwrap();
        store
            .entity_mut(handle)
            .unwrap()
            .data_mut()
            .unwrap()
            .set_field(slot_of_field(&meta, "country"), Value::from("US"));
        assert_eq!(store.scheduled_entity_updates(), vec![handle]);

        store.commit(&mut |_| Ok(())).unwrap();
        assert!(store.scheduled_entity_updates().is_empty());
        let row = store.row("Author", &Identity::single("id", 1)).unwrap();
        assert_eq!(row.get("country"), Some(&Value::from("US")));
    }

    #[test]
    fn removing_new_entity_unschedules_it() {
        let mut store = library_store();
        let meta = store.class_metadata("Tag").unwrap();
        let mut data = meta.new_entity_data();
        data.set_field(slot_of_field(&meta, "code"), Value::from("tmp"));
        let handle = store.persist("Tag", data).unwrap();
        store.remove(handle).unwrap();

        assert!(store.scheduled_entity_insertions().is_empty());
        assert!(store.scheduled_entity_deletions().is_empty());
        assert!(matches!(
            store.remove(handle),
            Err(StoreError::NotManaged { .. })
        ));
    }

    #[test]
    fn reference_to_deleted_entity_is_rejected() {
        let mut store = library_store();
        let author = store.find_one_by("Author", &Identity::single("id", 1)).unwrap().unwrap();
        store.force_load(author).unwrap();
        store.remove(author).unwrap();

        let meta = store.class_metadata("Book").unwrap();
        let mut data = meta.new_entity_data();
        data.set_field(slot_of_field(&meta, "title"), Value::from("Orphan"));
        data.set_to_one(slot_of_one(&meta, "author"), Some(author));
        store.persist("Book", data).unwrap();

        let err = store.commit(&mut |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("being deleted"));
        assert_eq!(store.count("Author"), 2);
    }

    #[test]
    fn offline_store_refuses_work() {
        let mut store = library_store();
        store.set_available(false);
        assert!(matches!(
            store.find_one_by("Book", &book(1)),
            Err(StoreError::Unavailable { .. })
        ));
        assert!(matches!(
            store.commit(&mut |_| Ok(())),
            Err(StoreError::Unavailable { .. })
        ));
    }

    #[test]
    fn discard_drops_staged_changes() {
        let mut store = library_store();
        let handle = store.find_one_by("Book", &book(1)).unwrap().unwrap();
        store.force_load(handle).unwrap();
        store.remove(handle).unwrap();
        store.discard();

        assert_eq!(store.tracked_count(), 0);
        assert!(store.scheduled_entity_deletions().is_empty());
        store.commit(&mut |_| Ok(())).unwrap();
        assert!(store.row("Book", &book(1)).is_some());
    }

    #[test]
    fn uuid_generator_assigns_text_identifiers() {
        let schema = Schema::new().with(
            ClassMetadata::builder("Session")
                .id("token")
                .generator(IdGenerator::Uuid)
                .build()
                .unwrap(),
        );
        let mut store = MemoryStore::new(schema).unwrap();
        let meta = store.class_metadata("Session").unwrap();
        let handle = store.persist("Session", meta.new_entity_data()).unwrap();
        store.commit(&mut |_| Ok(())).unwrap();

        let identity = store.entity_identifier(handle).unwrap();
        let token = identity.get("token").and_then(Value::as_text).unwrap();
        assert!(Uuid::parse_str(token).is_ok());
    }

    #[test]
    fn seed_rejects_unknown_properties() {
        let mut store = library_store();
        let result = store.seed(WireEntity::new("Tag").field("code", "x").field("colour", "red"));
        assert!(matches!(result, Err(StoreError::InvalidSchema { .. })));
    }

    #[test]
    fn exhausted_sequence_fails_before_writing() {
        let mut store = library_store();
        store
            .seed(WireEntity::new("Author").field("id", i64::MAX).field("name", "Last"))
            .unwrap();
        let meta = store.class_metadata("Author").unwrap();
        let mut data = meta.new_entity_data();
        data.set_field(slot_of_field(&meta, "name"), Value::from("Overflow"));
        store.persist("Author", data).unwrap();

        let err = store.commit(&mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation { .. }));
        assert!(err.to_string().contains("sequence exhausted"));
        assert_eq!(store.count("Author"), 3);
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn handles_fit_in_u32() {
        assert_eq!(next_handle(7).unwrap(), Handle::new(7));
        assert_eq!(next_handle(u32::MAX as usize).unwrap().as_u32(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            next_handle(u32::MAX as usize + 1),
            Err(StoreError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn close_detaches_everything() {
        let mut store = library_store();
        let handle = store
            .find_one_by("Book", &book(1))
            .unwrap()
            .unwrap();
        store.force_load(handle).unwrap();
        store.commit(&mut |_| Ok(())).unwrap();

        store.close();

        assert_eq!(store.tracked_count(), 0);
        assert_eq!(store.try_get_by_id("Book", &book(1)), None);
        assert!(matches!(
            store.entity(handle),
            Err(StoreError::UnknownHandle { .. })
        ));
        assert!(store.row("Book", &book(1)).is_some());
    }
}
