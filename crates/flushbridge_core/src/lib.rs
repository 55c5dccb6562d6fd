//! # flushbridge core
//!
//! Change-set reconciliation between a rich client and an entity store.
//!
//! This crate provides:
//! - Schema metadata with a slot-based field accessor
//! - The managed entity model (`Loaded` state or identity-only `Reference`)
//! - The `EntityStore`/`UnitOfWork` contract and an in-memory store
//! - Identity resolution of detached references
//! - The flush executor, which applies a flush set and commits it
//! - A session that serializes flushes against one store
//!
//! ## Architecture
//!
//! A flush runs four phases in a fixed order (persists, property changes,
//! collection changes, removes), then commits through the store. The
//! store calls a per-flush hook before writing, which records what is
//! about to be inserted, updated and deleted. After the commit the
//! executor fills in generated identifiers and restores the identifiers
//! of deleted entities.
//!
//! ## Key Invariants
//!
//! - Every detached reference is resolved before anything touches it
//! - One managed instance per (type, identity) within a flush
//! - Taxonomy errors are detected before any staging
//! - A flush is all-or-nothing; errors discard the unit of work

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_set;
mod config;
mod entity;
mod error;
mod executor;
mod memory;
mod resolver;
mod schema;
mod session;
mod stats;
mod store;
mod types;
mod walker;

#[cfg(test)]
mod test_support;

pub use change_set::ChangeSet;
pub use config::FlushConfig;
pub use entity::{EntityData, EntityState, Lifecycle, ManagedEntity, PersistentCollection};
pub use error::{FlushError, FlushResult, StoreError, StoreResult};
pub use executor::FlushExecutor;
pub use memory::MemoryStore;
pub use resolver::IdentityResolver;
pub use schema::{
    AssociationKind, AssociationMapping, AssociationSlot, ClassMetadata, ClassMetadataBuilder,
    FieldMapping, FieldSlot, IdGenerator, PropertyAccessor, Schema,
};
pub use session::Session;
pub use stats::{FlushStats, ResolverStats, SessionStats, SessionStatsSnapshot};
pub use store::{CommitHook, EntityStore, UnitOfWork};
pub use types::Handle;
pub use walker::{CborWalker, DeserializationWalker};

pub use flushbridge_protocol as protocol;
