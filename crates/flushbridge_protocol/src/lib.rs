//! # flushbridge protocol
//!
//! Envelope types exchanged between a rich client and the flush engine.
//!
//! This crate provides:
//! - `Value`, `Identity` and `DetachedEntity` for naming entities
//! - `WireEntity`, the payload shape of a full entity
//! - The four edit operations and the `FlushSet` batch
//! - `WireChangeSet`, the normalized result of a flush
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod change_set;
mod entity;
mod error;
mod flush_set;
mod identity;
mod operation;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use change_set::WireChangeSet;
pub use entity::WireEntity;
pub use error::{ProtocolError, ProtocolResult};
pub use flush_set::FlushSet;
pub use identity::{DetachedEntity, Identity};
pub use operation::{
    CollectionChangeOperation, CollectionChangeType, PersistOperation, PropertyChangeOperation,
    PropertyValue, RemoveOperation,
};
pub use value::Value;
