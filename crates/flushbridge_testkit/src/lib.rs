//! # flushbridge testkit
//!
//! Test utilities for flushbridge.
//!
//! This crate provides:
//! - A library schema and a seeded in-memory store
//! - Detached-reference and operation helpers
//! - Property-based test generators using proptest
//! - Golden JSON rendering of change-sets
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flushbridge_testkit::prelude::*;
//!
//! #[test]
//! fn retitle() {
//!     let mut library = Library::new();
//!     let set = FlushSet::new().with_property_change(PropertyChangeOperation::new(
//!         book(1),
//!         "title",
//!         Value::from("Tehanu"),
//!     ));
//!     library.flush(set).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod golden;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::golden::*;
    pub use flushbridge_core::{
        ChangeSet, FlushConfig, FlushError, FlushExecutor, MemoryStore, Session, StoreError,
    };
    pub use flushbridge_protocol::{
        CollectionChangeOperation, CollectionChangeType, DetachedEntity, FlushSet, Identity,
        PersistOperation, PropertyChangeOperation, PropertyValue, RemoveOperation, Value,
        WireChangeSet, WireEntity,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use golden::*;
