//! Serialized access to a store.

use crate::change_set::ChangeSet;
use crate::config::FlushConfig;
use crate::error::FlushResult;
use crate::executor::FlushExecutor;
use crate::stats::SessionStats;
use crate::store::EntityStore;
use crate::walker::DeserializationWalker;
use flushbridge_protocol::FlushSet;
use parking_lot::Mutex;

/// Owns an entity store and runs flushes against it one at a time.
///
/// A store's unit of work must not be mutated concurrently. The session
/// holds its lock for the whole of a flush, so callers on other threads
/// wait rather than interleave.
#[derive(Debug)]
pub struct Session<S: EntityStore> {
    store: Mutex<S>,
    config: FlushConfig,
    stats: SessionStats,
}

impl<S: EntityStore> Session<S> {
    /// Creates a session with the default configuration.
    pub fn new(store: S) -> Self {
        Self {
            store: Mutex::new(store),
            config: FlushConfig::default(),
            stats: SessionStats::new(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: FlushConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    /// Returns the cumulative counters.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Applies a flush set.
    pub fn flush<W>(&self, flush_set: FlushSet, walker: &mut W) -> FlushResult<ChangeSet>
    where
        W: DeserializationWalker + ?Sized,
    {
        let mut store = self.store.lock();
        let mut executor =
            FlushExecutor::new(&mut *store, walker).with_config(self.config.clone());
        let result = executor.flush(flush_set);
        match &result {
            Ok(change_set) => self.stats.record_commit(
                &executor.stats(),
                change_set.entity_insertions.len(),
                change_set.entity_updates.len(),
                change_set.entity_deletions.len(),
            ),
            Err(_) => self.stats.record_abort(),
        }
        result
    }

    /// Decodes a CBOR flush set, applies it, and returns the CBOR-encoded
    /// change-set.
    pub fn flush_encoded<W>(&self, flush_set: &[u8], walker: &mut W) -> FlushResult<Vec<u8>>
    where
        W: DeserializationWalker + ?Sized,
    {
        let flush_set = FlushSet::decode(flush_set)?;
        let change_set = self.flush(flush_set, walker)?;
        Ok(change_set.into_wire().encode()?)
    }

    /// Runs a closure with exclusive access to the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.store.lock())
    }

    /// Consumes the session, returning the store.
    pub fn into_inner(self) -> S {
        self.store.into_inner()
    }
}
