//! Flush statistics.
//!
//! [`FlushStats`] describes a single invocation and is returned by the
//! executor. [`SessionStats`] accumulates counters across every flush run
//! through a [`Session`](crate::Session) and can be read while flushes are
//! in progress.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identity resolution counters for one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolverStats {
    /// References answered from the unit of work's identity map.
    pub identity_map_hits: u64,
    /// References answered by a repository lookup.
    pub store_lookups: u64,
    /// Placeholders materialized on request.
    pub forced_loads: u64,
    /// References answered by a temporary uid from this flush.
    pub pending_hits: u64,
}

/// Counters for one flush invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    /// Persist operations applied.
    pub persists: u64,
    /// Property changes applied.
    pub property_changes: u64,
    /// Collection changes applied.
    pub collection_changes: u64,
    /// Remove operations applied.
    pub removes: u64,
    /// Identity resolution counters.
    pub resolver: ResolverStats,
}

impl FlushStats {
    /// Returns the number of operations applied across all phases.
    pub fn operations(&self) -> u64 {
        self.persists + self.property_changes + self.collection_changes + self.removes
    }
}

/// Cumulative counters for a session.
#[derive(Debug, Default)]
pub struct SessionStats {
    flushes_committed: AtomicU64,
    flushes_aborted: AtomicU64,
    operations: AtomicU64,
    insertions: AtomicU64,
    updates: AtomicU64,
    deletions: AtomicU64,
}

impl SessionStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a committed flush.
    pub(crate) fn record_commit(
        &self,
        flush: &FlushStats,
        insertions: usize,
        updates: usize,
        deletions: usize,
    ) {
        self.flushes_committed.fetch_add(1, Ordering::Relaxed);
        self.operations.fetch_add(flush.operations(), Ordering::Relaxed);
        self.insertions.fetch_add(insertions as u64, Ordering::Relaxed);
        self.updates.fetch_add(updates as u64, Ordering::Relaxed);
        self.deletions.fetch_add(deletions as u64, Ordering::Relaxed);
    }

    /// Records an aborted flush.
    pub(crate) fn record_abort(&self) {
        self.flushes_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of committed flushes.
    pub fn flushes_committed(&self) -> u64 {
        self.flushes_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of aborted flushes.
    pub fn flushes_aborted(&self) -> u64 {
        self.flushes_aborted.load(Ordering::Relaxed)
    }

    /// Returns the number of operations applied by committed flushes.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            flushes_committed: self.flushes_committed(),
            flushes_aborted: self.flushes_aborted(),
            operations: self.operations(),
            insertions: self.insertions.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatsSnapshot {
    /// Committed flushes.
    pub flushes_committed: u64,
    /// Aborted flushes.
    pub flushes_aborted: u64,
    /// Operations applied by committed flushes.
    pub operations: u64,
    /// Entities inserted.
    pub insertions: u64,
    /// Entities reported as updated.
    pub updates: u64,
    /// Entities deleted.
    pub deletions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_stats_total() {
        let stats = FlushStats {
            persists: 2,
            property_changes: 1,
            collection_changes: 3,
            removes: 1,
            ..FlushStats::default()
        };
        assert_eq!(stats.operations(), 7);
    }

    #[test]
    fn session_snapshot() {
        let stats = SessionStats::new();
        let flush = FlushStats {
            persists: 1,
            removes: 1,
            ..FlushStats::default()
        };
        stats.record_commit(&flush, 1, 0, 1);
        stats.record_abort();

        let snap = stats.snapshot();
        assert_eq!(snap.flushes_committed, 1);
        assert_eq!(snap.flushes_aborted, 1);
        assert_eq!(snap.operations, 2);
        assert_eq!(snap.insertions, 1);
        assert_eq!(snap.deletions, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(SessionStats::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    s.record_abort();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.flushes_aborted(), 400);
    }
}
