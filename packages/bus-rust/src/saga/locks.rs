//! Per-instance critical sections.

use std::sync::Arc;

use conduit_core::CorrelationId;
use dashmap::DashMap;
use parking_lot::Mutex;

/// One mutex per live correlation id.
///
/// Entries are created on first use and dropped once no caller holds or
/// waits on them, so the table only grows with concurrently active ids.
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct InstanceLocks {
    locks: Arc<DashMap<CorrelationId, Arc<Mutex<()>>>>,
}

impl InstanceLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `correlation_id`.
    pub fn with_lock<R>(&self, correlation_id: CorrelationId, f: impl FnOnce() -> R) -> R {
        let lock = Arc::clone(self.locks.entry(correlation_id).or_default().value());
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.locks
            .remove_if(&correlation_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Number of ids currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
