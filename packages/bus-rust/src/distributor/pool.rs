use std::sync::Arc;

use conduit_core::{ClockSource, SystemClock};
use dashmap::DashMap;

use super::worker::{WorkerAvailable, WorkerDetails};
use crate::config::DistributorConfig;

/// Workers known to one distributor, keyed by data address.
pub struct WorkerPool {
    workers: DashMap<String, Arc<WorkerDetails>>,
    defaults: DistributorConfig,
    clock: Arc<dyn ClockSource>,
}

impl WorkerPool {
    pub fn new(defaults: DistributorConfig) -> Self {
        Self::with_clock(defaults, Arc::new(SystemClock))
    }

    pub fn with_clock(defaults: DistributorConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            workers: DashMap::new(),
            defaults,
            clock,
        }
    }

    /// Registers a worker with the default limits, or returns the existing entry.
    pub fn register(&self, control_address: &str, data_address: &str) -> Arc<WorkerDetails> {
        let entry = self
            .workers
            .entry(data_address.to_string())
            .or_insert_with(|| {
                tracing::info!(data_address, control_address, "worker registered");
                Arc::new(WorkerDetails::new(
                    control_address,
                    data_address,
                    self.defaults.default_in_progress_limit,
                    self.defaults.default_pending_limit,
                    Arc::clone(&self.clock),
                ))
            });
        Arc::clone(entry.value())
    }

    /// Forgets a worker. Returns `true` if it was known.
    pub fn deregister(&self, data_address: &str) -> bool {
        let removed = self.workers.remove(data_address).is_some();
        if removed {
            tracing::info!(data_address, "worker deregistered");
        }
        removed
    }

    /// Applies a heartbeat, registering the worker on first sight.
    pub fn update(&self, heartbeat: &WorkerAvailable) -> Arc<WorkerDetails> {
        let worker = self.register(&heartbeat.control_address, &heartbeat.data_address);
        worker.apply(heartbeat);
        tracing::debug!(
            data_address = %heartbeat.data_address,
            in_progress = heartbeat.in_progress,
            pending = heartbeat.pending,
            "worker heartbeat"
        );
        worker
    }

    #[must_use]
    pub fn get(&self, data_address: &str) -> Option<Arc<WorkerDetails>> {
        self.workers.get(data_address).map(|entry| Arc::clone(entry.value()))
    }

    /// Current workers ordered by data address.
    #[must_use]
    pub fn candidates(&self) -> Vec<Arc<WorkerDetails>> {
        let mut workers: Vec<_> = self
            .workers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        workers.sort_by(|a, b| a.data_address().cmp(b.data_address()));
        workers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(data: &str, in_progress: u32) -> WorkerAvailable {
        WorkerAvailable {
            message_type: "Job".into(),
            control_address: format!("{data}-control"),
            data_address: data.into(),
            in_progress,
            in_progress_limit: 8,
            pending: 0,
            pending_limit: 0,
            updated_ms: 1,
        }
    }

    #[test]
    fn register_uses_configured_defaults_once() {
        let pool = WorkerPool::new(DistributorConfig {
            default_in_progress_limit: 2,
            default_pending_limit: 1,
        });
        let first = pool.register("c", "loopback://localhost/w1");
        let again = pool.register("c", "loopback://localhost/w1");

        assert!(Arc::ptr_eq(&first, &again));
        let load = first.snapshot();
        assert_eq!((load.in_progress_limit, load.pending_limit), (2, 1));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn heartbeat_registers_and_updates() {
        let pool = WorkerPool::new(DistributorConfig::default());
        pool.update(&heartbeat("loopback://localhost/w2", 0));
        pool.update(&heartbeat("loopback://localhost/w1", 3));

        let w1 = pool.get("loopback://localhost/w1").unwrap();
        assert_eq!(w1.snapshot().in_progress, 3);
        assert_eq!(w1.snapshot().in_progress_limit, 8);

        let order: Vec<_> = pool
            .candidates()
            .iter()
            .map(|w| w.data_address().to_string())
            .collect();
        assert_eq!(order, ["loopback://localhost/w1", "loopback://localhost/w2"]);
    }

    #[test]
    fn deregister_removes_worker() {
        let pool = WorkerPool::new(DistributorConfig::default());
        pool.register("c", "loopback://localhost/w1");
        assert!(pool.deregister("loopback://localhost/w1"));
        assert!(!pool.deregister("loopback://localhost/w1"));
        assert!(pool.is_empty());
    }
}
