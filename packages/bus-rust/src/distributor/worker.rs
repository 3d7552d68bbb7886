//! Worker load records and the heartbeat that refreshes them.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use conduit_core::{ClockSource, Message};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Heartbeat announcing a worker's authoritative load for one message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerAvailable {
    /// Fully qualified name of the message type the worker consumes.
    pub message_type: String,
    pub control_address: String,
    pub data_address: String,
    pub in_progress: u32,
    pub in_progress_limit: u32,
    pub pending: u32,
    pub pending_limit: u32,
    /// When the worker produced this heartbeat, in milliseconds since Unix epoch.
    pub updated_ms: u64,
}

impl Message for WorkerAvailable {}

/// Untorn copy of a worker's counters and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerLoad {
    pub in_progress: u32,
    pub in_progress_limit: u32,
    pub pending: u32,
    pub pending_limit: u32,
    pub last_update: u64,
}

impl WorkerLoad {
    /// Work currently held by the worker.
    #[must_use]
    pub fn load(&self) -> u64 {
        u64::from(self.in_progress) + u64::from(self.pending)
    }

    /// Combined headroom: in-progress and pending slots are pooled.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        u64::from(self.in_progress_limit) + u64::from(self.pending_limit)
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.load() < self.capacity()
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    in_progress_limit: u32,
    pending: u32,
    pending_limit: u32,
}

/// Live load state of one remote worker.
///
/// `add` is a lock-free increment usable from any number of dispatch
/// threads. Heartbeat updates replace every counter under the write lock,
/// and snapshots read under the read lock, so a snapshot never mixes
/// counts from two heartbeats.
pub struct WorkerDetails {
    control_address: String,
    data_address: String,
    in_progress: AtomicU32,
    last_update: AtomicU64,
    limits: RwLock<Limits>,
    clock: Arc<dyn ClockSource>,
}

impl WorkerDetails {
    pub fn new(
        control_address: impl Into<String>,
        data_address: impl Into<String>,
        in_progress_limit: u32,
        pending_limit: u32,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            control_address: control_address.into(),
            data_address: data_address.into(),
            in_progress: AtomicU32::new(0),
            last_update: AtomicU64::new(clock.now()),
            limits: RwLock::new(Limits {
                in_progress_limit,
                pending: 0,
                pending_limit,
            }),
            clock,
        }
    }

    #[must_use]
    pub fn control_address(&self) -> &str {
        &self.control_address
    }

    #[must_use]
    pub fn data_address(&self) -> &str {
        &self.data_address
    }

    /// Records one more message assigned to this worker.
    pub fn add(&self) {
        self.in_progress.fetch_add(1, Ordering::AcqRel);
        self.last_update.fetch_max(self.clock.now(), Ordering::AcqRel);
    }

    /// Takes back an assignment that never reached the worker.
    pub fn release(&self) {
        let _ = self
            .in_progress
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }

    /// Replaces counters and limits with a worker's authoritative report.
    pub fn update_in_progress(
        &self,
        in_progress: u32,
        in_progress_limit: u32,
        pending: u32,
        pending_limit: u32,
        updated_ms: u64,
    ) {
        let mut limits = self.limits.write();
        self.in_progress.store(in_progress, Ordering::Release);
        limits.in_progress_limit = in_progress_limit;
        limits.pending = pending;
        limits.pending_limit = pending_limit;
        self.last_update.fetch_max(updated_ms, Ordering::AcqRel);
    }

    /// Applies a heartbeat.
    pub fn apply(&self, heartbeat: &WorkerAvailable) {
        self.update_in_progress(
            heartbeat.in_progress,
            heartbeat.in_progress_limit,
            heartbeat.pending,
            heartbeat.pending_limit,
            heartbeat.updated_ms,
        );
    }

    #[must_use]
    pub fn snapshot(&self) -> WorkerLoad {
        let limits = self.limits.read();
        WorkerLoad {
            in_progress: self.in_progress.load(Ordering::Acquire),
            in_progress_limit: limits.in_progress_limit,
            pending: limits.pending,
            pending_limit: limits.pending_limit,
            last_update: self.last_update.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for WorkerDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDetails")
            .field("control_address", &self.control_address)
            .field("data_address", &self.data_address)
            .field("load", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::ManualClock;

    use super::*;

    fn worker(clock: &Arc<ManualClock>) -> WorkerDetails {
        WorkerDetails::new(
            "loopback://localhost/control",
            "loopback://localhost/data",
            4,
            2,
            clock.clone(),
        )
    }

    #[test]
    fn add_increments_and_touches_last_update() {
        let clock = Arc::new(ManualClock::new(100));
        let w = worker(&clock);
        clock.set(250);
        w.add();

        let load = w.snapshot();
        assert_eq!(load.in_progress, 1);
        assert_eq!(load.last_update, 250);
    }

    #[test]
    fn add_never_rewinds_a_newer_heartbeat() {
        let clock = Arc::new(ManualClock::new(100));
        let w = worker(&clock);
        w.update_in_progress(0, 4, 0, 2, 500);
        w.add();
        assert_eq!(w.snapshot().last_update, 500);
    }

    #[test]
    fn release_undoes_one_add_and_stops_at_zero() {
        let clock = Arc::new(ManualClock::new(0));
        let w = worker(&clock);
        w.add();
        w.add();
        w.release();
        assert_eq!(w.snapshot().in_progress, 1);
        w.release();
        w.release();
        assert_eq!(w.snapshot().in_progress, 0);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let clock = Arc::new(ManualClock::new(0));
        let w = worker(&clock);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        w.add();
                    }
                });
            }
        });
        assert_eq!(w.snapshot().in_progress, 8_000);
    }

    #[test]
    fn snapshot_never_mixes_two_heartbeats() {
        let clock = Arc::new(ManualClock::new(0));
        let w = worker(&clock);
        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..2_000 {
                    if i % 2 == 0 {
                        w.update_in_progress(1, 1, 1, 1, 0);
                    } else {
                        w.update_in_progress(9, 9, 9, 9, 0);
                    }
                }
            });
            s.spawn(|| {
                for _ in 0..2_000 {
                    let load = w.snapshot();
                    let fields = [load.in_progress, load.in_progress_limit, load.pending, load.pending_limit];
                    assert!(fields.iter().all(|f| *f == fields[0]), "torn snapshot: {load:?}");
                }
            });
        });
    }

    #[test]
    fn heartbeat_replaces_counts_and_limits() {
        let clock = Arc::new(ManualClock::new(10));
        let w = worker(&clock);
        w.add();
        w.apply(&WorkerAvailable {
            message_type: "Job".into(),
            control_address: w.control_address().into(),
            data_address: w.data_address().into(),
            in_progress: 3,
            in_progress_limit: 5,
            pending: 1,
            pending_limit: 0,
            updated_ms: 40,
        });

        let load = w.snapshot();
        assert_eq!((load.in_progress, load.in_progress_limit, load.pending, load.pending_limit), (3, 5, 1, 0));
        assert_eq!(load.last_update, 40);
        assert_eq!(load.load(), 4);
        assert!(load.is_available());
    }

    #[test]
    fn combined_capacity_pools_in_progress_and_pending_headroom() {
        // Over the in-progress limit, but the pending slack keeps it eligible.
        let load = WorkerLoad {
            in_progress: 5,
            in_progress_limit: 4,
            pending: 0,
            pending_limit: 2,
            last_update: 0,
        };
        assert!(load.is_available());
    }
}
