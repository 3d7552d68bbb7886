//! Worker selection.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use super::worker::{WorkerDetails, WorkerLoad};

/// Picks a destination worker for an outbound message.
///
/// Candidates may change between [`has_available_worker`] and
/// [`select_worker`]; the two calls are independent reads, and a selected
/// worker may already be full by the time the caller uses it.
///
/// [`has_available_worker`]: Self::has_available_worker
/// [`select_worker`]: Self::select_worker
pub trait WorkerSelectionStrategy<M>: Send + Sync {
    fn has_available_worker(&self, candidates: &[Arc<WorkerDetails>], message: &M) -> bool;

    fn select_worker(
        &self,
        candidates: &[Arc<WorkerDetails>],
        message: &M,
    ) -> Option<Arc<WorkerDetails>>;
}

/// Least-loaded eligible worker, ties going to the most recently heard-from.
///
/// A worker is eligible while `in_progress + pending` is below
/// `in_progress_limit + pending_limit`.
pub struct DefaultWorkerSelectionStrategy<M> {
    _message: PhantomData<fn(&M)>,
}

impl<M> DefaultWorkerSelectionStrategy<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<M> Default for DefaultWorkerSelectionStrategy<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn preference(a: &WorkerLoad, b: &WorkerLoad) -> Ordering {
    a.load()
        .cmp(&b.load())
        .then_with(|| b.last_update.cmp(&a.last_update))
}

impl<M> WorkerSelectionStrategy<M> for DefaultWorkerSelectionStrategy<M> {
    fn has_available_worker(&self, candidates: &[Arc<WorkerDetails>], _message: &M) -> bool {
        candidates.iter().any(|worker| worker.snapshot().is_available())
    }

    fn select_worker(
        &self,
        candidates: &[Arc<WorkerDetails>],
        _message: &M,
    ) -> Option<Arc<WorkerDetails>> {
        candidates
            .iter()
            .map(|worker| (worker, worker.snapshot()))
            .filter(|(_, load)| load.is_available())
            .min_by(|(_, a), (_, b)| preference(a, b))
            .map(|(worker, _)| Arc::clone(worker))
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::ManualClock;
    use proptest::prelude::*;

    use super::*;

    struct Job;

    fn worker(
        name: &str,
        in_progress: u32,
        in_progress_limit: u32,
        pending: u32,
        pending_limit: u32,
        last_update: u64,
    ) -> Arc<WorkerDetails> {
        let clock = Arc::new(ManualClock::new(0));
        let details = WorkerDetails::new(
            format!("loopback://localhost/{name}-control"),
            format!("loopback://localhost/{name}"),
            in_progress_limit,
            pending_limit,
            clock,
        );
        details.update_in_progress(in_progress, in_progress_limit, pending, pending_limit, last_update);
        Arc::new(details)
    }

    fn strategy() -> DefaultWorkerSelectionStrategy<Job> {
        DefaultWorkerSelectionStrategy::new()
    }

    #[test]
    fn least_loaded_worker_is_selected() {
        let candidates = vec![worker("busy", 2, 3, 0, 0, 0), worker("idle", 1, 5, 0, 0, 0)];
        let selected = strategy().select_worker(&candidates, &Job).unwrap();
        assert_eq!(selected.data_address(), "loopback://localhost/idle");
    }

    #[test]
    fn tie_goes_to_latest_update() {
        let candidates = vec![worker("stale", 1, 5, 0, 0, 100), worker("recent", 1, 5, 0, 0, 200)];
        let selected = strategy().select_worker(&candidates, &Job).unwrap();
        assert_eq!(selected.data_address(), "loopback://localhost/recent");
    }

    #[test]
    fn full_worker_is_never_selected() {
        let full = vec![worker("full", 3, 3, 2, 2, 500)];
        assert!(!strategy().has_available_worker(&full, &Job));
        assert!(strategy().select_worker(&full, &Job).is_none());

        let mixed = vec![worker("full", 3, 3, 2, 2, 500), worker("heavy", 4, 5, 0, 0, 0)];
        let selected = strategy().select_worker(&mixed, &Job).unwrap();
        assert_eq!(selected.data_address(), "loopback://localhost/heavy");
    }

    #[test]
    fn eligibility_uses_combined_capacity() {
        // in_progress exceeds its own limit; pending headroom still admits work.
        // Checking each pair independently would reject this worker.
        let candidates = vec![worker("overcommitted", 4, 3, 0, 2, 0)];
        assert!(strategy().has_available_worker(&candidates, &Job));
        assert!(strategy().select_worker(&candidates, &Job).is_some());
    }

    #[test]
    fn empty_pool_has_no_worker() {
        assert!(!strategy().has_available_worker(&[], &Job));
        assert!(strategy().select_worker(&[], &Job).is_none());
    }

    proptest! {
        #[test]
        fn selection_is_never_beaten_by_another_eligible_worker(
            loads in proptest::collection::vec((0u32..6, 0u32..6, 0u32..4, 0u32..4, 0u64..4), 0..8),
        ) {
            let candidates: Vec<_> = loads
                .iter()
                .enumerate()
                .map(|(i, &(ip, ipl, p, pl, at))| worker(&format!("w{i}"), ip, ipl, p, pl, at))
                .collect();
            let eligible: Vec<WorkerLoad> = candidates
                .iter()
                .map(|w| w.snapshot())
                .filter(WorkerLoad::is_available)
                .collect();

            let selected = strategy().select_worker(&candidates, &Job);
            prop_assert_eq!(selected.is_some(), !eligible.is_empty());
            prop_assert_eq!(strategy().has_available_worker(&candidates, &Job), !eligible.is_empty());
            if let Some(selected) = selected {
                let chosen = selected.snapshot();
                prop_assert!(chosen.is_available());
                for other in &eligible {
                    prop_assert!(preference(&chosen, other) != Ordering::Greater);
                }
            }
        }
    }
}
