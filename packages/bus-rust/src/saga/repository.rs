//! Saga persistence contract and the in-memory reference store.

use conduit_core::CorrelationId;
use dashmap::DashMap;

use super::state_machine::Saga;

/// Storage for saga instances.
///
/// Saves for one correlation id must not interleave: a reader sees either
/// the previous instance or the new one, never a mix of fields. Callers
/// are responsible for the wider lookup-mutate-save critical section.
///
/// Used as `Arc<dyn SagaRepository<S>>`.
pub trait SagaRepository<S: Saga>: Send + Sync {
    /// Loads a copy of the instance, if one exists.
    ///
    /// # Errors
    ///
    /// Returns the backend's failure.
    fn get_by_id(&self, correlation_id: CorrelationId) -> anyhow::Result<Option<S>>;

    /// Inserts or replaces the instance keyed by its correlation id.
    ///
    /// # Errors
    ///
    /// Returns the backend's failure.
    fn save(&self, saga: S) -> anyhow::Result<()>;

    /// Correlation ids of every instance matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns the backend's failure.
    fn find(&self, filter: &dyn Fn(&S) -> bool) -> anyhow::Result<Vec<CorrelationId>>;
}

/// Concurrent in-memory repository backed by [`DashMap`].
#[derive(Debug)]
pub struct InMemorySagaRepository<S: Saga> {
    sagas: DashMap<CorrelationId, S>,
}

impl<S: Saga> InMemorySagaRepository<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sagas: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sagas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sagas.is_empty()
    }

    #[must_use]
    pub fn contains(&self, correlation_id: CorrelationId) -> bool {
        self.sagas.contains_key(&correlation_id)
    }

    /// Copies of every stored instance, in no particular order.
    #[must_use]
    pub fn all(&self) -> Vec<S> {
        self.sagas.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl<S: Saga> Default for InMemorySagaRepository<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Saga> SagaRepository<S> for InMemorySagaRepository<S> {
    fn get_by_id(&self, correlation_id: CorrelationId) -> anyhow::Result<Option<S>> {
        Ok(self.sagas.get(&correlation_id).map(|entry| entry.value().clone()))
    }

    fn save(&self, saga: S) -> anyhow::Result<()> {
        self.sagas.insert(saga.correlation_id(), saga);
        Ok(())
    }

    fn find(&self, filter: &dyn Fn(&S) -> bool) -> anyhow::Result<Vec<CorrelationId>> {
        Ok(self
            .sagas
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| *entry.key())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        id: CorrelationId,
        hits: u32,
    }

    impl Saga for Counter {
        type State = bool;

        fn new(correlation_id: CorrelationId) -> Self {
            Self {
                id: correlation_id,
                hits: 0,
            }
        }

        fn correlation_id(&self) -> CorrelationId {
            self.id
        }

        fn current_state(&self) -> bool {
            self.hits > 0
        }
    }

    #[test]
    fn saved_instance_is_returned_as_a_copy() {
        let repo = InMemorySagaRepository::new();
        let id = CorrelationId::new();
        repo.save(Counter { id, hits: 1 }).unwrap();

        let mut copy = repo.get_by_id(id).unwrap().unwrap();
        copy.hits = 99;
        assert_eq!(repo.get_by_id(id).unwrap().unwrap().hits, 1);
        assert!(repo.contains(id));
        assert!(repo.get_by_id(CorrelationId::new()).unwrap().is_none());
    }

    #[test]
    fn find_filters_on_instance_fields() {
        let repo = InMemorySagaRepository::new();
        let busy = CorrelationId::new();
        repo.save(Counter { id: busy, hits: 3 }).unwrap();
        repo.save(Counter::new(CorrelationId::new())).unwrap();

        assert_eq!(repo.find(&|c: &Counter| c.hits > 1).unwrap(), vec![busy]);
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.all().len(), 2);
    }
}
