use std::fmt::Debug;

use conduit_core::{CorrelationId, MessageType};

/// A long-running conversation identified by a correlation id.
///
/// Instances are cloned out of the repository, mutated, and saved back, so
/// `Clone` must produce an independent copy.
pub trait Saga: Clone + Debug + Send + Sync + 'static {
    /// Finite set of named states, e.g. `Initial`, `Active`, `Completed`.
    type State: Copy + Eq + Debug + Send + Sync;

    /// Builds a fresh instance in its initial state.
    fn new(correlation_id: CorrelationId) -> Self;

    fn correlation_id(&self) -> CorrelationId;

    fn current_state(&self) -> Self::State;
}

/// A saga driven by explicit events.
pub trait SagaStateMachine: Saga {
    type Event: Debug + Send + 'static;

    /// Applies one event. On error the instance may be left half-updated;
    /// the dispatcher discards it rather than saving.
    ///
    /// # Errors
    ///
    /// Returns the domain's reason for refusing the transition.
    fn apply(&mut self, event: Self::Event) -> anyhow::Result<()>;
}

/// Short type name used in logs, metrics, and errors.
pub(crate) fn saga_name<S: Saga>() -> &'static str {
    MessageType::of::<S>().short_name()
}
