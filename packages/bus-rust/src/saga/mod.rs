//! Correlation-driven sagas.
//!
//! A saga is a state machine persisted in a [`SagaRepository`] and keyed by
//! [`CorrelationId`](conduit_core::CorrelationId). A [`SagaConnector`] binds
//! message shapes to state-machine events, each with a [`SagaPolicy`] that
//! decides whether the message creates an instance, updates one, or is
//! dropped. Dispatch for one instance is serialized by [`InstanceLocks`].

pub mod connector;
pub mod locks;
pub mod policy;
pub mod repository;
pub mod sink;
pub mod state_machine;

pub use connector::SagaConnector;
pub use locks::InstanceLocks;
pub use policy::{
    CorrelatedPolicy, CreateOrUseExistingPolicy, InitiatingPolicy, PolicyDecision, SagaPolicy,
};
pub use repository::{InMemorySagaRepository, SagaRepository};
pub use sink::{Correlation, SagaMessageSink};
pub use state_machine::{Saga, SagaStateMachine};
