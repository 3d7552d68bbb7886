//! The saga dispatch sink.
//!
//! Acceptance consults the policy against the repository and declines
//! messages the policy would ignore, so nothing is locked or mutated for
//! them. Delivery repeats the decision inside the instance's critical
//! section: resolve, decide, apply the event to a copy, save the copy. A
//! failed transition saves nothing.

use std::sync::Arc;

use conduit_core::{CorrelationId, Message, MessageType};

use super::locks::InstanceLocks;
use super::policy::{PolicyDecision, SagaPolicy};
use super::repository::SagaRepository;
use super::state_machine::{saga_name, SagaStateMachine};
use crate::error::BusError;
use crate::pipeline::{Consumer, MessageSink};
use crate::telemetry::{self, SagaOutcome};

/// Maps an event-producing message to a state-machine event.
pub type EventFn<S, M> = Arc<dyn Fn(&M) -> <S as SagaStateMachine>::Event + Send + Sync>;

/// Matches observed messages to existing instances.
pub type Matcher<S, M> = Arc<dyn Fn(&S, &M) -> bool + Send + Sync>;

/// How a message finds its saga instance.
pub enum Correlation<S, M> {
    /// The message carries the correlation id.
    ById(fn(&M) -> CorrelationId),
    /// The message is matched against stored instances.
    Query(Matcher<S, M>),
}

impl<S, M> Clone for Correlation<S, M> {
    fn clone(&self) -> Self {
        match self {
            Self::ById(f) => Self::ById(*f),
            Self::Query(matcher) => Self::Query(Arc::clone(matcher)),
        }
    }
}

struct SagaDispatch<S: SagaStateMachine, M: Message> {
    repository: Arc<dyn SagaRepository<S>>,
    policy: Arc<dyn SagaPolicy<M>>,
    correlation: Correlation<S, M>,
    event: EventFn<S, M>,
    locks: InstanceLocks,
}

impl<S: SagaStateMachine, M: Message> SagaDispatch<S, M> {
    fn repository_error(source: anyhow::Error) -> BusError {
        BusError::Repository {
            saga_type: saga_name::<S>(),
            source,
        }
    }

    fn would_accept(&self, message: &M) -> bool {
        match &self.correlation {
            Correlation::ById(correlation_id) => {
                let id = correlation_id(message);
                match self.repository.get_by_id(id) {
                    Ok(found) => {
                        self.policy.decide(message, found.is_some()) != PolicyDecision::Ignore
                    }
                    // Accept so delivery surfaces the failure.
                    Err(_) => true,
                }
            }
            Correlation::Query(matcher) => self
                .repository
                .find(&|saga: &S| matcher(saga, message))
                .map_or(true, |ids| !ids.is_empty()),
        }
    }

    fn consume(&self, message: &M) -> Result<(), BusError> {
        match &self.correlation {
            Correlation::ById(correlation_id) => {
                let id = correlation_id(message);
                self.locks.with_lock(id, || self.dispatch_locked(message, id, None))
            }
            Correlation::Query(matcher) => {
                let ids = self
                    .repository
                    .find(&|saga: &S| matcher(saga, message))
                    .map_err(Self::repository_error)?;
                let mut first_error = None;
                for id in ids {
                    let result =
                        self.locks
                            .with_lock(id, || self.dispatch_locked(message, id, Some(matcher)));
                    if let Err(err) = result {
                        tracing::warn!(saga_type = saga_name::<S>(), correlation_id = %id, error = %err, "observed message failed");
                        first_error.get_or_insert(err);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
        }
    }

    fn dispatch_locked(
        &self,
        message: &M,
        id: CorrelationId,
        matcher: Option<&Matcher<S, M>>,
    ) -> Result<(), BusError> {
        let saga_type = saga_name::<S>();
        let message_type = MessageType::of::<M>().short_name();

        let existing = self
            .repository
            .get_by_id(id)
            .map_err(Self::repository_error)?
            // An observed instance may have changed since the query ran.
            .filter(|saga| matcher.map_or(true, |matches| matches(saga, message)));

        let (mut saga, outcome) = match (self.policy.decide(message, existing.is_some()), existing) {
            (PolicyDecision::CreateNew, _) => (S::new(id), SagaOutcome::Created),
            (PolicyDecision::UseExisting, Some(saga)) => (saga, SagaOutcome::Updated),
            (PolicyDecision::UseExisting | PolicyDecision::Ignore, _) => {
                tracing::debug!(saga_type, message_type, correlation_id = %id, "message ignored by saga policy");
                telemetry::record_saga_outcome(saga_type, SagaOutcome::Ignored);
                return Ok(());
            }
            (PolicyDecision::Reject, _) => {
                tracing::warn!(saga_type, message_type, correlation_id = %id, "initiating message for existing saga");
                telemetry::record_saga_outcome(saga_type, SagaOutcome::Conflict);
                return Err(BusError::CorrelationConflict {
                    saga_type,
                    message_type,
                    correlation_id: id,
                });
            }
        };

        if let Err(reason) = saga.apply((self.event)(message)) {
            tracing::warn!(saga_type, message_type, correlation_id = %id, error = %reason, "saga transition failed");
            telemetry::record_saga_outcome(saga_type, SagaOutcome::Faulted);
            return Err(BusError::TransitionFault {
                saga_type,
                message_type,
                correlation_id: id,
                reason,
            });
        }

        let state = saga.current_state();
        self.repository.save(saga).map_err(Self::repository_error)?;
        tracing::debug!(saga_type, message_type, correlation_id = %id, state = ?state, outcome = outcome.as_str(), "saga updated");
        telemetry::record_saga_outcome(saga_type, outcome);
        Ok(())
    }
}

/// Pipeline sink delivering messages of shape `M` to saga `S`.
pub struct SagaMessageSink<S: SagaStateMachine, M: Message> {
    dispatch: Arc<SagaDispatch<S, M>>,
    description: String,
}

impl<S: SagaStateMachine, M: Message> SagaMessageSink<S, M> {
    pub fn new(
        repository: Arc<dyn SagaRepository<S>>,
        policy: Arc<dyn SagaPolicy<M>>,
        correlation: Correlation<S, M>,
        event: EventFn<S, M>,
        locks: InstanceLocks,
    ) -> Self {
        let kind = match correlation {
            Correlation::ById(_) => "Correlated Saga",
            Correlation::Query(_) => "Observed Saga",
        };
        Self {
            description: format!("{kind} {}", saga_name::<S>()),
            dispatch: Arc::new(SagaDispatch {
                repository,
                policy,
                correlation,
                event,
                locks,
            }),
        }
    }
}

impl<S: SagaStateMachine, M: Message> MessageSink<M> for SagaMessageSink<S, M> {
    fn accept(&self, message: &Arc<M>) -> Option<Consumer<M>> {
        if !self.dispatch.would_accept(message) {
            tracing::debug!(
                saga_type = saga_name::<S>(),
                message_type = MessageType::of::<M>().short_name(),
                "saga declined message"
            );
            return None;
        }
        let dispatch = Arc::clone(&self.dispatch);
        Some(Box::new(move |msg: Arc<M>| dispatch.consume(&msg)))
    }

    fn description(&self) -> &str {
        &self.description
    }
}
