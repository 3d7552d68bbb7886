//! Builder that binds message shapes to a saga and wires them into a pipeline.

use std::sync::Arc;

use conduit_core::{CorrelatedBy, Message, MessageType};

use super::locks::InstanceLocks;
use super::policy::{CorrelatedPolicy, CreateOrUseExistingPolicy, InitiatingPolicy, SagaPolicy};
use super::repository::SagaRepository;
use super::sink::{Correlation, SagaMessageSink};
use super::state_machine::{saga_name, SagaStateMachine};
use crate::connector::SubscriptionConnector;
use crate::error::BusError;
use crate::pipeline::{InboundPipeline, PipelineConfigurator, UnsubscribeToken};

type Binding = Box<dyn Fn(&mut PipelineConfigurator<'_>) + Send + Sync>;

/// Connects saga `S` for every message shape bound to it.
///
/// All bindings share one repository and one per-instance lock table, so a
/// correlated message and an observed message for the same instance are
/// serialized. Connecting yields a single token covering every binding.
pub struct SagaConnector<S: SagaStateMachine> {
    repository: Arc<dyn SagaRepository<S>>,
    locks: InstanceLocks,
    bindings: Vec<Binding>,
    message_types: Vec<MessageType>,
}

impl<S: SagaStateMachine> SagaConnector<S> {
    pub fn new(repository: Arc<dyn SagaRepository<S>>) -> Self {
        Self {
            repository,
            locks: InstanceLocks::new(),
            bindings: Vec::new(),
            message_types: Vec::new(),
        }
    }

    /// `M` starts a new instance; a second `M` for a live instance is a
    /// [`BusError::CorrelationConflict`].
    #[must_use]
    pub fn initiated_by<M>(self, event: impl Fn(&M) -> S::Event + Send + Sync + 'static) -> Self
    where
        M: Message + CorrelatedBy,
    {
        self.bind::<M>(
            Arc::new(InitiatingPolicy),
            Correlation::ById(<M as CorrelatedBy>::correlation_id),
            event,
        )
    }

    /// `M` updates a live instance and is ignored when none exists.
    #[must_use]
    pub fn orchestrated_by<M>(self, event: impl Fn(&M) -> S::Event + Send + Sync + 'static) -> Self
    where
        M: Message + CorrelatedBy,
    {
        self.bind::<M>(
            Arc::new(CorrelatedPolicy),
            Correlation::ById(<M as CorrelatedBy>::correlation_id),
            event,
        )
    }

    /// `M` starts an instance when none exists and updates it otherwise.
    #[must_use]
    pub fn initiated_or_orchestrated_by<M>(
        self,
        event: impl Fn(&M) -> S::Event + Send + Sync + 'static,
    ) -> Self
    where
        M: Message + CorrelatedBy,
    {
        self.bind::<M>(
            Arc::new(CreateOrUseExistingPolicy),
            Correlation::ById(<M as CorrelatedBy>::correlation_id),
            event,
        )
    }

    /// `M` carries no correlation id; it updates every live instance for
    /// which `matcher` holds.
    #[must_use]
    pub fn observes<M: Message>(
        self,
        matcher: impl Fn(&S, &M) -> bool + Send + Sync + 'static,
        event: impl Fn(&M) -> S::Event + Send + Sync + 'static,
    ) -> Self {
        self.bind::<M>(
            Arc::new(CorrelatedPolicy),
            Correlation::Query(Arc::new(matcher)),
            event,
        )
    }

    fn bind<M: Message>(
        mut self,
        policy: Arc<dyn SagaPolicy<M>>,
        correlation: Correlation<S, M>,
        event: impl Fn(&M) -> S::Event + Send + Sync + 'static,
    ) -> Self {
        let repository = Arc::clone(&self.repository);
        let locks = self.locks.clone();
        let event: Arc<dyn Fn(&M) -> S::Event + Send + Sync> = Arc::new(event);
        self.message_types.push(MessageType::of::<M>());
        self.bindings.push(Box::new(move |cfg: &mut PipelineConfigurator<'_>| {
            cfg.subscribe::<M, _>(SagaMessageSink::new(
                Arc::clone(&repository),
                Arc::clone(&policy),
                correlation.clone(),
                Arc::clone(&event),
                locks.clone(),
            ));
        }));
        self
    }

    /// Shapes bound so far, in binding order.
    #[must_use]
    pub fn message_types(&self) -> &[MessageType] {
        &self.message_types
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn SagaRepository<S>> {
        &self.repository
    }
}

impl<S: SagaStateMachine> SubscriptionConnector for SagaConnector<S> {
    fn connect(&self, pipeline: &InboundPipeline) -> Result<UnsubscribeToken, BusError> {
        if self.bindings.is_empty() {
            return Err(BusError::Configuration(format!(
                "saga {} has no message bindings",
                saga_name::<S>()
            )));
        }
        let token = pipeline.configure(|cfg| {
            for binding in &self.bindings {
                binding(cfg);
            }
            Ok(())
        })?;
        tracing::info!(saga_type = saga_name::<S>(), bindings = self.bindings.len(), "saga connected");
        Ok(token)
    }
}
