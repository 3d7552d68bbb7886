//! The service bus: pipeline, input endpoint, and receive loop in one place.

pub mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use conduit_core::{serializer_for, Message};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::BusConfig;
use crate::connector::{HandlerConnector, SubscriptionConnector};
use crate::distributor::{Distributor, DistributorConnector, WorkerAvailable, WorkerPool};
use crate::endpoint::{Endpoint, EndpointCache};
use crate::error::BusError;
use crate::outbound::OutboundInterceptor;
use crate::pipeline::{Handler, HandlerSink, InboundPipeline, SelectiveHandlerSink, UnsubscribeToken};
use crate::registry::MessageTypeRegistry;
use crate::saga::{SagaConnector, SagaStateMachine};
use crate::telemetry;
use crate::transport::{ReceiveAction, ReceiveContext};

pub use shutdown::{HealthState, InFlightGuard, ShutdownController};

/// Receives from one input endpoint and dispatches into an inbound pipeline.
///
/// Lifecycle: build with [`ServiceBus::new`], subscribe, [`start`](Self::start)
/// the receive loop, and [`stop`](Self::stop) to drain and release transports.
/// Dropping a bus without stopping it disposes the input transport, which
/// ends the receive loop.
pub struct ServiceBus {
    config: BusConfig,
    pipeline: InboundPipeline,
    endpoints: Arc<EndpointCache>,
    input: Arc<Endpoint>,
    registry: Arc<MessageTypeRegistry>,
    shutdown: Arc<ShutdownController>,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceBus {
    /// # Errors
    ///
    /// Returns [`BusError::Configuration`] if the input address has no transport.
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        let endpoints = Arc::new(EndpointCache::new(serializer_for(config.content_type)));
        let input = endpoints.get_endpoint(&config.input_address)?;
        telemetry::register_metrics();
        tracing::info!(
            input = %config.input_address,
            content_type = config.content_type.mime(),
            "service bus created"
        );
        Ok(Self {
            config,
            pipeline: InboundPipeline::new(),
            endpoints,
            input,
            registry: Arc::new(MessageTypeRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
            receive_loop: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn pipeline(&self) -> &InboundPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn input(&self) -> &Arc<Endpoint> {
        &self.input
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<MessageTypeRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.shutdown.health_state()
    }

    /// Resolves an endpoint through the bus's endpoint cache.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Configuration`] for unsupported addresses.
    pub fn endpoint(&self, address: &str) -> Result<Arc<Endpoint>, BusError> {
        self.endpoints.get_endpoint(address)
    }

    /// Makes `M` decodable by the receive loop.
    pub fn register_message_type<M: Message + DeserializeOwned>(&self) {
        self.registry.register::<M>();
    }

    /// Subscribes a handler and registers `M` for decoding.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] once the bus has stopped.
    pub fn subscribe_handler<M, F>(&self, handler: F) -> Result<UnsubscribeToken, BusError>
    where
        M: Message + DeserializeOwned,
        F: Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_message_type::<M>();
        self.subscribe(&HandlerConnector::new(handler))
    }

    /// Subscribes a handler that only sees messages matching `condition`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] once the bus has stopped.
    pub fn subscribe_conditional_handler<M, C, F>(
        &self,
        condition: C,
        handler: F,
    ) -> Result<UnsubscribeToken, BusError>
    where
        M: Message + DeserializeOwned,
        C: Fn(&M) -> bool + Send + Sync + 'static,
        F: Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_message_type::<M>();
        self.subscribe(&HandlerConnector::<M>::from_sink(
            HandlerSink::<M>::new(handler).with_condition(condition),
        ))
    }

    /// Subscribes a selector that picks a handler per message, or declines
    /// the message by returning `None`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] once the bus has stopped.
    pub fn subscribe_selective_handler<M, S>(&self, selector: S) -> Result<UnsubscribeToken, BusError>
    where
        M: Message + DeserializeOwned,
        S: Fn(&M) -> Option<Handler<M>> + Send + Sync + 'static,
    {
        self.register_message_type::<M>();
        self.subscribe(&HandlerConnector::<M>::from_sink(SelectiveHandlerSink::<M>::new(selector)))
    }

    /// Connects a saga. Its message types must be registered separately
    /// with [`register_message_type`](Self::register_message_type) to be
    /// received from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Configuration`] for a connector without bindings.
    pub fn subscribe_saga<S: SagaStateMachine>(
        &self,
        connector: &SagaConnector<S>,
    ) -> Result<UnsubscribeToken, BusError> {
        self.subscribe(connector)
    }

    /// Creates and connects a distributor for `M` fed by worker heartbeats.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] once the bus has stopped.
    pub fn subscribe_distributor<M>(&self) -> Result<(Arc<Distributor<M>>, UnsubscribeToken), BusError>
    where
        M: Message + Serialize + DeserializeOwned,
    {
        self.register_message_type::<M>();
        self.register_message_type::<WorkerAvailable>();
        let pool = Arc::new(WorkerPool::new(self.config.distributor.clone()));
        let distributor = Arc::new(Distributor::new(pool, Arc::clone(&self.endpoints)));
        let token = self.subscribe(&DistributorConnector::new(Arc::clone(&distributor)))?;
        Ok((distributor, token))
    }

    /// Connects any subscription connector.
    ///
    /// # Errors
    ///
    /// Propagates the connector's error.
    pub fn subscribe(&self, connector: &dyn SubscriptionConnector) -> Result<UnsubscribeToken, BusError> {
        self.pipeline.connect(connector)
    }

    /// Adds an interceptor around every envelope this bus sends.
    pub fn add_outbound_interceptor(&self, interceptor: Arc<dyn OutboundInterceptor>) -> UnsubscribeToken {
        self.endpoints.outbound().add_interceptor(interceptor)
    }

    /// Sends `message` to this bus's own input queue.
    ///
    /// # Errors
    ///
    /// Returns a serialization failure, or [`BusError::Disposed`] after stop.
    pub fn publish<M: Message + Serialize>(&self, message: &M) -> Result<(), BusError> {
        self.input.send(message)
    }

    /// Sends `message` to another address.
    ///
    /// # Errors
    ///
    /// Returns a configuration, serialization, or transport failure.
    pub fn send_to<M: Message + Serialize>(&self, address: &str, message: &M) -> Result<(), BusError> {
        self.endpoints.get_endpoint(address)?.send(message)
    }

    /// Dispatches `message` in-process, bypassing the transport.
    ///
    /// # Errors
    ///
    /// See [`InboundPipeline::dispatch_any`].
    pub fn dispatch<M: Message>(&self, message: M) -> Result<usize, BusError> {
        self.pipeline.dispatch(message)
    }

    /// Spawns the receive loop on a blocking task of the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Configuration`] outside a tokio runtime or when
    /// already started, and [`BusError::Disposed`] after stop.
    pub fn start(&self) -> Result<(), BusError> {
        if self.shutdown.is_shutting_down() {
            return Err(BusError::disposed("service bus"));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            BusError::Configuration("the receive loop requires a tokio runtime".to_string())
        })?;
        let mut slot = self.receive_loop.lock();
        if slot.is_some() {
            return Err(BusError::Configuration("service bus already started".to_string()));
        }

        let receiver = ReceiveLoop {
            input: Arc::clone(&self.input),
            pipeline: self.pipeline.clone(),
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            timeout: Duration::from_millis(self.config.receive_timeout_ms),
        };
        *slot = Some(runtime.spawn_blocking(move || receiver.run()));
        self.shutdown.set_ready();
        tracing::info!(input = %self.config.input_address, "service bus started");
        Ok(())
    }

    /// Stops receiving, waits for in-flight deliveries, then tears down the
    /// pipeline and every transport. Returns `false` if draining timed out.
    pub async fn stop(&self) -> bool {
        self.shutdown.trigger_shutdown();
        let handle = self.receive_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "receive loop terminated abnormally");
            }
        }

        let drained = self
            .shutdown
            .wait_for_drain(Duration::from_millis(self.config.drain_timeout_ms))
            .await;
        if !drained {
            tracing::warn!(in_flight = self.shutdown.in_flight_count(), "drain timed out");
        }
        self.pipeline.shutdown();
        self.endpoints.clear();
        tracing::info!(drained, "service bus stopped");
        drained
    }
}

impl Drop for ServiceBus {
    fn drop(&mut self) {
        self.shutdown.trigger_shutdown();
        self.input.transport().dispose();
    }
}

impl std::fmt::Debug for ServiceBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBus")
            .field("input", &self.config.input_address)
            .field("state", &self.health_state())
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

struct ReceiveLoop {
    input: Arc<Endpoint>,
    pipeline: InboundPipeline,
    registry: Arc<MessageTypeRegistry>,
    shutdown: Arc<ShutdownController>,
    timeout: Duration,
}

impl ReceiveLoop {
    fn run(self) {
        let mut callback = |context: &ReceiveContext<'_>| self.accept(context);
        while !self.shutdown.is_shutting_down() {
            match self.input.transport().receive(&mut callback, self.timeout) {
                Ok(_) => {}
                Err(err) if err.is_disposed() => break,
                Err(err) => {
                    tracing::error!(error = %err, "receive failed");
                    std::thread::sleep(self.timeout);
                }
            }
        }
        tracing::debug!(input = self.input.address(), "receive loop exited");
    }

    /// Acceptance for one queued message: decode, then ask the pipeline.
    /// Returns an action only when some consumer accepted.
    fn accept(&self, context: &ReceiveContext<'_>) -> Option<ReceiveAction> {
        if self.shutdown.is_shutting_down() {
            return None;
        }
        let message = self
            .input
            .deserialize(context)
            .and_then(|envelope| self.registry.decode(&envelope));
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(
                    message_id = %context.message_id,
                    message_type = context.message_type,
                    error = %err,
                    "cannot decode received message"
                );
                return None;
            }
        };

        let deliveries = match self.pipeline.enumerate(&message) {
            Ok(deliveries) if !deliveries.is_empty() => deliveries,
            Ok(_) => {
                tracing::debug!(message_type = %message.message_type(), "no consumer accepted message");
                return None;
            }
            Err(err) => {
                tracing::debug!(error = %err, "pipeline unavailable");
                return None;
            }
        };

        let guard = self.shutdown.in_flight_guard();
        let message_type = message.message_type();
        Some(Box::new(move || {
            let _guard = guard;
            if let Err(err) = InboundPipeline::deliver_all(deliveries) {
                tracing::warn!(message_type = %message_type, error = %err, "delivery failed");
            }
        }))
    }
}
