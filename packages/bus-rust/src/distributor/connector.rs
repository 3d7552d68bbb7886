use std::sync::Arc;

use conduit_core::{Message, MessageType};
use serde::Serialize;

use super::worker::WorkerAvailable;
use super::Distributor;
use crate::connector::SubscriptionConnector;
use crate::error::BusError;
use crate::pipeline::{Consumer, HandlerSink, InboundPipeline, MessageSink, UnsubscribeToken};

/// Pipeline sink that hands messages to a [`Distributor`] while a worker has room.
pub struct DistributorSink<M: Message> {
    distributor: Arc<Distributor<M>>,
}

impl<M: Message + Serialize> DistributorSink<M> {
    pub fn new(distributor: Arc<Distributor<M>>) -> Self {
        Self { distributor }
    }
}

impl<M: Message + Serialize> MessageSink<M> for DistributorSink<M> {
    fn accept(&self, message: &Arc<M>) -> Option<Consumer<M>> {
        if !self.distributor.accept(message) {
            return None;
        }
        let distributor = Arc::clone(&self.distributor);
        Some(Box::new(move |msg: Arc<M>| distributor.consume(&msg)))
    }

    fn description(&self) -> &str {
        "Distributor"
    }
}

/// Subscribes a distributor for `M` and its pool for `M`'s worker heartbeats.
pub struct DistributorConnector<M: Message> {
    distributor: Arc<Distributor<M>>,
}

impl<M: Message + Serialize> DistributorConnector<M> {
    pub fn new(distributor: Arc<Distributor<M>>) -> Self {
        Self { distributor }
    }
}

impl<M: Message + Serialize> SubscriptionConnector for DistributorConnector<M> {
    fn connect(&self, pipeline: &InboundPipeline) -> Result<UnsubscribeToken, BusError> {
        let message_type = MessageType::of::<M>();
        let pool = Arc::clone(self.distributor.pool());
        let heartbeats = HandlerSink::new(move |heartbeat: &WorkerAvailable| {
            pool.update(heartbeat);
            Ok(())
        })
        .with_condition(move |heartbeat: &WorkerAvailable| {
            heartbeat.message_type == message_type.name()
        });

        let token = pipeline.configure(|cfg| {
            cfg.subscribe::<M, _>(DistributorSink::new(Arc::clone(&self.distributor)));
            cfg.subscribe::<WorkerAvailable, _>(heartbeats);
            Ok(())
        })?;
        tracing::info!(message_type = %message_type, "distributor connected");
        Ok(token)
    }
}
