//! Load-balanced distribution of outbound work across remote workers.

pub mod connector;
pub mod pool;
pub mod strategy;
pub mod worker;

use std::sync::Arc;

use conduit_core::{Message, MessageType};
use serde::Serialize;

use crate::endpoint::EndpointCache;
use crate::error::BusError;
use crate::telemetry;

pub use connector::{DistributorConnector, DistributorSink};
pub use pool::WorkerPool;
pub use strategy::{DefaultWorkerSelectionStrategy, WorkerSelectionStrategy};
pub use worker::{WorkerAvailable, WorkerDetails, WorkerLoad};

/// Sends each message of shape `M` to the worker chosen by its strategy.
pub struct Distributor<M: Message> {
    pool: Arc<WorkerPool>,
    strategy: Arc<dyn WorkerSelectionStrategy<M>>,
    endpoints: Arc<EndpointCache>,
}

impl<M: Message + Serialize> Distributor<M> {
    pub fn new(pool: Arc<WorkerPool>, endpoints: Arc<EndpointCache>) -> Self {
        Self::with_strategy(pool, endpoints, Arc::new(DefaultWorkerSelectionStrategy::new()))
    }

    pub fn with_strategy(
        pool: Arc<WorkerPool>,
        endpoints: Arc<EndpointCache>,
        strategy: Arc<dyn WorkerSelectionStrategy<M>>,
    ) -> Self {
        Self {
            pool,
            strategy,
            endpoints,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Whether any worker currently has room for `message`.
    #[must_use]
    pub fn accept(&self, message: &M) -> bool {
        self.strategy
            .has_available_worker(&self.pool.candidates(), message)
    }

    /// Assigns `message` to a worker and forwards it to the worker's data endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoAvailableWorker`] when every worker is full,
    /// or the endpoint's failure when forwarding fails.
    pub fn consume(&self, message: &M) -> Result<(), BusError> {
        let message_type = MessageType::of::<M>();
        let Some(worker) = self
            .strategy
            .select_worker(&self.pool.candidates(), message)
        else {
            telemetry::record_backpressure(message_type);
            tracing::warn!(message_type = %message_type, workers = self.pool.len(), "no worker available");
            return Err(BusError::NoAvailableWorker {
                message_type: message_type.short_name(),
            });
        };

        worker.add();
        let sent = self
            .endpoints
            .get_endpoint(worker.data_address())
            .and_then(|endpoint| endpoint.send(message));
        if let Err(err) = sent {
            worker.release();
            tracing::warn!(
                message_type = %message_type,
                worker = worker.data_address(),
                error = %err,
                "forwarding to worker failed"
            );
            return Err(err);
        }
        tracing::debug!(
            message_type = %message_type,
            worker = worker.data_address(),
            "message distributed"
        );
        Ok(())
    }
}
