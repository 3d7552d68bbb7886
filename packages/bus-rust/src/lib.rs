//! `Conduit` Bus: in-process routing pipeline, sagas, work distribution, and a loopback transport.

pub mod bus;
pub mod config;
pub mod connector;
pub mod distributor;
pub mod endpoint;
pub mod error;
pub mod outbound;
pub mod pipeline;
pub mod registry;
pub mod saga;
pub mod telemetry;
pub mod transport;

pub use bus::{HealthState, ServiceBus, ShutdownController};
pub use config::{BusConfig, DistributorConfig};
pub use connector::{HandlerConnector, SubscriptionConnector};
pub use distributor::{Distributor, DistributorConnector, WorkerAvailable, WorkerPool};
pub use endpoint::{Endpoint, EndpointCache};
pub use error::BusError;
pub use outbound::{OutboundInterceptor, OutboundPipeline};
pub use pipeline::{InboundPipeline, MessageSink, PipelineViewer, UnsubscribeToken};
pub use registry::MessageTypeRegistry;
pub use saga::{InMemorySagaRepository, Saga, SagaConnector, SagaRepository, SagaStateMachine};
pub use transport::{LoopbackTransport, Transport};
