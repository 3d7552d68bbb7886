//! Type-keyed routing pipeline.
//!
//! - [`InboundPipeline`]: root of the tree, one router per message shape
//! - [`MessageRouter`]: ordered fan-out to the sinks of one shape
//! - [`MessageSink`]: leaves, with acceptance separated from delivery
//! - [`UnsubscribeToken`]: reverses one (possibly composite) registration
//! - [`PipelineInspector`] / [`PipelineViewer`]: read-only diagnostics walk

pub mod inbound;
pub mod inspect;
pub mod router;
pub mod sink;
pub mod unsubscribe;

pub use inbound::{InboundPipeline, PipelineConfigurator, SubscriptionObserver};
pub use inspect::{PipelineInspector, PipelineNode, PipelineViewer};
pub use router::{Delivery, MessageRouter, SinkId};
pub use sink::{Consumer, Handler, HandlerSink, MessageSink, SelectiveHandlerSink};
pub use unsubscribe::UnsubscribeToken;
