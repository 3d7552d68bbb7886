//! Connectors: components that wire themselves into an inbound pipeline.

use std::sync::Arc;

use conduit_core::Message;

use crate::error::BusError;
use crate::pipeline::{HandlerSink, InboundPipeline, MessageSink, UnsubscribeToken};

/// Anything that registers sinks against a pipeline and can later reverse
/// the whole registration with the returned token.
///
/// Implementations that register more than one sink do so through a single
/// [`InboundPipeline::configure`] call so the token removes all of them at once.
pub trait SubscriptionConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BusError::Configuration`] when the connector cannot build
    /// its sinks, or [`BusError::Disposed`] after pipeline shutdown.
    fn connect(&self, pipeline: &InboundPipeline) -> Result<UnsubscribeToken, BusError>;
}

/// Connects one sink for shape `M`.
pub struct HandlerConnector<M: Message> {
    sink: Arc<dyn MessageSink<M>>,
}

impl<M: Message> HandlerConnector<M> {
    pub fn new(handler: impl Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        Self::from_sink(HandlerSink::new(handler))
    }

    pub fn from_sink(sink: impl MessageSink<M> + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }
}

impl<M: Message> SubscriptionConnector for HandlerConnector<M> {
    fn connect(&self, pipeline: &InboundPipeline) -> Result<UnsubscribeToken, BusError> {
        let token = pipeline.connect_to_router::<M>(Arc::clone(&self.sink))?;
        tracing::info!(message_type = %conduit_core::MessageType::of::<M>(), "handler connected");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug)]
    struct Ping;

    impl Message for Ping {}

    #[test]
    fn connector_can_be_connected_twice_with_independent_tokens() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let connector = HandlerConnector::new(move |_: &Ping| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let pipeline = InboundPipeline::new();

        let first = pipeline.connect(&connector).unwrap();
        let second = pipeline.connect(&connector).unwrap();
        pipeline.dispatch(Ping).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        first.unsubscribe();
        pipeline.dispatch(Ping).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        second.unsubscribe();
        assert_eq!(pipeline.sink_count(), 0);
    }

    #[test]
    fn connecting_to_a_shut_down_pipeline_fails() {
        let pipeline = InboundPipeline::new();
        pipeline.shutdown();
        let connector = HandlerConnector::new(|_: &Ping| Ok(()));
        assert!(pipeline.connect(&connector).unwrap_err().is_disposed());
    }
}
