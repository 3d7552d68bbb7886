//! Message sinks: the leaves of the routing pipeline.
//!
//! A sink consumes exactly one message shape. Consumption is split in two
//! phases: [`MessageSink::accept`] decides whether the sink wants a message
//! and must be free of side effects, and the returned [`Consumer`] performs
//! the delivery. The pipeline runs acceptance for every sink before running
//! any consumer.

use std::sync::Arc;

use conduit_core::{Message, MessageType};

use super::inspect::{PipelineInspector, PipelineNode};
use crate::error::BusError;

/// Delivery phase returned by an accepting sink.
pub type Consumer<M> = Box<dyn FnOnce(Arc<M>) -> Result<(), BusError> + Send>;

/// A plain message handler.
pub type Handler<M> = Arc<dyn Fn(&M) -> anyhow::Result<()> + Send + Sync>;

/// A typed consumer of messages of shape `M`.
pub trait MessageSink<M: Message>: Send + Sync {
    /// Acceptance phase. Returns `None` to decline the message.
    fn accept(&self, message: &Arc<M>) -> Option<Consumer<M>>;

    /// Short label used by pipeline inspection.
    fn description(&self) -> &str {
        "Sink"
    }

    /// Visits this sink (and any children) with `inspector`.
    fn inspect(&self, inspector: &mut dyn PipelineInspector) -> bool {
        inspector.inspect(&PipelineNode::Sink {
            message_type: MessageType::of::<M>(),
            description: self.description(),
        })
    }
}

fn run_handler<M: Message>(handler: &Handler<M>, message: &M) -> Result<(), BusError> {
    handler(message).map_err(|source| BusError::Handler {
        message_type: MessageType::of::<M>().name(),
        source,
    })
}

// ---------------------------------------------------------------------------
// HandlerSink
// ---------------------------------------------------------------------------

/// Sink that hands every message (optionally filtered by a condition) to a handler.
pub struct HandlerSink<M: Message> {
    handler: Handler<M>,
    condition: Option<Arc<dyn Fn(&M) -> bool + Send + Sync>>,
}

impl<M: Message> HandlerSink<M> {
    pub fn new(handler: impl Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            condition: None,
        }
    }

    /// Only messages for which `condition` holds are accepted.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Fn(&M) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }
}

impl<M: Message> MessageSink<M> for HandlerSink<M> {
    fn accept(&self, message: &Arc<M>) -> Option<Consumer<M>> {
        if let Some(condition) = &self.condition {
            if !condition(message.as_ref()) {
                return None;
            }
        }
        let handler = Arc::clone(&self.handler);
        Some(Box::new(move |msg: Arc<M>| run_handler(&handler, &msg)))
    }

    fn description(&self) -> &str {
        "Handler"
    }
}

// ---------------------------------------------------------------------------
// SelectiveHandlerSink
// ---------------------------------------------------------------------------

/// Sink whose selector picks a handler per message, or declines with `None`.
pub struct SelectiveHandlerSink<M: Message> {
    selector: Arc<dyn Fn(&M) -> Option<Handler<M>> + Send + Sync>,
}

impl<M: Message> SelectiveHandlerSink<M> {
    pub fn new(selector: impl Fn(&M) -> Option<Handler<M>> + Send + Sync + 'static) -> Self {
        Self {
            selector: Arc::new(selector),
        }
    }
}

impl<M: Message> MessageSink<M> for SelectiveHandlerSink<M> {
    fn accept(&self, message: &Arc<M>) -> Option<Consumer<M>> {
        let handler = (self.selector)(message.as_ref())?;
        Some(Box::new(move |msg: Arc<M>| run_handler(&handler, &msg)))
    }

    fn description(&self) -> &str {
        "Selective Handler"
    }
}
