//! Per-shape routers.
//!
//! A [`MessageRouter`] is an immutable, ordered list of sinks for one message
//! shape. Mutation never happens in place: the inbound pipeline builds a new
//! router with the sink added or removed and publishes it in a fresh
//! snapshot, so a dispatch that loaded the previous snapshot keeps walking a
//! complete, unchanging list.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use conduit_core::{AnyMessage, Message, MessageType};

use super::inspect::{PipelineInspector, PipelineNode};
use super::sink::{Consumer, MessageSink};
use crate::error::BusError;

/// Identifier of one sink registration within a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub u64);

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// One accepted consumer bound to the message it accepted.
///
/// Produced by the acceptance phase; running it is the delivery phase.
pub struct Delivery {
    message_type: MessageType,
    run: Box<dyn FnOnce() -> Result<(), BusError> + Send>,
}

impl Delivery {
    pub(crate) fn new<M: Message>(message: Arc<M>, consumer: Consumer<M>) -> Self {
        Self {
            message_type: MessageType::of::<M>(),
            run: Box::new(move || consumer(message)),
        }
    }

    /// Shape the consumer subscribed for (the message's own shape or one of
    /// its base shapes).
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Runs the consumer.
    ///
    /// # Errors
    ///
    /// Propagates the consumer's failure.
    pub fn deliver(self) -> Result<(), BusError> {
        (self.run)()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message_type", &self.message_type)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// MessageRouter
// ---------------------------------------------------------------------------

/// Ordered fan-out to every sink registered for shape `M`.
///
/// Also usable as a composite [`MessageSink`]: it accepts a message when at
/// least one child accepts, and delivers to the accepting children in order.
pub struct MessageRouter<M: Message> {
    sinks: Vec<(SinkId, Arc<dyn MessageSink<M>>)>,
}

impl<M: Message> MessageRouter<M> {
    #[must_use]
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Returns a router with `sink` appended.
    #[must_use]
    pub fn with_sink(mut self, id: SinkId, sink: Arc<dyn MessageSink<M>>) -> Self {
        self.sinks.push((id, sink));
        self
    }

    /// Returns a router without the sinks named in `ids`.
    #[must_use]
    pub fn without(&self, ids: &HashSet<SinkId>) -> Self {
        Self {
            sinks: self
                .sinks
                .iter()
                .filter(|(id, _)| !ids.contains(id))
                .cloned()
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: SinkId) -> bool {
        self.sinks.iter().any(|(sink_id, _)| *sink_id == id)
    }

    fn collect(&self, message: &Arc<M>, out: &mut Vec<Delivery>) {
        for (_, sink) in &self.sinks {
            if let Some(consumer) = sink.accept(message) {
                out.push(Delivery::new(Arc::clone(message), consumer));
            }
        }
    }
}

impl<M: Message> Default for MessageRouter<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Clone for MessageRouter<M> {
    fn clone(&self) -> Self {
        Self {
            sinks: self.sinks.clone(),
        }
    }
}

impl<M: Message> MessageSink<M> for MessageRouter<M> {
    fn accept(&self, message: &Arc<M>) -> Option<Consumer<M>> {
        let mut accepted = Vec::new();
        self.collect(message, &mut accepted);
        if accepted.is_empty() {
            return None;
        }
        Some(Box::new(move |_msg: Arc<M>| {
            super::inbound::InboundPipeline::deliver_all(accepted).map(|_| ())
        }))
    }

    fn description(&self) -> &str {
        "Routed"
    }

    fn inspect(&self, inspector: &mut dyn PipelineInspector) -> bool {
        if !inspector.inspect(&PipelineNode::Router {
            message_type: MessageType::of::<M>(),
            sinks: self.sinks.len(),
        }) {
            return false;
        }
        inspector.descend();
        let complete = self.sinks.iter().all(|(_, sink)| sink.inspect(inspector));
        inspector.ascend();
        complete
    }
}

// ---------------------------------------------------------------------------
// RouterNode (type-erased router held by the pipeline)
// ---------------------------------------------------------------------------

/// Type-erased view of a [`MessageRouter`] so routers for different shapes
/// can live in one table.
pub(crate) trait RouterNode: Send + Sync {
    fn message_type(&self) -> MessageType;

    fn len(&self) -> usize;

    /// Runs the acceptance phase for `message`, which must be of this
    /// router's shape.
    fn enumerate(&self, message: &AnyMessage, out: &mut Vec<Delivery>);

    /// Returns the router without `ids`, or `None` if nothing would remain.
    fn without(&self, ids: &HashSet<SinkId>) -> Option<Arc<dyn RouterNode>>;

    fn inspect(&self, inspector: &mut dyn PipelineInspector) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl<M: Message> RouterNode for MessageRouter<M> {
    fn message_type(&self) -> MessageType {
        MessageType::of::<M>()
    }

    fn len(&self) -> usize {
        self.sinks.len()
    }

    fn enumerate(&self, message: &AnyMessage, out: &mut Vec<Delivery>) {
        if let Some(typed) = message.downcast::<M>() {
            self.collect(&typed, out);
        }
    }

    fn without(&self, ids: &HashSet<SinkId>) -> Option<Arc<dyn RouterNode>> {
        let remaining = MessageRouter::without(self, ids);
        if remaining.is_empty() {
            None
        } else {
            Some(Arc::new(remaining))
        }
    }

    fn inspect(&self, inspector: &mut dyn PipelineInspector) -> bool {
        MessageSink::inspect(self, inspector)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::pipeline::sink::HandlerSink;

    #[derive(Debug)]
    struct Ping;

    impl Message for Ping {}

    fn counting_sink(count: &Arc<AtomicU32>) -> Arc<dyn MessageSink<Ping>> {
        let c = Arc::clone(count);
        Arc::new(HandlerSink::new(move |_: &Ping| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    #[test]
    fn removal_builds_a_new_router_and_leaves_the_old_one_intact() {
        let count = Arc::new(AtomicU32::new(0));
        let router = MessageRouter::new()
            .with_sink(SinkId(1), counting_sink(&count))
            .with_sink(SinkId(2), counting_sink(&count));

        let trimmed = router.without(&HashSet::from([SinkId(1)]));
        assert_eq!(router.len(), 2);
        assert_eq!(trimmed.len(), 1);
        assert!(trimmed.contains(SinkId(2)));
        assert!(!trimmed.contains(SinkId(1)));
    }

    #[test]
    fn composite_router_delivers_to_each_accepting_child() {
        let count = Arc::new(AtomicU32::new(0));
        let router = MessageRouter::new()
            .with_sink(SinkId(1), counting_sink(&count))
            .with_sink(SinkId(2), counting_sink(&count));

        let msg = Arc::new(Ping);
        let consumer = MessageSink::accept(&router, &msg).expect("children accept");
        consumer(msg).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_router_declines() {
        let router: MessageRouter<Ping> = MessageRouter::new();
        assert!(MessageSink::accept(&router, &Arc::new(Ping)).is_none());
        assert!(RouterNode::without(&router, &HashSet::new()).is_none());
    }
}
