//! The inbound pipeline: root of the routing tree.
//!
//! Readers (dispatch, inspection) load the current [`RouterTable`] snapshot
//! through `ArcSwap` and never take a lock. Writers (subscribe, unsubscribe)
//! serialize on a mutex scoped to building and publishing the next snapshot,
//! which is never held while a sink runs. A router left with no sinks is
//! pruned in the same step that removed its last sink, so a concurrent
//! subscribe for that shape simply observes the table before or after.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use conduit_core::{AnyMessage, Message, MessageType};
use parking_lot::Mutex;

use super::inspect::{PipelineInspector, PipelineNode};
use super::router::{Delivery, MessageRouter, RouterNode, SinkId};
use super::sink::{HandlerSink, MessageSink};
use super::unsubscribe::UnsubscribeToken;
use crate::connector::SubscriptionConnector;
use crate::error::BusError;
use crate::telemetry;

// ---------------------------------------------------------------------------
// SubscriptionObserver
// ---------------------------------------------------------------------------

/// Notified when a message shape gains its first sink.
///
/// The returned token is invoked when the last sink for that shape leaves
/// (or the pipeline shuts down). Callbacks run while the pipeline's writer
/// lock is held and must not subscribe to or unsubscribe from the same
/// pipeline.
pub trait SubscriptionObserver: Send + Sync {
    fn subscribed_to(&self, message_type: MessageType) -> UnsubscribeToken;
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RouterTable {
    routers: HashMap<TypeId, Arc<dyn RouterNode>>,
}

#[derive(Default)]
struct WriterState {
    observers: Vec<Arc<dyn SubscriptionObserver>>,
    announced: HashMap<TypeId, Vec<UnsubscribeToken>>,
}

impl WriterState {
    fn announce(&mut self, message_type: MessageType) {
        let tokens = self
            .observers
            .iter()
            .map(|observer| observer.subscribed_to(message_type))
            .collect::<Vec<_>>();
        self.announced
            .entry(message_type.id())
            .or_default()
            .extend(tokens);
    }

    fn retract(&mut self, type_id: TypeId) {
        if let Some(tokens) = self.announced.remove(&type_id) {
            for token in tokens {
                token.unsubscribe();
            }
        }
    }
}

struct PipelineShared {
    table: ArcSwap<RouterTable>,
    writer: Mutex<WriterState>,
    next_sink_id: AtomicU64,
    disposed: AtomicBool,
}

impl PipelineShared {
    fn ensure_live(&self) -> Result<(), BusError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(BusError::disposed("inbound pipeline"))
        } else {
            Ok(())
        }
    }

    fn commit(self: &Arc<Self>, pending: Vec<PendingSink>) -> Result<UnsubscribeToken, BusError> {
        if pending.is_empty() {
            return Ok(UnsubscribeToken::noop());
        }

        let mut writer = self.writer.lock();
        self.ensure_live()?;

        let current = self.table.load_full();
        let mut routers = current.routers.clone();
        let mut registrations = Vec::with_capacity(pending.len());
        let mut added_shapes = Vec::new();

        for sink in pending {
            let existing = routers.get(&sink.message_type.id());
            if existing.is_none() {
                added_shapes.push(sink.message_type);
            }
            let node = (sink.attach)(existing);
            routers.insert(sink.message_type.id(), node);
            registrations.push((sink.message_type.id(), sink.id));
            tracing::debug!(message_type = %sink.message_type, sink_id = sink.id.0, "sink subscribed");
        }

        self.table.store(Arc::new(RouterTable { routers }));
        for message_type in added_shapes {
            writer.announce(message_type);
        }
        drop(writer);

        let weak: Weak<Self> = Arc::downgrade(self);
        Ok(UnsubscribeToken::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.remove(&registrations);
            }
        }))
    }

    fn remove(&self, registrations: &[(TypeId, SinkId)]) {
        let mut writer = self.writer.lock();
        if self.disposed.load(Ordering::Acquire) {
            return;
        }

        let mut by_type: HashMap<TypeId, HashSet<SinkId>> = HashMap::new();
        for (type_id, id) in registrations {
            by_type.entry(*type_id).or_default().insert(*id);
        }

        let current = self.table.load_full();
        let mut routers = current.routers.clone();
        let mut pruned = Vec::new();
        for (type_id, ids) in by_type {
            let Some(node) = routers.get(&type_id) else {
                continue;
            };
            match node.without(&ids) {
                Some(remaining) => {
                    routers.insert(type_id, remaining);
                }
                None => {
                    tracing::debug!(message_type = %node.message_type(), "router pruned");
                    routers.remove(&type_id);
                    pruned.push(type_id);
                }
            }
        }

        self.table.store(Arc::new(RouterTable { routers }));
        for type_id in pruned {
            writer.retract(type_id);
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfigurator
// ---------------------------------------------------------------------------

type AttachFn = Box<dyn FnOnce(Option<&Arc<dyn RouterNode>>) -> Arc<dyn RouterNode> + Send>;

struct PendingSink {
    message_type: MessageType,
    id: SinkId,
    attach: AttachFn,
}

/// Collects sink registrations that are published together.
///
/// Everything registered through one configurator becomes visible to
/// dispatch in a single snapshot and is removed by a single token, so a
/// composite registration is never observed half-applied.
pub struct PipelineConfigurator<'a> {
    shared: &'a PipelineShared,
    pending: Vec<PendingSink>,
}

impl PipelineConfigurator<'_> {
    /// Registers `sink` for shape `M`.
    pub fn connect_to_router<M: Message>(&mut self, sink: Arc<dyn MessageSink<M>>) -> SinkId {
        let id = SinkId(self.shared.next_sink_id.fetch_add(1, Ordering::Relaxed));
        let attach: AttachFn = Box::new(move |existing| {
            let router = existing
                .and_then(|node| node.as_any().downcast_ref::<MessageRouter<M>>())
                .cloned()
                .unwrap_or_default();
            Arc::new(router.with_sink(id, sink))
        });
        self.pending.push(PendingSink {
            message_type: MessageType::of::<M>(),
            id,
            attach,
        });
        id
    }

    /// Registers a concrete sink for shape `M`.
    pub fn subscribe<M: Message, S: MessageSink<M> + 'static>(&mut self, sink: S) -> SinkId {
        self.connect_to_router::<M>(Arc::new(sink))
    }

    /// Number of registrations collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ---------------------------------------------------------------------------
// InboundPipeline
// ---------------------------------------------------------------------------

/// Type-keyed routing tree dispatching inbound messages to sinks.
///
/// Cloning yields another handle to the same tree.
#[derive(Clone)]
pub struct InboundPipeline {
    shared: Arc<PipelineShared>,
}

impl InboundPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PipelineShared {
                table: ArcSwap::from_pointee(RouterTable::default()),
                writer: Mutex::new(WriterState::default()),
                next_sink_id: AtomicU64::new(1),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a batch of sinks atomically.
    ///
    /// If `configure` fails, nothing it registered is published.
    ///
    /// # Errors
    ///
    /// Returns the error from `configure`, or [`BusError::Disposed`] after shutdown.
    pub fn configure<F>(&self, configure: F) -> Result<UnsubscribeToken, BusError>
    where
        F: FnOnce(&mut PipelineConfigurator<'_>) -> Result<(), BusError>,
    {
        self.shared.ensure_live()?;
        let mut configurator = PipelineConfigurator {
            shared: &self.shared,
            pending: Vec::new(),
        };
        configure(&mut configurator)?;
        let pending = configurator.pending;
        self.shared.commit(pending)
    }

    /// Registers one sink for shape `M`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] after shutdown.
    pub fn connect_to_router<M: Message>(
        &self,
        sink: Arc<dyn MessageSink<M>>,
    ) -> Result<UnsubscribeToken, BusError> {
        self.configure(|cfg| {
            cfg.connect_to_router(sink);
            Ok(())
        })
    }

    /// Registers one concrete sink for shape `M`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] after shutdown.
    pub fn subscribe<M: Message, S: MessageSink<M> + 'static>(
        &self,
        sink: S,
    ) -> Result<UnsubscribeToken, BusError> {
        self.connect_to_router::<M>(Arc::new(sink))
    }

    /// Subscribes a plain handler for shape `M`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] after shutdown.
    pub fn subscribe_handler<M, F>(&self, handler: F) -> Result<UnsubscribeToken, BusError>
    where
        M: Message,
        F: Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe::<M, _>(HandlerSink::new(handler))
    }

    /// Wires a connector (handler, saga, distributor) into this pipeline.
    ///
    /// # Errors
    ///
    /// Propagates the connector's configuration error.
    pub fn connect(&self, connector: &dyn SubscriptionConnector) -> Result<UnsubscribeToken, BusError> {
        connector.connect(self)
    }

    /// Registers an observer for shape additions and removals. Shapes that
    /// already have sinks are announced immediately.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] after shutdown.
    pub fn register_observer(&self, observer: Arc<dyn SubscriptionObserver>) -> Result<(), BusError> {
        let mut writer = self.shared.writer.lock();
        self.shared.ensure_live()?;
        let table = self.shared.table.load_full();
        for node in table.routers.values() {
            let token = observer.subscribed_to(node.message_type());
            writer
                .announced
                .entry(node.message_type().id())
                .or_default()
                .push(token);
        }
        writer.observers.push(observer);
        Ok(())
    }

    /// Acceptance phase for `message` across the whole tree: the message's
    /// own shape first, then each base shape. No consumer runs.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] after shutdown.
    pub fn enumerate(&self, message: &AnyMessage) -> Result<Vec<Delivery>, BusError> {
        self.shared.ensure_live()?;
        let table = self.shared.table.load_full();
        let mut deliveries = Vec::new();
        let mut visited = HashSet::new();
        collect(&table, message, &mut visited, &mut deliveries);
        Ok(deliveries)
    }

    /// Dispatches a typed message.
    ///
    /// # Errors
    ///
    /// See [`dispatch_any`](Self::dispatch_any).
    pub fn dispatch<M: Message>(&self, message: M) -> Result<usize, BusError> {
        self.dispatch_any(&AnyMessage::new(message))
    }

    /// Delivers `message` to every accepting sink and returns how many
    /// consumers ran successfully.
    ///
    /// # Errors
    ///
    /// Returns the first consumer failure after all consumers have run, or
    /// [`BusError::Disposed`] after shutdown.
    pub fn dispatch_any(&self, message: &AnyMessage) -> Result<usize, BusError> {
        let deliveries = self.enumerate(message)?;
        if deliveries.is_empty() {
            tracing::debug!(message_type = %message.message_type(), "no sink accepted message");
        }
        Self::deliver_all(deliveries)
    }

    /// Runs accepted deliveries in order. A failing consumer does not stop
    /// later ones; the first failure is returned and the rest are logged.
    ///
    /// # Errors
    ///
    /// Returns the first consumer failure.
    pub fn deliver_all(deliveries: Vec<Delivery>) -> Result<usize, BusError> {
        let mut delivered = 0;
        let mut first_error = None;
        for delivery in deliveries {
            let message_type = delivery.message_type();
            telemetry::record_dispatch(message_type);
            match delivery.deliver() {
                Ok(()) => delivered += 1,
                Err(err) => {
                    telemetry::record_dispatch_failure(message_type);
                    if first_error.is_none() {
                        first_error = Some(err);
                    } else {
                        tracing::warn!(message_type = %message_type, error = %err, "delivery failed");
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(delivered),
        }
    }

    /// Walks the tree with `inspector`, routers in name order. Returns
    /// whether the walk completed.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] after shutdown.
    pub fn inspect(&self, inspector: &mut dyn PipelineInspector) -> Result<bool, BusError> {
        self.shared.ensure_live()?;
        let table = self.shared.table.load_full();
        let mut routers: Vec<&Arc<dyn RouterNode>> = table.routers.values().collect();
        routers.sort_by_key(|node| node.message_type().name());

        if !inspector.inspect(&PipelineNode::Root {
            routers: routers.len(),
        }) {
            return Ok(false);
        }
        inspector.descend();
        let complete = routers.iter().all(|node| node.inspect(inspector));
        inspector.ascend();
        Ok(complete)
    }

    /// Returns `true` if at least one sink is subscribed for shape `M`.
    #[must_use]
    pub fn has_router<M: Message>(&self) -> bool {
        self.shared.table.load().routers.contains_key(&TypeId::of::<M>())
    }

    /// Number of shapes with at least one sink.
    #[must_use]
    pub fn router_count(&self) -> usize {
        self.shared.table.load().routers.len()
    }

    /// Total number of subscribed sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.shared.table.load().routers.values().map(|node| node.len()).sum()
    }

    /// Tears the pipeline down: drops every router, retracts every observer
    /// announcement, and makes later calls fail with [`BusError::Disposed`].
    pub fn shutdown(&self) {
        let mut writer = self.shared.writer.lock();
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.table.store(Arc::new(RouterTable::default()));
        let announced: Vec<TypeId> = writer.announced.keys().copied().collect();
        for type_id in announced {
            writer.retract(type_id);
        }
        writer.observers.clear();
        tracing::info!("inbound pipeline shut down");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }
}

impl Default for InboundPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InboundPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundPipeline")
            .field("routers", &self.router_count())
            .field("sinks", &self.sink_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Each shape is visited once, so a base reachable along two paths is
/// delivered once, from the first path in declaration order.
fn collect(
    table: &RouterTable,
    message: &AnyMessage,
    visited: &mut HashSet<TypeId>,
    out: &mut Vec<Delivery>,
) {
    if !visited.insert(message.message_type().id()) {
        return;
    }
    if let Some(node) = table.routers.get(&message.message_type().id()) {
        node.enumerate(message, out);
    }
    for base in message.bases() {
        collect(table, base, visited, out);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
