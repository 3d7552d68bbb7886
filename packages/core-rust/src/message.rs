//! Message model: shape keys, type-erased messages, and correlation identifiers.
//!
//! Every value that travels through the bus implements [`Message`]. The
//! routing pipeline keys its nodes by [`MessageType`], and carries messages
//! around as [`AnyMessage`] so a single tree can hold routers for many shapes.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Runtime shape key of a message type.
///
/// Equality and hashing use only the `TypeId`; the name is carried for
/// diagnostics, envelopes, and error reports.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    /// Returns the shape key for `M`.
    #[must_use]
    pub fn of<M: 'static>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: type_name::<M>(),
        }
    }

    /// Returns the underlying `TypeId`.
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Returns the fully qualified type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the last path segment of the type name (e.g. `OrderPlaced`).
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A value that can be dispatched through the routing pipeline.
///
/// `base_shapes` returns projections of this message onto the other shapes
/// it is compatible with. Dispatch delivers the message to sinks subscribed
/// for its own shape first, then to sinks subscribed for each base shape.
pub trait Message: Send + Sync + fmt::Debug + 'static {
    /// Projections onto polymorphically compatible shapes. Empty by default.
    fn base_shapes(&self) -> Vec<AnyMessage> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// AnyMessage
// ---------------------------------------------------------------------------

/// A type-erased, cheaply clonable message.
#[derive(Clone)]
pub struct AnyMessage {
    message_type: MessageType,
    body: Arc<dyn Any + Send + Sync>,
    bases: Arc<[AnyMessage]>,
}

impl AnyMessage {
    /// Erases `message`, eagerly resolving its base shapes.
    pub fn new<M: Message>(message: M) -> Self {
        Self::from_arc(Arc::new(message))
    }

    /// Erases an already shared message.
    pub fn from_arc<M: Message>(message: Arc<M>) -> Self {
        let bases: Arc<[AnyMessage]> = message.base_shapes().into();
        Self {
            message_type: MessageType::of::<M>(),
            body: message,
            bases,
        }
    }

    /// Returns the runtime shape of the message.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Returns the base-shape projections of the message.
    #[must_use]
    pub fn bases(&self) -> &[AnyMessage] {
        &self.bases
    }

    /// Returns `true` if the message is exactly of shape `M`.
    #[must_use]
    pub fn is<M: Message>(&self) -> bool {
        self.message_type.id() == TypeId::of::<M>()
    }

    /// Borrows the message as `M`.
    #[must_use]
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.body.downcast_ref::<M>()
    }

    /// Returns a shared handle to the message as `M`.
    #[must_use]
    pub fn downcast<M: Message>(&self) -> Option<Arc<M>> {
        Arc::clone(&self.body).downcast::<M>().ok()
    }
}

impl fmt::Debug for AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("message_type", &self.message_type)
            .field("bases", &self.bases.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// CorrelationId
// ---------------------------------------------------------------------------

/// 128-bit identifier naming one saga conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Generates a random (v4) identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero identifier.
    #[must_use]
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns `true` for the all-zero identifier.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Implemented by messages that participate in a saga conversation.
pub trait CorrelatedBy {
    /// The identifier of the conversation this message belongs to.
    fn correlation_id(&self) -> CorrelationId;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Ping {
        seq: u32,
    }

    impl Message for Ping {}

    #[derive(Debug)]
    struct AuditRecord {
        source: &'static str,
    }

    impl Message for AuditRecord {}

    #[derive(Debug)]
    struct OrderPlaced {
        id: CorrelationId,
    }

    impl Message for OrderPlaced {
        fn base_shapes(&self) -> Vec<AnyMessage> {
            vec![AnyMessage::new(AuditRecord { source: "orders" })]
        }
    }

    impl CorrelatedBy for OrderPlaced {
        fn correlation_id(&self) -> CorrelationId {
            self.id
        }
    }

    #[test]
    fn message_type_equality_ignores_name() {
        assert_eq!(MessageType::of::<Ping>(), MessageType::of::<Ping>());
        assert_ne!(MessageType::of::<Ping>(), MessageType::of::<OrderPlaced>());
        assert_eq!(MessageType::of::<Ping>().short_name(), "Ping");
    }

    #[test]
    fn downcast_returns_original_value() {
        let msg = AnyMessage::new(Ping { seq: 7 });
        assert!(msg.is::<Ping>());
        assert_eq!(msg.downcast_ref::<Ping>(), Some(&Ping { seq: 7 }));
        assert!(msg.downcast::<OrderPlaced>().is_none());
        assert_eq!(msg.downcast::<Ping>().unwrap().seq, 7);
    }

    #[test]
    fn base_shapes_are_resolved_eagerly() {
        let id = CorrelationId::new();
        let msg = AnyMessage::new(OrderPlaced { id });
        assert_eq!(msg.bases().len(), 1);
        let base = &msg.bases()[0];
        assert!(base.is::<AuditRecord>());
        assert_eq!(base.downcast_ref::<AuditRecord>().unwrap().source, "orders");
        assert_eq!(msg.downcast_ref::<OrderPlaced>().unwrap().correlation_id(), id);
    }

    #[test]
    fn correlation_id_round_trips_through_json() {
        let id = CorrelationId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: CorrelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(CorrelationId::nil().is_nil());
    }
}
