//! `Conduit` Core: message model, correlation identifiers, envelopes, and serializers.

pub mod clock;
pub mod envelope;
pub mod headers;
pub mod message;
pub mod serialization;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use envelope::Envelope;
pub use headers::{TransportHeaders, CONTENT_TYPE};
pub use message::{AnyMessage, CorrelatedBy, CorrelationId, Message, MessageType};
pub use serialization::{
    serializer_for, ContentType, JsonMessageSerializer, MessageSerializer,
    MsgPackMessageSerializer, SerializationError, JSON_CONTENT_TYPE, MSGPACK_CONTENT_TYPE,
};
