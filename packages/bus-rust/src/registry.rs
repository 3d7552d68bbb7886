//! Message-type registry used to turn received envelopes into typed messages.

use std::any::TypeId;
use std::sync::Arc;

use conduit_core::{AnyMessage, Envelope, Message, MessageType};
use dashmap::DashMap;
use serde::de::DeserializeOwned;

use crate::error::BusError;

type Decoder = Arc<dyn Fn(&Envelope) -> Result<AnyMessage, BusError> + Send + Sync>;

/// Maps wire message-type names to decoders.
///
/// Provides two lookups:
/// - **By name** (`decode`): the envelope's `message_type` string
/// - **By type** (`contains::<M>`): the message's `TypeId`
pub struct MessageTypeRegistry {
    by_name: DashMap<String, Decoder>,
    by_type: DashMap<TypeId, MessageType>,
}

impl MessageTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
        }
    }

    /// Registers `M` under its fully qualified type name. Re-registering is a no-op.
    pub fn register<M: Message + DeserializeOwned>(&self) {
        let message_type = MessageType::of::<M>();
        if self.by_type.insert(message_type.id(), message_type).is_some() {
            return;
        }
        let decoder: Decoder = Arc::new(|envelope: &Envelope| -> Result<AnyMessage, BusError> {
            Ok(AnyMessage::new(envelope.unwrap::<M>()?))
        });
        self.by_name.insert(message_type.name().to_string(), decoder);
        tracing::debug!(message_type = %message_type, "message type registered");
    }

    #[must_use]
    pub fn contains<M: Message>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<M>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Decodes the envelope's body into its registered message type.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownMessageType`] for unregistered names, or a
    /// serialization error if the body does not fit the registered type.
    pub fn decode(&self, envelope: &Envelope) -> Result<AnyMessage, BusError> {
        let decoder = self
            .by_name
            .get(&envelope.message_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BusError::UnknownMessageType {
                name: envelope.message_type.clone(),
            })?;
        decoder(envelope)
    }
}

impl Default for MessageTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Message for Ping {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Pong;

    impl Message for Pong {}

    #[test]
    fn registered_type_decodes_to_any_message() {
        let registry = MessageTypeRegistry::new();
        registry.register::<Ping>();
        registry.register::<Ping>();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains::<Ping>());

        let any = registry.decode(&Envelope::wrap(&Ping { seq: 4 }).unwrap()).unwrap();
        assert_eq!(any.downcast_ref::<Ping>(), Some(&Ping { seq: 4 }));
    }

    #[test]
    fn unregistered_name_is_reported() {
        let registry = MessageTypeRegistry::new();
        registry.register::<Ping>();
        let err = registry.decode(&Envelope::wrap(&Pong).unwrap()).unwrap_err();
        assert!(matches!(err, BusError::UnknownMessageType { name } if name.ends_with("Pong")));
    }

    #[derive(Debug, Serialize)]
    struct Garbled {
        seq: &'static str,
    }

    impl Message for Garbled {}

    #[test]
    fn malformed_body_is_a_serialization_error() {
        let registry = MessageTypeRegistry::new();
        registry.register::<Ping>();
        let mut envelope = Envelope::wrap(&Garbled { seq: "not a number" }).unwrap();
        envelope.message_type = MessageType::of::<Ping>().name().to_string();
        assert!(matches!(registry.decode(&envelope), Err(BusError::Serialization(_))));
    }
}
