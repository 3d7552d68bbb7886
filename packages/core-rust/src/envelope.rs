//! Serialized wrapper carrying a message plus its transport metadata.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::ClockSource;
use crate::message::{CorrelationId, Message, MessageType};
use crate::serialization::SerializationError;

/// Codec-neutral envelope.
///
/// The message body is held as a MessagePack value tree, which keeps
/// integers, floats (including non-finite ones) and binary data exact, so a
/// codec can carry it without knowing the concrete type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_id: Uuid,
    /// Fully qualified message type name, see [`MessageType::name`].
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<CorrelationId>,
    /// Absolute expiration time in milliseconds since Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expiration_ms: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub headers: BTreeMap<String, String>,
    pub message: rmpv::Value,
}

impl Envelope {
    /// Wraps `message` in a new envelope with a fresh message id.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Encode`] if the message cannot be
    /// represented as a value tree.
    pub fn wrap<M: Message + Serialize>(message: &M) -> Result<Self, SerializationError> {
        let body = rmpv::ext::to_value(message).map_err(|e| SerializationError::Encode(e.into()))?;
        Ok(Self {
            message_id: Uuid::new_v4(),
            message_type: MessageType::of::<M>().name().to_string(),
            correlation_id: None,
            expiration_ms: None,
            headers: BTreeMap::new(),
            message: body,
        })
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration_ms: u64) -> Self {
        self.expiration_ms = Some(expiration_ms);
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Returns `true` once the expiration time has passed.
    #[must_use]
    pub fn is_expired(&self, clock: &dyn ClockSource) -> bool {
        self.expiration_ms.is_some_and(|at| at <= clock.now())
    }

    /// Extracts the typed message.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::MessageMismatch`] if the envelope holds a
    /// different message type, or [`SerializationError::Decode`] if the body
    /// does not match `M`'s shape.
    pub fn unwrap<M: Message + DeserializeOwned>(&self) -> Result<M, SerializationError> {
        let expected = MessageType::of::<M>().name();
        if self.message_type != expected {
            return Err(SerializationError::MessageMismatch {
                expected,
                actual: self.message_type.clone(),
            });
        }
        rmpv::ext::from_value(self.message.clone()).map_err(|e| SerializationError::Decode(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Message for Ping {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Pong;

    impl Message for Pong {}

    #[test]
    fn wrap_records_type_name_and_body() {
        let env = Envelope::wrap(&Ping { seq: 3 }).unwrap();
        assert_eq!(env.message_type, MessageType::of::<Ping>().name());
        assert!(!env.message.is_nil());
        assert_eq!(env.unwrap::<Ping>().unwrap(), Ping { seq: 3 });
    }

    #[test]
    fn unwrap_as_other_type_is_a_mismatch() {
        let env = Envelope::wrap(&Ping { seq: 3 }).unwrap();
        let err = env.unwrap::<Pong>().unwrap_err();
        assert!(matches!(err, SerializationError::MessageMismatch { .. }));
    }

    #[test]
    fn expiration_is_checked_against_clock() {
        let clock = ManualClock::new(1_000);
        let env = Envelope::wrap(&Ping { seq: 1 }).unwrap().with_expiration(1_500);
        assert!(!env.is_expired(&clock));
        clock.set(1_500);
        assert!(env.is_expired(&clock));

        let forever = Envelope::wrap(&Ping { seq: 2 }).unwrap();
        assert!(!forever.is_expired(&clock));
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let env = Envelope::wrap(&Ping { seq: 1 }).unwrap();
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("correlationId").is_none());
        assert!(json.get("expirationMs").is_none());
        assert!(json.get("headers").is_none());
        assert_eq!(json["messageType"], env.message_type.as_str());
    }
}
