//! Message serializer contract and the stock codecs.
//!
//! A serializer turns an [`Envelope`] into bytes and back. Serializers are
//! plain values passed to whoever needs one; there is no global instance.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// MIME type written by [`JsonMessageSerializer`].
pub const JSON_CONTENT_TYPE: &str = "application/vnd.conduit+json";

/// MIME type written by [`MsgPackMessageSerializer`].
pub const MSGPACK_CONTENT_TYPE: &str = "application/vnd.conduit+msgpack";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Codec failure on the send or receive path.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("failed to serialize message: {0}")]
    Encode(#[source] anyhow::Error),
    #[error("failed to deserialize message: {0}")]
    Decode(#[source] anyhow::Error),
    #[error("envelope carries {actual}, expected {expected}")]
    MessageMismatch {
        expected: &'static str,
        actual: String,
    },
    #[error("no serializer for content type {0:?}")]
    UnsupportedContentType(String),
}

// ---------------------------------------------------------------------------
// ContentType
// ---------------------------------------------------------------------------

/// Codec selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    #[default]
    Json,
    MsgPack,
}

impl ContentType {
    /// Returns the MIME type for this codec.
    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Json => JSON_CONTENT_TYPE,
            Self::MsgPack => MSGPACK_CONTENT_TYPE,
        }
    }

    /// Parses a MIME type written by one of the stock codecs.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::UnsupportedContentType`] for anything else.
    pub fn from_mime(mime: &str) -> Result<Self, SerializationError> {
        match mime {
            JSON_CONTENT_TYPE => Ok(Self::Json),
            MSGPACK_CONTENT_TYPE => Ok(Self::MsgPack),
            other => {
                tracing::debug!(content_type = other, "no stock codec for content type");
                Err(SerializationError::UnsupportedContentType(other.to_string()))
            }
        }
    }
}

/// Constructs the stock serializer for `content_type`.
#[must_use]
pub fn serializer_for(content_type: ContentType) -> Arc<dyn MessageSerializer> {
    match content_type {
        ContentType::Json => Arc::new(JsonMessageSerializer),
        ContentType::MsgPack => Arc::new(MsgPackMessageSerializer),
    }
}

// ---------------------------------------------------------------------------
// MessageSerializer
// ---------------------------------------------------------------------------

/// Encodes envelopes for a transport and decodes them on receipt.
///
/// Implementations must round-trip: decoding the bytes written for an
/// envelope yields an equal envelope.
pub trait MessageSerializer: Send + Sync + fmt::Debug {
    /// MIME type stamped into the transport headers.
    fn content_type(&self) -> &'static str;

    /// Writes `envelope` to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Encode`] if the codec or writer fails.
    fn serialize(&self, out: &mut dyn Write, envelope: &Envelope) -> Result<(), SerializationError>;

    /// Reads an envelope from `body`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Decode`] if `body` is not a valid envelope.
    fn deserialize(&self, body: &[u8]) -> Result<Envelope, SerializationError>;

    /// Convenience wrapper writing into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`serialize`](Self::serialize).
    fn to_vec(&self, envelope: &Envelope) -> Result<Vec<u8>, SerializationError> {
        let mut buf = Vec::new();
        self.serialize(&mut buf, envelope)?;
        Ok(buf)
    }
}

/// JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageSerializer;

impl MessageSerializer for JsonMessageSerializer {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn serialize(&self, out: &mut dyn Write, envelope: &Envelope) -> Result<(), SerializationError> {
        serde_json::to_writer(out, envelope).map_err(|e| SerializationError::Encode(e.into()))
    }

    fn deserialize(&self, body: &[u8]) -> Result<Envelope, SerializationError> {
        serde_json::from_slice(body).map_err(|e| SerializationError::Decode(e.into()))
    }
}

/// `MsgPack` codec. Structs are written as maps (`write_named`) so optional
/// envelope fields may be omitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackMessageSerializer;

impl MessageSerializer for MsgPackMessageSerializer {
    fn content_type(&self) -> &'static str {
        MSGPACK_CONTENT_TYPE
    }

    fn serialize(&self, out: &mut dyn Write, envelope: &Envelope) -> Result<(), SerializationError> {
        rmp_serde::encode::write_named(out, envelope)
            .map_err(|e| SerializationError::Encode(e.into()))
    }

    fn deserialize(&self, body: &[u8]) -> Result<Envelope, SerializationError> {
        rmp_serde::from_slice(body).map_err(|e| SerializationError::Decode(e.into()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::message::{CorrelationId, Message};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct PingMessage {
        seq: i64,
        label: String,
        tags: Vec<String>,
        reply_to: Option<String>,
        latency: f64,
    }

    impl Message for PingMessage {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        value: f64,
    }

    impl Message for Reading {}

    fn round_trip<M>(codec: &dyn MessageSerializer, message: &M) -> M
    where
        M: Message + Serialize + serde::de::DeserializeOwned,
    {
        let bytes = codec.to_vec(&Envelope::wrap(message).unwrap()).unwrap();
        codec.deserialize(&bytes).unwrap().unwrap::<M>().unwrap()
    }

    fn codecs() -> Vec<Arc<dyn MessageSerializer>> {
        vec![
            serializer_for(ContentType::Json),
            serializer_for(ContentType::MsgPack),
        ]
    }

    #[test]
    fn simple_message_round_trips_through_every_codec() {
        let ping = PingMessage {
            seq: 1,
            label: "ping".to_string(),
            tags: vec!["a".to_string()],
            reply_to: None,
            latency: 0.25,
        };
        for codec in codecs() {
            let envelope = Envelope::wrap(&ping)
                .unwrap()
                .with_correlation_id(CorrelationId::new())
                .with_header("origin", "test");
            let bytes = codec.to_vec(&envelope).unwrap();
            let decoded = codec.deserialize(&bytes).unwrap();
            assert_eq!(decoded, envelope, "codec {}", codec.content_type());
            assert_eq!(decoded.unwrap::<PingMessage>().unwrap(), ping);
        }
    }

    #[test]
    fn garbage_is_a_decode_error() {
        for codec in codecs() {
            let err = codec.deserialize(b"\xc1not an envelope").unwrap_err();
            assert!(matches!(err, SerializationError::Decode(_)));
        }
    }

    #[test]
    fn content_type_mime_round_trip() {
        for ct in [ContentType::Json, ContentType::MsgPack] {
            assert_eq!(ContentType::from_mime(ct.mime()).unwrap(), ct);
            assert_eq!(serializer_for(ct).content_type(), ct.mime());
        }
        assert!(matches!(
            ContentType::from_mime("text/xml"),
            Err(SerializationError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn floats_keep_every_bit_through_every_codec() {
        let hard = [
            1.071_566_039_146_582_6e-75,
            0.1 + 0.2,
            f64::MIN_POSITIVE,
            f64::MAX,
            -5e-324,
        ];
        for codec in codecs() {
            for value in hard {
                let back = round_trip(codec.as_ref(), &Reading { value });
                assert_eq!(back.value.to_bits(), value.to_bits(), "codec {}", codec.content_type());
            }
        }
    }

    #[test]
    fn msgpack_carries_non_finite_floats() {
        let codec = MsgPackMessageSerializer;
        for value in [f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(round_trip(&codec, &Reading { value }).value, value);
        }
        assert!(round_trip(&codec, &Reading { value: f64::NAN }).value.is_nan());
    }

    proptest! {
        #[test]
        fn any_ping_round_trips(
            seq in any::<i64>(),
            label in ".{0,32}",
            tags in proptest::collection::vec("[a-z]{1,8}", 0..4),
            reply_to in proptest::option::of("[a-z]{1,12}"),
            latency in any::<f64>().prop_filter("finite", |v| v.is_finite()),
        ) {
            let ping = PingMessage { seq, label, tags, reply_to, latency };
            for codec in codecs() {
                let back = round_trip(codec.as_ref(), &ping);
                prop_assert_eq!(back.latency.to_bits(), ping.latency.to_bits());
                prop_assert_eq!(back, ping.clone());
            }
        }

        #[test]
        fn any_float_survives_msgpack(value in any::<f64>()) {
            let back = round_trip(&MsgPackMessageSerializer, &Reading { value });
            prop_assert_eq!(back.value.to_bits(), value.to_bits());
        }
    }
}
