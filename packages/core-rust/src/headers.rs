//! Transport-level message headers.
//!
//! Transports that cannot carry structured metadata natively store the
//! headers as a compact JSON object next to the body.

use std::collections::BTreeMap;

use crate::serialization::SerializationError;

/// Header name carrying the serializer content type.
pub const CONTENT_TYPE: &str = "Content-Type";

/// Ordered set of string headers attached to a transport message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeaders {
    entries: BTreeMap<String, String>,
}

impl TransportHeaders {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header. A `None` value is skipped so absent headers never
    /// reach the wire.
    pub fn add(&mut self, key: impl Into<String>, value: Option<&str>) {
        if let Some(value) = value {
            self.entries.insert(key.into(), value.to_string());
        }
    }

    /// Looks up a header value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns the content type header, if present.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the headers as a JSON object. An empty set encodes to an
    /// empty byte array rather than `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Encode`] if JSON encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::to_vec(&self.entries).map_err(|e| SerializationError::Encode(e.into()))
    }

    /// Decodes headers previously produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::Decode`] if `bytes` is not a JSON object
    /// of strings.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        let entries = serde_json::from_slice(bytes).map_err(|e| SerializationError::Decode(e.into()))?;
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON_TYPE: &str = "application/vnd.conduit+json";

    #[test]
    fn content_type_is_written_as_json_object() {
        let mut headers = TransportHeaders::new();
        headers.add(CONTENT_TYPE, Some(JSON_TYPE));

        let bytes = headers.to_bytes().unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            "{\"Content-Type\":\"application/vnd.conduit+json\"}"
        );
    }

    #[test]
    fn bytes_reload_into_headers() {
        let mut headers = TransportHeaders::new();
        headers.add(CONTENT_TYPE, Some(JSON_TYPE));
        let bytes = headers.to_bytes().unwrap();

        let reloaded = TransportHeaders::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.content_type(), Some(JSON_TYPE));
        assert_eq!(reloaded, headers);
    }

    #[test]
    fn absent_values_produce_empty_array() {
        let mut headers = TransportHeaders::new();
        headers.add(CONTENT_TYPE, None);
        assert!(headers.is_empty());
        assert!(headers.to_bytes().unwrap().is_empty());
        assert!(TransportHeaders::from_bytes(&[]).unwrap().is_empty());
    }

    #[test]
    fn malformed_bytes_are_a_decode_error() {
        let err = TransportHeaders::from_bytes(b"[1,2").unwrap_err();
        assert!(matches!(err, SerializationError::Decode(_)));
    }
}
