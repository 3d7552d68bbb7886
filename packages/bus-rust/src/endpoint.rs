//! Endpoints: a transport paired with the serializer used on it.

use std::fmt;
use std::sync::Arc;

use conduit_core::{
    serializer_for, ClockSource, ContentType, Envelope, Message, MessageSerializer,
    SystemClock, TransportHeaders, CONTENT_TYPE,
};
use dashmap::DashMap;
use serde::Serialize;

use crate::error::BusError;
use crate::outbound::OutboundPipeline;
use crate::transport::{LoopbackTransport, OutboundMessage, ReceiveContext, Transport, LOOPBACK_SCHEME};

/// Sends typed messages to, and decodes envelopes from, one address.
pub struct Endpoint {
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn MessageSerializer>,
    outbound: Arc<OutboundPipeline>,
}

impl Endpoint {
    pub fn new(transport: Arc<dyn Transport>, serializer: Arc<dyn MessageSerializer>) -> Self {
        Self::with_outbound(transport, serializer, Arc::new(OutboundPipeline::new()))
    }

    /// An endpoint whose sends pass through `outbound`'s interceptors.
    pub fn with_outbound(
        transport: Arc<dyn Transport>,
        serializer: Arc<dyn MessageSerializer>,
        outbound: Arc<OutboundPipeline>,
    ) -> Self {
        Self {
            transport,
            serializer,
            outbound,
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        self.transport.address()
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Wraps `message` in a fresh envelope and sends it.
    ///
    /// # Errors
    ///
    /// Returns a serialization failure or the transport's error.
    pub fn send<M: Message + Serialize>(&self, message: &M) -> Result<(), BusError> {
        self.send_envelope(Envelope::wrap(message)?)
    }

    /// Runs the outbound interceptors, then serializes `envelope` and sends
    /// it with a content-type header.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Transport`] if an interceptor refuses the
    /// envelope, a serialization failure, or the transport's error.
    pub fn send_envelope(&self, envelope: Envelope) -> Result<(), BusError> {
        self.outbound.around(envelope, |envelope| {
            let body = self.serializer.to_vec(envelope)?;
            let mut headers = TransportHeaders::new();
            headers.add(CONTENT_TYPE, Some(self.serializer.content_type()));
            self.transport.send(OutboundMessage {
                message_id: envelope.message_id,
                message_type: envelope.message_type.clone(),
                expiration_ms: envelope.expiration_ms,
                headers,
                body,
            })
        })
    }

    /// Decodes a received message with the codec named by its content-type
    /// header, falling back to this endpoint's serializer when absent.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Serialization`] for unknown content types or
    /// malformed bodies.
    pub fn deserialize(&self, context: &ReceiveContext<'_>) -> Result<Envelope, BusError> {
        let envelope = match context.content_type() {
            Some(mime) if mime != self.serializer.content_type() => {
                serializer_for(ContentType::from_mime(mime)?).deserialize(context.body)?
            }
            _ => self.serializer.deserialize(context.body)?,
        };
        Ok(envelope)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address())
            .field("content_type", &self.serializer.content_type())
            .finish()
    }
}

/// Resolves addresses to shared endpoints, creating each one once.
pub struct EndpointCache {
    endpoints: DashMap<String, Arc<Endpoint>>,
    serializer: Arc<dyn MessageSerializer>,
    outbound: Arc<OutboundPipeline>,
    clock: Arc<dyn ClockSource>,
}

impl EndpointCache {
    pub fn new(serializer: Arc<dyn MessageSerializer>) -> Self {
        Self::with_clock(serializer, Arc::new(SystemClock))
    }

    pub fn with_clock(serializer: Arc<dyn MessageSerializer>, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            endpoints: DashMap::new(),
            serializer,
            outbound: Arc::new(OutboundPipeline::new()),
            clock,
        }
    }

    /// Interceptors shared by every endpoint this cache creates.
    #[must_use]
    pub fn outbound(&self) -> &Arc<OutboundPipeline> {
        &self.outbound
    }

    /// Returns the endpoint for `address`, creating its transport on first use.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Configuration`] for schemes without a transport.
    pub fn get_endpoint(&self, address: &str) -> Result<Arc<Endpoint>, BusError> {
        if let Some(endpoint) = self.endpoints.get(address) {
            return Ok(Arc::clone(endpoint.value()));
        }
        if !address.starts_with(LOOPBACK_SCHEME) {
            return Err(BusError::Configuration(format!(
                "no transport registered for address {address}"
            )));
        }
        let endpoint = self
            .endpoints
            .entry(address.to_string())
            .or_insert_with(|| {
                tracing::debug!(address, "creating loopback endpoint");
                let transport = LoopbackTransport::with_clock(address, Arc::clone(&self.clock));
                Arc::new(Endpoint::with_outbound(
                    Arc::new(transport),
                    Arc::clone(&self.serializer),
                    Arc::clone(&self.outbound),
                ))
            })
            .value()
            .clone();
        Ok(endpoint)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Disposes every transport and forgets every endpoint.
    pub fn clear(&self) {
        for entry in &self.endpoints {
            entry.value().transport().dispose();
        }
        self.endpoints.clear();
    }
}

impl fmt::Debug for EndpointCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointCache")
            .field("endpoints", &self.endpoints.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conduit_core::{JsonMessageSerializer, MsgPackMessageSerializer, JSON_CONTENT_TYPE};
    use parking_lot::Mutex;
    use serde::Deserialize;

    use super::*;
    use crate::outbound::OutboundInterceptor;
    use crate::transport::{ReceiveAction, ReceiveOutcome};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Message for Ping {}

    fn receive_one(endpoint: &Endpoint) -> Envelope {
        let slot = Arc::new(Mutex::new(None));
        let mut callback = |ctx: &ReceiveContext<'_>| -> Option<ReceiveAction> {
            assert_eq!(ctx.content_type(), Some(JSON_CONTENT_TYPE));
            let envelope = endpoint.deserialize(ctx).unwrap();
            let slot = Arc::clone(&slot);
            Some(Box::new(move || *slot.lock() = Some(envelope)))
        };
        let outcome = endpoint
            .transport()
            .receive(&mut callback, Duration::from_millis(50))
            .unwrap();
        assert_eq!(outcome, ReceiveOutcome::Delivered);
        let envelope = slot.lock().take().unwrap();
        envelope
    }

    #[test]
    fn sent_message_is_received_as_envelope() {
        let cache = EndpointCache::new(Arc::new(JsonMessageSerializer));
        let endpoint = cache.get_endpoint("loopback://localhost/pings").unwrap();

        endpoint.send(&Ping { seq: 7 }).unwrap();

        let envelope = receive_one(&endpoint);
        assert_eq!(envelope.unwrap::<Ping>().unwrap(), Ping { seq: 7 });
    }

    #[test]
    fn body_is_decoded_with_the_header_codec() {
        let transport = Arc::new(LoopbackTransport::new("loopback://localhost/mixed"));
        let writer = Endpoint::new(transport.clone(), Arc::new(MsgPackMessageSerializer));
        let reader = Endpoint::new(transport, Arc::new(JsonMessageSerializer));

        writer.send(&Ping { seq: 3 }).unwrap();

        let mut decoded = None;
        let mut callback = |ctx: &ReceiveContext<'_>| -> Option<ReceiveAction> {
            decoded = Some(reader.deserialize(ctx).unwrap());
            Some(Box::new(|| {}))
        };
        reader
            .transport()
            .receive(&mut callback, Duration::from_millis(50))
            .unwrap();
        assert_eq!(decoded.unwrap().unwrap::<Ping>().unwrap(), Ping { seq: 3 });
    }

    #[test]
    fn cache_returns_the_same_endpoint_per_address() {
        let cache = EndpointCache::new(Arc::new(JsonMessageSerializer));
        let a = cache.get_endpoint("loopback://localhost/a").unwrap();
        let again = cache.get_endpoint("loopback://localhost/a").unwrap();
        cache.get_endpoint("loopback://localhost/b").unwrap();

        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn unknown_scheme_is_a_configuration_error() {
        let cache = EndpointCache::new(Arc::new(JsonMessageSerializer));
        let err = cache.get_endpoint("msmq://localhost/queue").unwrap_err();
        assert!(matches!(err, BusError::Configuration(_)));
    }

    struct Stamp;

    impl OutboundInterceptor for Stamp {
        fn pre_dispatch(&self, envelope: &mut Envelope) -> anyhow::Result<()> {
            envelope.headers.insert("stamped-by".into(), "outbound".into());
            Ok(())
        }
    }

    #[test]
    fn cached_endpoints_share_outbound_interceptors() {
        let cache = EndpointCache::new(Arc::new(JsonMessageSerializer));
        let token = cache.outbound().add_interceptor(Arc::new(Stamp));
        let endpoint = cache.get_endpoint("loopback://localhost/stamped").unwrap();

        endpoint.send(&Ping { seq: 1 }).unwrap();
        let stamped = receive_one(&endpoint);
        assert_eq!(stamped.headers.get("stamped-by").map(String::as_str), Some("outbound"));

        token.unsubscribe();
        endpoint.send(&Ping { seq: 2 }).unwrap();
        assert!(receive_one(&endpoint).headers.is_empty());
    }

    #[test]
    fn clear_disposes_transports() {
        let cache = EndpointCache::new(Arc::new(JsonMessageSerializer));
        let endpoint = cache.get_endpoint("loopback://localhost/a").unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert!(endpoint.send(&Ping { seq: 1 }).unwrap_err().is_disposed());
    }
}
