//! Transport contract.
//!
//! A transport moves serialized envelopes between endpoints. Receiving uses
//! a peek-then-commit shape: the transport offers each queued message to a
//! callback, and only a callback that returns a [`ReceiveAction`] consumes
//! the message. Declined messages stay queued for a later receive cycle.

pub mod loopback;

use std::fmt;
use std::time::Duration;

use conduit_core::TransportHeaders;
use uuid::Uuid;

use crate::error::BusError;

pub use loopback::LoopbackTransport;

/// Scheme of in-process addresses.
pub const LOOPBACK_SCHEME: &str = "loopback://";

/// A serialized message handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub message_id: Uuid,
    pub message_type: String,
    /// Absolute expiration in milliseconds since Unix epoch.
    pub expiration_ms: Option<u64>,
    pub headers: TransportHeaders,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expiration_ms.is_some_and(|at| at <= now_ms)
    }

    /// Read-only view offered to receive callbacks.
    #[must_use]
    pub fn receive_context(&self) -> ReceiveContext<'_> {
        ReceiveContext {
            message_id: self.message_id,
            message_type: &self.message_type,
            expiration_ms: self.expiration_ms,
            headers: &self.headers,
            body: &self.body,
        }
    }
}

/// A queued message as seen by a receive callback.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveContext<'a> {
    pub message_id: Uuid,
    pub message_type: &'a str,
    pub expiration_ms: Option<u64>,
    pub headers: &'a TransportHeaders,
    pub body: &'a [u8],
}

impl ReceiveContext<'_> {
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.content_type()
    }
}

/// Work to run once the transport has removed the accepted message.
pub type ReceiveAction = Box<dyn FnOnce() + Send>;

/// Callback deciding whether to consume a queued message.
pub type ReceiveCallback<'a> = dyn FnMut(&ReceiveContext<'_>) -> Option<ReceiveAction> + 'a;

/// Result of one receive cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Delivered,
    TimedOut,
}

/// Moves serialized messages to and from one address.
pub trait Transport: Send + Sync + fmt::Debug {
    fn address(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] after [`dispose`](Self::dispose).
    fn send(&self, message: OutboundMessage) -> Result<(), BusError>;

    /// Offers queued messages to `callback` until one is accepted or
    /// `timeout` elapses. The accepted action runs after the message has
    /// left the queue and without any transport lock held.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disposed`] after [`dispose`](Self::dispose).
    fn receive(
        &self,
        callback: &mut ReceiveCallback<'_>,
        timeout: Duration,
    ) -> Result<ReceiveOutcome, BusError>;

    /// Releases queued messages. Idempotent.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}
