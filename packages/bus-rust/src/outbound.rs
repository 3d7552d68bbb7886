//! Outbound interceptors: hooks around every envelope an endpoint sends.
//!
//! Interceptors are kept in a copy-on-write list. Sends load the current
//! list without locking; adding or removing an interceptor publishes a new
//! list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use conduit_core::Envelope;

use crate::error::BusError;
use crate::pipeline::UnsubscribeToken;

/// Observes or amends envelopes on their way to a transport.
pub trait OutboundInterceptor: Send + Sync {
    /// Runs before the envelope is serialized. Returning an error cancels
    /// the send.
    fn pre_dispatch(&self, envelope: &mut Envelope) -> anyhow::Result<()> {
        let _ = envelope;
        Ok(())
    }

    /// Runs after the transport accepted the envelope.
    fn post_dispatch(&self, envelope: &Envelope) {
        let _ = envelope;
    }
}

type Entry = (u64, Arc<dyn OutboundInterceptor>);

/// Ordered interceptors shared by every endpoint of one bus.
///
/// `pre_dispatch` runs in registration order, `post_dispatch` in reverse.
#[derive(Default)]
pub struct OutboundPipeline {
    interceptors: ArcSwap<Vec<Entry>>,
    next_id: AtomicU64,
}

impl OutboundPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `interceptor`; the token removes it again.
    pub fn add_interceptor(self: &Arc<Self>, interceptor: Arc<dyn OutboundInterceptor>) -> UnsubscribeToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.interceptors.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push((id, Arc::clone(&interceptor)));
            next
        });

        let pipeline: Weak<Self> = Arc::downgrade(self);
        UnsubscribeToken::new(move || {
            if let Some(pipeline) = pipeline.upgrade() {
                pipeline.interceptors.rcu(|current| {
                    current
                        .iter()
                        .filter(|(entry, _)| *entry != id)
                        .cloned()
                        .collect::<Vec<_>>()
                });
            }
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.load().is_empty()
    }

    /// Runs `send` between the pre- and post-dispatch hooks.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Transport`] when an interceptor refuses the
    /// envelope, or the error returned by `send`. Post-dispatch hooks only
    /// run after a successful send.
    pub(crate) fn around(
        &self,
        mut envelope: Envelope,
        send: impl FnOnce(&Envelope) -> Result<(), BusError>,
    ) -> Result<(), BusError> {
        let interceptors = self.interceptors.load_full();
        for (_, interceptor) in interceptors.iter() {
            interceptor.pre_dispatch(&mut envelope).map_err(|err| {
                tracing::warn!(message_type = %envelope.message_type, error = %err, "outbound interceptor refused message");
                BusError::Transport(err)
            })?;
        }
        send(&envelope)?;
        for (_, interceptor) in interceptors.iter().rev() {
            interceptor.post_dispatch(&envelope);
        }
        Ok(())
    }
}

impl std::fmt::Debug for OutboundPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundPipeline")
            .field("interceptors", &self.len())
            .finish()
    }
}
