//! In-process FIFO transport.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_core::{ClockSource, SystemClock};
use parking_lot::{Condvar, Mutex};

use super::{OutboundMessage, ReceiveCallback, ReceiveOutcome, Transport};
use crate::error::BusError;

#[derive(Default)]
struct Queue {
    messages: VecDeque<OutboundMessage>,
    /// Bumped on every send so waiters can tell new arrivals from spurious wakeups.
    arrivals: u64,
    disposed: bool,
}

/// Mutex + condvar guarded queue living entirely in memory.
///
/// Expired messages are dropped when a receive cycle reaches them. Dropping
/// the transport disposes it.
pub struct LoopbackTransport {
    address: String,
    queue: Mutex<Queue>,
    ready: Condvar,
    clock: Arc<dyn ClockSource>,
}

impl LoopbackTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_clock(address, Arc::new(SystemClock))
    }

    pub fn with_clock(address: impl Into<String>, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            address: address.into(),
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
            clock,
        }
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn disposed_error(&self) -> BusError {
        BusError::disposed(format!("transport {}", self.address))
    }
}

impl fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Transport for LoopbackTransport {
    fn address(&self) -> &str {
        &self.address
    }

    fn send(&self, message: OutboundMessage) -> Result<(), BusError> {
        let mut queue = self.queue.lock();
        if queue.disposed {
            return Err(self.disposed_error());
        }
        tracing::debug!(
            address = %self.address,
            message_type = %message.message_type,
            message_id = %message.message_id,
            "loopback send"
        );
        queue.messages.push_back(message);
        queue.arrivals += 1;
        drop(queue);
        self.ready.notify_all();
        Ok(())
    }

    fn receive(
        &self,
        callback: &mut ReceiveCallback<'_>,
        timeout: Duration,
    ) -> Result<ReceiveOutcome, BusError> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();

        loop {
            if queue.disposed {
                return Err(self.disposed_error());
            }

            let now = self.clock.now();
            let before = queue.messages.len();
            queue.messages.retain(|message| !message.is_expired(now));
            let expired = before - queue.messages.len();
            if expired > 0 {
                tracing::debug!(address = %self.address, expired, "dropped expired messages");
            }

            let accepted = queue
                .messages
                .iter()
                .enumerate()
                .find_map(|(index, message)| {
                    callback(&message.receive_context()).map(|action| (index, action))
                });

            if let Some((index, action)) = accepted {
                let message = queue.messages.remove(index);
                drop(queue);
                action();
                drop(message);
                return Ok(ReceiveOutcome::Delivered);
            }

            // Nothing acceptable: wait for a new arrival.
            let seen = queue.arrivals;
            while queue.arrivals == seen && !queue.disposed {
                if self.ready.wait_until(&mut queue, deadline).timed_out() {
                    return Ok(ReceiveOutcome::TimedOut);
                }
            }
        }
    }

    fn dispose(&self) {
        let mut queue = self.queue.lock();
        if queue.disposed {
            return;
        }
        queue.disposed = true;
        let dropped = queue.messages.len();
        queue.messages.clear();
        drop(queue);
        self.ready.notify_all();
        tracing::debug!(address = %self.address, dropped, "loopback transport disposed");
    }

    fn is_disposed(&self) -> bool {
        self.queue.lock().disposed
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.dispose();
    }
}
