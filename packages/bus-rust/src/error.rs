//! Error taxonomy for the bus runtime.

use conduit_core::{CorrelationId, SerializationError};

/// Errors surfaced by dispatch, subscription, sagas, the distributor, and transports.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// An initiating message arrived for a correlation id that already has
    /// a live saga instance.
    #[error("{saga_type}({correlation_id}) saga exception on receipt of {message_type}: instance already exists")]
    CorrelationConflict {
        saga_type: &'static str,
        message_type: &'static str,
        correlation_id: CorrelationId,
    },
    /// The saga's own state transition failed; nothing was persisted.
    #[error("{saga_type}({correlation_id}) saga exception on receipt of {message_type}: {reason}")]
    TransitionFault {
        saga_type: &'static str,
        message_type: &'static str,
        correlation_id: CorrelationId,
        #[source]
        reason: anyhow::Error,
    },
    /// A plain handler returned an error while consuming a message.
    #[error("handler for {message_type} failed: {source}")]
    Handler {
        message_type: &'static str,
        #[source]
        source: anyhow::Error,
    },
    /// A saga, handler, or distributor could not be wired into the pipeline.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    /// An operation was attempted on a component that has been shut down.
    #[error("the {resource} has already been disposed")]
    Disposed { resource: String },
    #[error("saga repository failure for {saga_type}: {source}")]
    Repository {
        saga_type: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("no decoder registered for message type {name}")]
    UnknownMessageType { name: String },
    /// Every candidate worker is at capacity.
    #[error("no worker available for {message_type}")]
    NoAvailableWorker { message_type: &'static str },
    /// The outbound path refused the message or failed to move it.
    #[error("transport failure: {0}")]
    Transport(#[source] anyhow::Error),
}

impl BusError {
    /// Returns `true` for [`BusError::CorrelationConflict`].
    #[must_use]
    pub fn is_correlation_conflict(&self) -> bool {
        matches!(self, Self::CorrelationConflict { .. })
    }

    /// Returns `true` for [`BusError::Disposed`].
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }

    pub(crate) fn disposed(resource: impl Into<String>) -> Self {
        Self::Disposed {
            resource: resource.into(),
        }
    }
}
