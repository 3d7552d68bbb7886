//! Logging setup and bus metrics.
//!
//! Counters go through the `metrics` facade; nothing is exported unless the
//! host process installs a recorder.

use conduit_core::MessageType;
use metrics::{counter, describe_counter};
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Messages handed to a consumer, by subscribed shape.
pub const DISPATCH_TOTAL: &str = "conduit_dispatch_total";

/// Consumers that returned an error, by subscribed shape.
pub const DISPATCH_FAILURES_TOTAL: &str = "conduit_dispatch_failures_total";

/// Saga dispatch outcomes, by saga type and [`SagaOutcome`].
pub const SAGA_OUTCOMES_TOTAL: &str = "conduit_saga_outcomes_total";

/// Outbound messages refused because every worker was at capacity.
pub const DISTRIBUTOR_BACKPRESSURE_TOTAL: &str = "conduit_distributor_backpressure_total";

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `info`. Returns `false`
/// when a subscriber was already installed.
pub fn init_tracing(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    result.is_ok()
}

/// Registers descriptions for every bus counter.
pub fn register_metrics() {
    describe_counter!(DISPATCH_TOTAL, "Messages handed to a consumer");
    describe_counter!(DISPATCH_FAILURES_TOTAL, "Consumers that failed");
    describe_counter!(SAGA_OUTCOMES_TOTAL, "Saga dispatch outcomes");
    describe_counter!(
        DISTRIBUTOR_BACKPRESSURE_TOTAL,
        "Outbound messages refused for lack of a worker"
    );
}

/// Result of one saga dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
    Created,
    Updated,
    Ignored,
    Conflict,
    Faulted,
}

impl SagaOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Ignored => "ignored",
            Self::Conflict => "conflict",
            Self::Faulted => "faulted",
        }
    }
}

pub(crate) fn record_dispatch(message_type: MessageType) {
    counter!(DISPATCH_TOTAL, "message_type" => message_type.short_name()).increment(1);
}

pub(crate) fn record_dispatch_failure(message_type: MessageType) {
    counter!(DISPATCH_FAILURES_TOTAL, "message_type" => message_type.short_name()).increment(1);
}

pub(crate) fn record_saga_outcome(saga_type: &'static str, outcome: SagaOutcome) {
    counter!(SAGA_OUTCOMES_TOTAL, "saga_type" => saga_type, "outcome" => outcome.as_str())
        .increment(1);
}

pub(crate) fn record_backpressure(message_type: MessageType) {
    counter!(DISTRIBUTOR_BACKPRESSURE_TOTAL, "message_type" => message_type.short_name())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_existing_subscriber() {
        init_tracing(LogFormat::Json);
        assert!(!init_tracing(LogFormat::Pretty));
    }

    #[test]
    fn outcome_labels_are_stable() {
        let labels: Vec<_> = [
            SagaOutcome::Created,
            SagaOutcome::Updated,
            SagaOutcome::Ignored,
            SagaOutcome::Conflict,
            SagaOutcome::Faulted,
        ]
        .into_iter()
        .map(SagaOutcome::as_str)
        .collect();
        assert_eq!(labels, ["created", "updated", "ignored", "conflict", "faulted"]);
    }

    #[test]
    fn recording_without_a_recorder_is_harmless() {
        register_metrics();
        record_dispatch(MessageType::of::<u8>());
        record_saga_outcome("TestSaga", SagaOutcome::Created);
    }

    #[test]
    fn log_format_parses_from_config() {
        let format: LogFormat = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
