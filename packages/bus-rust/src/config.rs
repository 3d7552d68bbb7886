use conduit_core::ContentType;
use serde::{Deserialize, Serialize};

/// Bus-level configuration.
///
/// Controls the input endpoint, the receive loop cadence, shutdown draining,
/// and the serializer used on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusConfig {
    /// Address of the queue this bus receives from.
    pub input_address: String,
    /// How long one receive cycle waits for a message, in milliseconds.
    pub receive_timeout_ms: u64,
    /// How long `stop` waits for in-flight deliveries, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Codec used for outbound messages.
    pub content_type: ContentType,
    pub distributor: DistributorConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            input_address: "loopback://localhost/conduit".to_string(),
            receive_timeout_ms: 100,
            drain_timeout_ms: 5_000,
            content_type: ContentType::Json,
            distributor: DistributorConfig::default(),
        }
    }
}

/// Limits applied to workers that register without announcing their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DistributorConfig {
    pub default_in_progress_limit: u32,
    pub default_pending_limit: u32,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            default_in_progress_limit: 4,
            default_pending_limit: 16,
        }
    }
}
