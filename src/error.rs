//! Driver fault taxonomy.
//!
//! Faults never reach the polling client as errors: the service absorbs each
//! one into the status bus, and the `Display` text becomes the status message.

use crate::domain::models::GattStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// BLE is unsupported on this host or the adapter is switched off.
    #[error("{0}")]
    AdapterUnavailable(String),

    /// The scan window elapsed without a matching advertisement.
    #[error("NO BlueLightMeter found")]
    DiscoveryTimeout,

    #[error("service discovery failed with status {status}")]
    ServiceDiscoveryFailed { status: GattStatus },

    /// Services were discovered but the meter characteristics are absent.
    #[error("BLM characteristics not found")]
    CharacteristicsMissing,

    /// A read or write was rejected by the transport or completed with an error.
    #[error("{0}")]
    CharacteristicOperationFailed(String),

    #[error("BLM disconnected: {0}")]
    UnexpectedDisconnect(String),
}

/// Malformed `setParameters` input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("empty parameter string")]
    Empty,

    #[error("invalid hex token {token:?}")]
    InvalidToken { token: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_found() {
        assert!(DriverError::DiscoveryTimeout.to_string().contains("found"));
    }

    #[test]
    fn test_service_discovery_embeds_status() {
        let err = DriverError::ServiceDiscoveryFailed {
            status: GattStatus(133),
        };
        assert_eq!(err.to_string(), "service discovery failed with status 133");
    }
}
