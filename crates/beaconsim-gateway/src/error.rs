//! Error types for the gateway MAC.

use beacon_frame::{BeaconError, DevAddr};
use beaconsim_common::{SimError, SimTime};
use thiserror::Error;

/// Errors raised by MAC components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// A caller bypassed the arbiter's busy check.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// A device's downlink queue is at capacity.
    #[error("Downlink queue full for {dev_addr} (capacity {capacity})")]
    QueueFull {
        /// Target device.
        dev_addr: DevAddr,
        /// Configured queue limit.
        capacity: usize,
    },

    /// Downlink for a device that was never registered.
    #[error("Unknown class B device: {0}")]
    UnknownDevice(DevAddr),

    /// `ping_nb` is not a power of two in `1..=128`.
    #[error("Invalid ping_nb {0}: must be a power of two between 1 and 128")]
    InvalidPingNb(u16),

    /// Duty cycle outside `(0, 1]`.
    #[error("Invalid duty cycle {0}: must be in (0, 1]")]
    InvalidDutyCycle(f64),

    /// Beacon interval of zero, which would put every tick at the same instant.
    #[error("Invalid beacon interval: {0}")]
    InvalidBeaconInterval(SimTime),

    /// Network time could not be represented.
    #[error(transparent)]
    Codec(#[from] BeaconError),
}

impl From<GatewayError> for SimError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::ContractViolation(msg) => SimError::ContractViolation(msg),
            GatewayError::Codec(e) => SimError::Codec(e),
            other => SimError::ContractViolation(other.to_string()),
        }
    }
}
