//! Error types for beacon-frame.

use thiserror::Error;

/// Errors that can occur while building or decoding beacon frames.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BeaconError {
    /// A time value cannot be represented in the fixed-width wire field
    /// or in the in-memory network-time representation.
    #[error("Network time out of range: {0}")]
    Range(String),

    /// Buffer too short for the field being read or written.
    #[error("Buffer too short: {actual} bytes (need {needed})")]
    BufferTooShort {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Unknown LoRaWAN data rate index.
    #[error("Invalid data rate index: {0}")]
    InvalidDataRate(u8),
}

impl BeaconError {
    /// Create a range error.
    pub fn range(message: impl Into<String>) -> Self {
        BeaconError::Range(message.into())
    }
}
