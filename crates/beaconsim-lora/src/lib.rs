//! # beaconsim-lora
//!
//! LoRa physical-layer helpers and the simulated radio used by the MAC
//! roles:
//!
//! - [`time_on_air`] and the US915 data-rate table ([`modulation`])
//! - [`SimulatedRadio`], a half-duplex radio entity with seeded frame loss
//! - [`BroadcastMedium`], which delivers every transmission to every other
//!   attached radio
//!
//! No propagation, interference or collision model is provided.

mod airtime;
mod medium;
mod radio;

pub use airtime::{modulation, time_on_air, time_on_air_with, AirtimeParams, Modulation};
pub use medium::BroadcastMedium;
pub use radio::{RadioConfig, RadioState, SimulatedRadio};

use beacon_frame::FrameId;
use beaconsim_common::SimError;
use thiserror::Error;

/// Errors raised by the simulated radio.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RadioError {
    /// A transmission was requested while another one is on the air.
    #[error("radio busy: frame {requested:?} requested while {active:?} is on the air")]
    Busy { requested: FrameId, active: FrameId },

    /// Loss probability outside `[0, 1]`.
    #[error("invalid rx loss probability: {0}")]
    InvalidLossProbability(f64),
}

impl From<RadioError> for SimError {
    fn from(err: RadioError) -> Self {
        SimError::Radio(err.to_string())
    }
}
