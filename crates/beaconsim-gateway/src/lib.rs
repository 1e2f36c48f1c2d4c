//! # beaconsim-gateway
//!
//! Class B MAC logic for a gateway with a single half-duplex radio.
//!
//! ```text
//!  BeaconTick ──> BeaconScheduler ──┐
//!       │                           ├──> TransmitArbiter ──> RadioLink
//!       └──────> PingSlotDispatcher ┘        ▲
//!                                            └── RadioTxComplete
//! ```
//!
//! - [`TransmitArbiter`]: busy state, transmit windows, duty-cycle waiting time
//! - [`BeaconScheduler`]: drift-free beacon ticks on a fixed grid
//! - [`PingSlotDispatcher`]: Class B ping-slot derivation and downlink dispatch
//! - [`GatewayMac`] / [`EndDeviceMac`]: the two [`LorawanMac`] roles

pub mod arbiter;
pub mod beacon;
pub mod duty_cycle;
mod error;
pub mod mac;
pub mod ping_slot;
mod radio;

pub use arbiter::{ArbiterState, TransmitArbiter, TransmitWindow};
pub use beacon::{BeaconConfig, BeaconScheduler, BeaconTick, SkipReason, BEACON_INTERVAL};
pub use duty_cycle::DutyCycleLedger;
pub use error::GatewayError;
pub use mac::{
    BeaconStatus, EndDeviceConfig, EndDeviceMac, EndDeviceStats, GatewayMac, GatewayMacConfig,
    GatewayStats, LorawanMac,
};
pub use ping_slot::{
    compute_ping_slots, ClassBDevice, PingSlot, PingSlotConfig, PingSlotDispatcher, PingSlots,
    SlotOutcome,
};
pub use radio::{AttachedRadio, RadioLink};
