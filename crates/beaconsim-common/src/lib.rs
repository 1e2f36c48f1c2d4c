//! # beaconsim-common
//!
//! Common types shared by all simulator crates: virtual time, entity and
//! event identifiers, the event payloads exchanged between entities, and
//! the single-threaded discrete-event kernel ([`EventQueue`], [`SimContext`]).
//!
//! Every entity runs as a callback invoked by the event loop at a specific
//! virtual time. Callbacks run to completion one at a time, so entity state
//! needs no locking.

mod context;
mod queue;
mod time;

pub use context::{EventClock, SimContext};
pub use queue::EventQueue;
pub use time::SimTime;

use beacon_frame::{BeaconError, DevAddr, FrameKind, LoraFrame};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a simulation entity (MAC, radio, medium, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create a new entity ID.
    pub const fn new(id: u64) -> Self {
        EntityId(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Handle of a scheduled event, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

// ============================================================================
// Events
// ============================================================================

/// A radio asked to put a frame on the air.
#[derive(Debug, Clone)]
pub struct RadioTxRequestEvent {
    /// Frame to transmit.
    pub frame: LoraFrame,
}

/// A radio finished transmitting a frame.
#[derive(Debug, Clone)]
pub struct RadioTxCompleteEvent {
    /// The frame that left the antenna.
    pub frame: LoraFrame,
}

/// A frame is on the air, emitted by a radio towards the medium.
#[derive(Debug, Clone)]
pub struct TransmitAirEvent {
    /// Transmitting radio.
    pub radio_id: EntityId,
    /// Frame being transmitted.
    pub frame: LoraFrame,
    /// Start of the transmission.
    pub start_time: SimTime,
    /// End of the transmission.
    pub end_time: SimTime,
}

/// A frame arrives at a radio from the medium.
#[derive(Debug, Clone)]
pub struct ReceiveAirEvent {
    /// Radio that transmitted the frame.
    pub source_radio_id: EntityId,
    /// Frame being received.
    pub frame: LoraFrame,
    /// Start of the frame on the air.
    pub start_time: SimTime,
    /// End of the frame on the air.
    pub end_time: SimTime,
}

/// Why a radio could not receive a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxFailure {
    /// The receiving radio was transmitting while the frame was on the air.
    HalfDuplex,
    /// The frame was lost on the link.
    Lost,
}

impl RxFailure {
    /// Short lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RxFailure::HalfDuplex => "half_duplex",
            RxFailure::Lost => "lost",
        }
    }
}

/// A radio delivered (or failed to deliver) a frame to its MAC.
#[derive(Debug, Clone)]
pub struct RadioRxEvent {
    /// Received frame.
    pub frame: LoraFrame,
    /// Radio that transmitted the frame.
    pub source_radio_id: EntityId,
}

/// Event payload types.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// Periodic beacon tick for a gateway.
    BeaconTick,
    /// A ping slot for a device opens.
    PingSlotFire {
        /// Device owning the slot.
        dev_addr: DevAddr,
        /// Beacon period the slot belongs to.
        period: u64,
    },
    /// MAC asks its radio to transmit.
    RadioTxRequest(RadioTxRequestEvent),
    /// Radio reports a finished transmission to its MAC.
    RadioTxComplete(RadioTxCompleteEvent),
    /// Radio puts a frame on the medium.
    TransmitAir(TransmitAirEvent),
    /// Medium delivers a frame to a radio.
    ReceiveAir(ReceiveAirEvent),
    /// Radio hands a received frame to its MAC.
    RadioRxPacket(RadioRxEvent),
    /// Radio reports a failed reception to its MAC.
    RadioRxFailed {
        /// The frame that could not be received.
        event: RadioRxEvent,
        /// Why reception failed.
        reason: RxFailure,
    },
    /// Backend asks a gateway to queue a downlink for a device.
    DownlinkRequest {
        /// Target device.
        dev_addr: DevAddr,
        /// Application payload.
        payload: Vec<u8>,
    },
    /// Device application asks its MAC to send an uplink.
    UplinkRequest {
        /// Application payload.
        payload: Vec<u8>,
    },
    /// End of a statistics period.
    StatsTick,
    /// Generic timer.
    Timer {
        /// Timer identifier.
        timer_id: u64,
    },
    /// End of simulation marker.
    SimulationEnd,
}

impl EventPayload {
    /// Short name of the payload type, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::BeaconTick => "BeaconTick",
            EventPayload::PingSlotFire { .. } => "PingSlotFire",
            EventPayload::RadioTxRequest(_) => "RadioTxRequest",
            EventPayload::RadioTxComplete(_) => "RadioTxComplete",
            EventPayload::TransmitAir(_) => "TransmitAir",
            EventPayload::ReceiveAir(_) => "ReceiveAir",
            EventPayload::RadioRxPacket(_) => "RadioRxPacket",
            EventPayload::RadioRxFailed { .. } => "RadioRxFailed",
            EventPayload::DownlinkRequest { .. } => "DownlinkRequest",
            EventPayload::UplinkRequest { .. } => "UplinkRequest",
            EventPayload::StatsTick => "StatsTick",
            EventPayload::Timer { .. } => "Timer",
            EventPayload::SimulationEnd => "SimulationEnd",
        }
    }

    /// Kind of the frame carried by this payload, if any.
    pub fn frame_kind(&self) -> Option<FrameKind> {
        match self {
            EventPayload::RadioTxRequest(e) => Some(e.frame.kind),
            EventPayload::RadioTxComplete(e) => Some(e.frame.kind),
            EventPayload::TransmitAir(e) => Some(e.frame.kind),
            EventPayload::ReceiveAir(e) => Some(e.frame.kind),
            EventPayload::RadioRxPacket(e) => Some(e.frame.kind),
            EventPayload::RadioRxFailed { event, .. } => Some(event.frame.kind),
            _ => None,
        }
    }
}

/// A scheduled simulation event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique, monotonically increasing identifier.
    pub id: EventId,
    /// When the event fires.
    pub time: SimTime,
    /// Entity that scheduled the event.
    pub source: EntityId,
    /// Entities that receive the event.
    pub targets: Vec<EntityId>,
    /// The event payload.
    pub payload: EventPayload,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap; ids break ties in scheduling order.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Errors raised while handling simulation events.
#[derive(Debug, Error)]
pub enum SimError {
    /// An event targeted an entity that does not exist.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// A component was used outside its contract. This is a programming
    /// error in the caller, not a recoverable runtime condition.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Radio-level failure.
    #[error("Radio error: {0}")]
    Radio(String),

    /// Frame encoding or decoding failure.
    #[error("Codec error: {0}")]
    Codec(#[from] BeaconError),
}

/// A simulation entity driven by the event loop.
pub trait Entity {
    /// This entity's identifier.
    fn entity_id(&self) -> EntityId;

    /// Handle an event addressed to this entity.
    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError>;
}
