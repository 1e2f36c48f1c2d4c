//! # beacon-frame
//!
//! Frame types for the Class B beacon simulator and the network-time wire
//! codec carried inside every beacon.
//!
//! ## Example
//!
//! ```rust
//! use beacon_frame::{BeaconFrame, DataRate, Frequency, NetworkTime};
//!
//! let beacon = BeaconFrame::new(
//!     NetworkTime::from_secs_f64(12345.678)?,
//!     DataRate::Dr3,
//!     Frequency::from_mhz(923.3),
//! );
//! assert_eq!(beacon.to_bytes(), [0x00, 0x00, 0x00, 0x00, 0x00, 0xBC, 0x61, 0x4E]);
//! # Ok::<(), beacon_frame::BeaconError>(())
//! ```

pub mod codec;
mod error;

pub use codec::{decode_timestamp, encode_timestamp, encode_timestamp_into, TIMESTAMP_FIELD_LEN};
pub use error::BeaconError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Network Time
// ============================================================================

/// Seconds since the network epoch, held as integer microseconds.
///
/// The in-memory value keeps microsecond precision; the wire field keeps
/// whole milliseconds only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NetworkTime(u64);

impl NetworkTime {
    /// The network epoch.
    pub const ZERO: NetworkTime = NetworkTime(0);

    /// Create a network time from microseconds since epoch.
    pub const fn from_micros(micros: u64) -> Self {
        NetworkTime(micros)
    }

    /// Create a network time from whole milliseconds since epoch.
    ///
    /// Returns `None` if the value overflows the microsecond representation.
    pub fn from_millis(millis: u64) -> Option<Self> {
        millis.checked_mul(1_000).map(NetworkTime)
    }

    /// Create a network time from whole seconds since epoch.
    pub fn from_secs(secs: u64) -> Result<Self, BeaconError> {
        secs.checked_mul(1_000_000)
            .map(NetworkTime)
            .ok_or_else(|| BeaconError::range(format!("{secs} s overflows network time")))
    }

    /// Create a network time from fractional seconds since epoch.
    ///
    /// The value is rounded to the nearest microsecond. Negative,
    /// non-finite and oversized values are rejected.
    pub fn from_secs_f64(secs: f64) -> Result<Self, BeaconError> {
        if !secs.is_finite() {
            return Err(BeaconError::range(format!("{secs} is not a finite time")));
        }
        if secs < 0.0 {
            return Err(BeaconError::range(format!("{secs} is before the network epoch")));
        }
        let micros = (secs * 1_000_000.0).round();
        // 2^64 is exactly representable; anything at or above it does not fit.
        if micros >= 18_446_744_073_709_551_616.0 {
            return Err(BeaconError::range(format!("{secs} s overflows network time")));
        }
        Ok(NetworkTime(micros as u64))
    }

    /// Microseconds since epoch.
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Whole milliseconds since epoch (truncated).
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }

    /// Whole seconds since epoch (truncated).
    pub const fn as_secs(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Fractional seconds since epoch.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// This time with sub-millisecond precision dropped, as it appears on the wire.
    pub const fn truncated_to_millis(&self) -> Self {
        NetworkTime(self.0 / 1_000 * 1_000)
    }

    /// Add a number of microseconds, returning `None` on overflow.
    pub fn checked_add_micros(&self, micros: u64) -> Option<Self> {
        self.0.checked_add(micros).map(NetworkTime)
    }
}

impl fmt::Display for NetworkTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}s", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

// ============================================================================
// Radio Parameters
// ============================================================================

/// LoRaWAN data rate index.
///
/// Indices follow the US915 plan; 5-7 are reserved there and not modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataRate {
    /// DR0 (uplink, SF10 / 125 kHz).
    Dr0,
    /// DR1 (uplink, SF9 / 125 kHz).
    Dr1,
    /// DR2 (uplink, SF8 / 125 kHz).
    Dr2,
    /// DR3 (uplink, SF7 / 125 kHz).
    Dr3,
    /// DR4 (uplink, SF8 / 500 kHz).
    Dr4,
    /// DR8 (downlink, SF12 / 500 kHz).
    Dr8,
    /// DR9 (downlink, SF11 / 500 kHz).
    Dr9,
    /// DR10 (downlink, SF10 / 500 kHz).
    Dr10,
    /// DR11 (downlink, SF9 / 500 kHz).
    Dr11,
    /// DR12 (downlink, SF8 / 500 kHz).
    Dr12,
    /// DR13 (downlink, SF7 / 500 kHz).
    Dr13,
}

impl DataRate {
    /// Look up a data rate by its LoRaWAN index.
    pub fn from_index(index: u8) -> Result<Self, BeaconError> {
        Ok(match index {
            0 => DataRate::Dr0,
            1 => DataRate::Dr1,
            2 => DataRate::Dr2,
            3 => DataRate::Dr3,
            4 => DataRate::Dr4,
            8 => DataRate::Dr8,
            9 => DataRate::Dr9,
            10 => DataRate::Dr10,
            11 => DataRate::Dr11,
            12 => DataRate::Dr12,
            13 => DataRate::Dr13,
            other => return Err(BeaconError::InvalidDataRate(other)),
        })
    }

    /// The LoRaWAN index of this data rate.
    pub const fn index(&self) -> u8 {
        match self {
            DataRate::Dr0 => 0,
            DataRate::Dr1 => 1,
            DataRate::Dr2 => 2,
            DataRate::Dr3 => 3,
            DataRate::Dr4 => 4,
            DataRate::Dr8 => 8,
            DataRate::Dr9 => 9,
            DataRate::Dr10 => 10,
            DataRate::Dr11 => 11,
            DataRate::Dr12 => 12,
            DataRate::Dr13 => 13,
        }
    }
}

impl TryFrom<u8> for DataRate {
    type Error = BeaconError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        DataRate::from_index(index)
    }
}

impl From<DataRate> for u8 {
    fn from(dr: DataRate) -> u8 {
        dr.index()
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DR{}", self.index())
    }
}

/// Channel identifier: centre frequency in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Frequency(u32);

impl Frequency {
    /// Create a frequency from Hz.
    pub const fn from_hz(hz: u32) -> Self {
        Frequency(hz)
    }

    /// Create a frequency from MHz, rounded to the nearest Hz.
    pub fn from_mhz(mhz: f64) -> Self {
        Frequency((mhz * 1_000_000.0).round() as u32)
    }

    /// Frequency in Hz.
    pub const fn as_hz(&self) -> u32 {
        self.0
    }

    /// Frequency in MHz.
    pub fn as_mhz(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} MHz", self.as_mhz())
    }
}

/// 32-bit LoRaWAN device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DevAddr(u32);

impl DevAddr {
    /// Create a device address from its numeric value.
    pub const fn new(addr: u32) -> Self {
        DevAddr(addr)
    }

    /// Numeric value of the address.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl FromStr for DevAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| format!("invalid device address '{s}': {e}"))?;
        let bytes: [u8; 4] = bytes
            .try_into()
            .map_err(|_| format!("device address '{s}' must be 4 bytes"))?;
        Ok(DevAddr(u32::from_be_bytes(bytes)))
    }
}

impl TryFrom<String> for DevAddr {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DevAddr> for String {
    fn from(addr: DevAddr) -> String {
        addr.to_string()
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

// ============================================================================
// Frames
// ============================================================================

/// A beacon produced once per beacon interval.
///
/// Immutable after creation: fields are only readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFrame {
    network_time: NetworkTime,
    data_rate: DataRate,
    frequency: Frequency,
}

impl BeaconFrame {
    /// Create a new beacon frame.
    pub const fn new(network_time: NetworkTime, data_rate: DataRate, frequency: Frequency) -> Self {
        BeaconFrame {
            network_time,
            data_rate,
            frequency,
        }
    }

    /// Decode a beacon from its payload bytes and the radio parameters it was received on.
    pub fn from_bytes(
        data: &[u8],
        data_rate: DataRate,
        frequency: Frequency,
    ) -> Result<Self, BeaconError> {
        Ok(BeaconFrame::new(decode_timestamp(data)?, data_rate, frequency))
    }

    /// Network time carried by the beacon.
    pub const fn network_time(&self) -> NetworkTime {
        self.network_time
    }

    /// Data rate the beacon is transmitted on.
    pub const fn data_rate(&self) -> DataRate {
        self.data_rate
    }

    /// Frequency the beacon is transmitted on.
    pub const fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Payload bytes of the beacon.
    pub fn to_bytes(&self) -> [u8; TIMESTAMP_FIELD_LEN] {
        encode_timestamp(self.network_time)
    }

    /// Serialized size of the beacon payload.
    pub const fn serialized_size(&self) -> usize {
        codec::serialized_size()
    }
}

impl fmt::Display for BeaconFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time={}", self.network_time.as_secs_f64())
    }
}

/// Identifier assigned to a frame by the MAC that sends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

/// What a frame on the air is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    /// Network beacon broadcast by a gateway.
    Beacon,
    /// Gateway-to-device frame.
    Downlink {
        /// Target device.
        dev_addr: DevAddr,
    },
    /// Device-to-gateway frame.
    Uplink {
        /// Source device.
        dev_addr: DevAddr,
    },
}

impl FrameKind {
    /// Short lowercase name, used for log fields and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Beacon => "beacon",
            FrameKind::Downlink { .. } => "downlink",
            FrameKind::Uplink { .. } => "uplink",
        }
    }
}

/// Largest LoRa PHY payload, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// A frame handed to the radio for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoraFrame {
    /// Sender-assigned identifier.
    pub id: FrameId,
    /// Frame kind.
    pub kind: FrameKind,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Data rate to transmit on.
    pub data_rate: DataRate,
    /// Frequency to transmit on.
    pub frequency: Frequency,
}

impl LoraFrame {
    /// Build the on-air frame carrying a beacon.
    pub fn beacon(id: FrameId, beacon: &BeaconFrame) -> Self {
        LoraFrame {
            id,
            kind: FrameKind::Beacon,
            payload: beacon.to_bytes().to_vec(),
            data_rate: beacon.data_rate(),
            frequency: beacon.frequency(),
        }
    }

    /// Build a downlink frame for a device.
    pub fn downlink(
        id: FrameId,
        dev_addr: DevAddr,
        payload: Vec<u8>,
        data_rate: DataRate,
        frequency: Frequency,
    ) -> Self {
        LoraFrame {
            id,
            kind: FrameKind::Downlink { dev_addr },
            payload,
            data_rate,
            frequency,
        }
    }

    /// Build an uplink frame from a device.
    pub fn uplink(
        id: FrameId,
        dev_addr: DevAddr,
        payload: Vec<u8>,
        data_rate: DataRate,
        frequency: Frequency,
    ) -> Self {
        LoraFrame {
            id,
            kind: FrameKind::Uplink { dev_addr },
            payload,
            data_rate,
            frequency,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload size in bits.
    pub fn bits(&self) -> u64 {
        self.payload.len() as u64 * 8
    }

    /// Decode the beacon carried by this frame, if it is one.
    pub fn as_beacon(&self) -> Option<Result<BeaconFrame, BeaconError>> {
        match self.kind {
            FrameKind::Beacon => Some(BeaconFrame::from_bytes(
                &self.payload,
                self.data_rate,
                self.frequency,
            )),
            _ => None,
        }
    }
}
