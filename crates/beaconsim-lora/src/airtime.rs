//! LoRa time on air.
//!
//! Implements the Semtech SX127x/SX126x formula for explicit-header
//! packets:
//!
//! ```text
//! Tsym     = 2^SF / BW
//! Npayload = 8 + max(ceil((8·PL − 4·SF + 28 + 16·CRC − 20·IH) / (4·(SF − 2·DE))) · (CR + 4), 0)
//! Tpacket  = (Npreamble + 4.25 + Npayload) · Tsym
//! ```

use beacon_frame::DataRate;
use beaconsim_common::SimTime;

/// Symbol times at or above this enable low data rate optimisation.
const LOW_DATA_RATE_SYMBOL_US: f64 = 16_000.0;

/// Spreading factor and bandwidth of a data rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modulation {
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
}

impl Modulation {
    /// Duration of one symbol in microseconds.
    pub fn symbol_time_us(&self) -> f64 {
        (1u64 << self.spreading_factor) as f64 * 1_000_000.0 / self.bandwidth_hz as f64
    }
}

/// US915 modulation for a data rate.
pub const fn modulation(data_rate: DataRate) -> Modulation {
    let (spreading_factor, bandwidth_hz) = match data_rate {
        DataRate::Dr0 => (10, 125_000),
        DataRate::Dr1 => (9, 125_000),
        DataRate::Dr2 => (8, 125_000),
        DataRate::Dr3 => (7, 125_000),
        DataRate::Dr4 => (8, 500_000),
        DataRate::Dr8 => (12, 500_000),
        DataRate::Dr9 => (11, 500_000),
        DataRate::Dr10 => (10, 500_000),
        DataRate::Dr11 => (9, 500_000),
        DataRate::Dr12 => (8, 500_000),
        DataRate::Dr13 => (7, 500_000),
    };
    Modulation {
        spreading_factor,
        bandwidth_hz,
    }
}

/// Packet framing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirtimeParams {
    /// Programmed preamble length in symbols.
    pub preamble_symbols: u16,
    pub explicit_header: bool,
    pub crc: bool,
    /// Coding rate index: 1 = 4/5 ... 4 = 4/8.
    pub coding_rate: u8,
}

impl Default for AirtimeParams {
    fn default() -> Self {
        Self {
            preamble_symbols: 8,
            explicit_header: true,
            crc: true,
            coding_rate: 1,
        }
    }
}

/// Time on air of a `payload_len`-byte frame with default framing.
pub fn time_on_air(data_rate: DataRate, payload_len: usize) -> SimTime {
    time_on_air_with(&AirtimeParams::default(), modulation(data_rate), payload_len)
}

/// Time on air with explicit framing and modulation.
pub fn time_on_air_with(
    params: &AirtimeParams,
    modulation: Modulation,
    payload_len: usize,
) -> SimTime {
    let t_sym = modulation.symbol_time_us();
    let sf = modulation.spreading_factor as f64;
    let de = if t_sym >= LOW_DATA_RATE_SYMBOL_US { 1.0 } else { 0.0 };
    let ih = if params.explicit_header { 0.0 } else { 1.0 };
    let crc = if params.crc { 1.0 } else { 0.0 };

    let numerator = 8.0 * payload_len as f64 - 4.0 * sf + 28.0 + 16.0 * crc - 20.0 * ih;
    let denominator = 4.0 * (sf - 2.0 * de);
    let blocks = (numerator / denominator).ceil().max(0.0);
    let payload_symbols = 8.0 + blocks * (params.coding_rate as f64 + 4.0);

    let preamble = params.preamble_symbols as f64 + 4.25;
    SimTime::from_secs_f64((preamble + payload_symbols) * t_sym / 1_000_000.0)
}
