//! Class B ping-slot derivation and downlink dispatch.
//!
//! # Windowing rule
//!
//! For each beacon period and device:
//!
//! ```text
//! rand        = aes128_encrypt(key, beacon_time ‖ dev_addr ‖ 0x00 × 8)
//! ping_period = 4096 / ping_nb
//! ping_offset = (rand[0] + 256 · rand[1]) mod ping_period
//! slot n      = beacon_reserved + (ping_offset + n · ping_period) · slot_len,  n in 0..ping_nb
//! ```
//!
//! `beacon_time` is the beacon's network time in whole seconds and both it
//! and `dev_addr` are little-endian 32-bit values. Only the next slot of a
//! device is ever scheduled; each fire schedules the following one.

use std::collections::{BTreeMap, VecDeque};

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use beacon_frame::{DataRate, DevAddr, FrameId, Frequency, LoraFrame, NetworkTime};
use beaconsim_common::{EntityId, EventClock, EventId, EventPayload, SimTime};
use tracing::{debug, trace};

use crate::{GatewayError, RadioLink, TransmitArbiter};

/// Time after the beacon start reserved for the beacon itself.
pub const BEACON_RESERVED: SimTime = SimTime::from_millis(2_120);

/// Length of one ping slot.
pub const PING_SLOT_LEN: SimTime = SimTime::from_millis(30);

/// Number of slot positions in a beacon window (2^12).
pub const PING_SLOT_COUNT: u16 = 4096;

/// Largest supported number of ping slots per beacon period.
pub const MAX_PING_NB: u16 = 128;

/// Default Class B key: all zeros.
pub const DEFAULT_PING_KEY: [u8; 16] = [0u8; 16];

/// A downlink opportunity relative to the start of its beacon period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSlot {
    /// Slot number within the period, `0..ping_nb`.
    pub index: u16,
    /// Offset from the beacon tick.
    pub offset: SimTime,
    pub frequency: Frequency,
    pub data_rate: DataRate,
}

/// Validate `ping_nb` and return the matching ping period.
pub fn ping_period(ping_nb: u16) -> Result<u16, GatewayError> {
    if ping_nb == 0 || ping_nb > MAX_PING_NB || !ping_nb.is_power_of_two() {
        return Err(GatewayError::InvalidPingNb(ping_nb));
    }
    Ok(PING_SLOT_COUNT / ping_nb)
}

/// Pseudorandom slot offset for one device and beacon.
pub fn ping_offset(key: &[u8; 16], beacon_time: NetworkTime, dev_addr: DevAddr, period: u16) -> u16 {
    let mut block = [0u8; 16];
    // Beacon time is carried modulo 2^32, as on the air.
    block[0..4].copy_from_slice(&(beacon_time.as_secs() as u32).to_le_bytes());
    block[4..8].copy_from_slice(&dev_addr.as_u32().to_le_bytes());

    let cipher = Aes128::new(&GenericArray::from(*key));
    let mut block = GenericArray::from(block);
    cipher.encrypt_block(&mut block);

    let rand = u16::from(block[0]) | (u16::from(block[1]) << 8);
    rand % period
}

/// Lazy sequence of the ping slots of one device in one beacon period.
///
/// Not `Clone`: a consumed sequence cannot be restarted. Build a new one
/// with [`compute_ping_slots`] from the same inputs for identical slots.
#[derive(Debug)]
pub struct PingSlots {
    offset: u16,
    period: u16,
    ping_nb: u16,
    next: u16,
    frequency: Frequency,
    data_rate: DataRate,
}

impl PingSlots {
    pub fn ping_offset(&self) -> u16 {
        self.offset
    }

    pub fn ping_period(&self) -> u16 {
        self.period
    }
}

impl Iterator for PingSlots {
    type Item = PingSlot;

    fn next(&mut self) -> Option<PingSlot> {
        if self.next >= self.ping_nb {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let position = u64::from(self.offset) + u64::from(index) * u64::from(self.period);
        Some(PingSlot {
            index,
            offset: BEACON_RESERVED
                + SimTime::from_micros(position * PING_SLOT_LEN.as_micros()),
            frequency: self.frequency,
            data_rate: self.data_rate,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::from(self.ping_nb - self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PingSlots {}

/// Derive the ping slots of `dev_addr` for the period opened by a beacon
/// carrying `beacon_time`.
pub fn compute_ping_slots(
    key: &[u8; 16],
    beacon_time: NetworkTime,
    dev_addr: DevAddr,
    ping_nb: u16,
    frequency: Frequency,
    data_rate: DataRate,
) -> Result<PingSlots, GatewayError> {
    let period = ping_period(ping_nb)?;
    Ok(PingSlots {
        offset: ping_offset(key, beacon_time, dev_addr, period),
        period,
        ping_nb,
        next: 0,
        frequency,
        data_rate,
    })
}

/// A registered Class B end device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassBDevice {
    pub dev_addr: DevAddr,
    /// Ping slots per beacon period.
    pub ping_nb: u16,
}

/// Ping-slot channel and queueing limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingSlotConfig {
    pub frequency: Frequency,
    pub data_rate: DataRate,
    pub max_queue_per_device: usize,
    pub key: [u8; 16],
}

impl Default for PingSlotConfig {
    fn default() -> Self {
        Self {
            frequency: Frequency::from_hz(923_300_000),
            data_rate: DataRate::Dr8,
            max_queue_per_device: 16,
            key: DEFAULT_PING_KEY,
        }
    }
}

/// What happened when a ping slot opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// A queued downlink was handed to the arbiter.
    Sent { frame: FrameId, slot: u16 },
    /// A downlink was queued but the radio was busy. The device gets no
    /// more slots this period.
    Missed { slot: u16 },
    /// The fire belonged to an earlier period or an unknown device.
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    period: u64,
    beacon_time: NetworkTime,
    tick_time: SimTime,
}

#[derive(Debug)]
struct DeviceState {
    ping_nb: u16,
    queue: VecDeque<Vec<u8>>,
    slots: Option<PingSlots>,
    current: Option<PingSlot>,
    pending: Option<EventId>,
    missed_period: Option<u64>,
}

/// Queues downlinks per device and sends them in the device's ping slots.
#[derive(Debug)]
pub struct PingSlotDispatcher {
    config: PingSlotConfig,
    owner: EntityId,
    devices: BTreeMap<DevAddr, DeviceState>,
    anchor: Option<Anchor>,
    used: u64,
    missed: u64,
}

impl PingSlotDispatcher {
    /// Dispatcher whose slot events are delivered to `owner`.
    pub fn new(config: PingSlotConfig, owner: EntityId) -> Self {
        Self {
            config,
            owner,
            devices: BTreeMap::new(),
            anchor: None,
            used: 0,
            missed: 0,
        }
    }

    pub fn config(&self) -> &PingSlotConfig {
        &self.config
    }

    pub fn register(&mut self, device: ClassBDevice) -> Result<(), GatewayError> {
        ping_period(device.ping_nb)?;
        self.devices.insert(
            device.dev_addr,
            DeviceState {
                ping_nb: device.ping_nb,
                queue: VecDeque::new(),
                slots: None,
                current: None,
                pending: None,
                missed_period: None,
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, dev_addr: DevAddr) -> bool {
        self.devices.contains_key(&dev_addr)
    }

    pub fn queue_len(&self, dev_addr: DevAddr) -> usize {
        self.devices.get(&dev_addr).map_or(0, |d| d.queue.len())
    }

    /// Downlinks waiting across all devices.
    pub fn queued_total(&self) -> usize {
        self.devices.values().map(|d| d.queue.len()).sum()
    }

    pub fn slots_used(&self) -> u64 {
        self.used
    }

    pub fn slots_missed(&self) -> u64 {
        self.missed
    }

    /// Queue a downlink. If a beacon period is running and the device has
    /// no slot scheduled, its next remaining slot in this period is used.
    ///
    /// Returns the device's queue length.
    pub fn enqueue(
        &mut self,
        dev_addr: DevAddr,
        payload: Vec<u8>,
        clock: &mut dyn EventClock,
    ) -> Result<usize, GatewayError> {
        let capacity = self.config.max_queue_per_device;
        let device = self
            .devices
            .get_mut(&dev_addr)
            .ok_or(GatewayError::UnknownDevice(dev_addr))?;
        if device.queue.len() >= capacity {
            return Err(GatewayError::QueueFull { dev_addr, capacity });
        }
        device.queue.push_back(payload);
        let depth = device.queue.len();

        let Some(anchor) = self.anchor else {
            return Ok(depth);
        };
        if device.pending.is_some() || device.missed_period == Some(anchor.period) {
            return Ok(depth);
        }
        if device.slots.is_none() {
            device.slots = Some(Self::slots_for(&self.config, dev_addr, device.ping_nb, anchor)?);
        }
        self.schedule_next(dev_addr, clock);
        Ok(depth)
    }

    fn slots_for(
        config: &PingSlotConfig,
        dev_addr: DevAddr,
        ping_nb: u16,
        anchor: Anchor,
    ) -> Result<PingSlots, GatewayError> {
        compute_ping_slots(
            &config.key,
            anchor.beacon_time,
            dev_addr,
            ping_nb,
            config.frequency,
            config.data_rate,
        )
    }

    /// Start a new beacon period: withdraw every slot of the previous one
    /// and schedule the first slot of each device with queued traffic.
    pub fn on_beacon(
        &mut self,
        period: u64,
        beacon_time: NetworkTime,
        tick_time: SimTime,
        clock: &mut dyn EventClock,
    ) -> Result<(), GatewayError> {
        let anchor = Anchor {
            period,
            beacon_time,
            tick_time,
        };
        self.anchor = Some(anchor);

        let mut with_traffic = Vec::new();
        for (&dev_addr, device) in self.devices.iter_mut() {
            if let Some(id) = device.pending.take() {
                clock.cancel(id);
            }
            device.slots = None;
            device.current = None;
            if !device.queue.is_empty() {
                with_traffic.push((dev_addr, device.ping_nb));
            }
        }

        for (dev_addr, ping_nb) in with_traffic {
            let slots = Self::slots_for(&self.config, dev_addr, ping_nb, anchor)?;
            trace!(%dev_addr, offset = slots.ping_offset(), period = slots.ping_period(), "ping slots");
            if let Some(device) = self.devices.get_mut(&dev_addr) {
                device.slots = Some(slots);
            }
            self.schedule_next(dev_addr, clock);
        }
        Ok(())
    }

    /// Schedule the device's next slot that opens after now.
    fn schedule_next(&mut self, dev_addr: DevAddr, clock: &mut dyn EventClock) {
        let (Some(anchor), Some(device)) = (self.anchor, self.devices.get_mut(&dev_addr)) else {
            return;
        };
        let Some(slots) = device.slots.as_mut() else {
            return;
        };
        let now = clock.now();
        let next = slots.find(|slot| anchor.tick_time + slot.offset > now);
        device.current = next;
        device.pending = next.map(|slot| {
            let delay = (anchor.tick_time + slot.offset) - now;
            clock.schedule_after(
                delay,
                vec![self.owner],
                EventPayload::PingSlotFire {
                    dev_addr,
                    period: anchor.period,
                },
            )
        });
    }

    /// Handle a slot opening for `dev_addr`.
    pub fn on_slot_fire<L: RadioLink>(
        &mut self,
        dev_addr: DevAddr,
        period: u64,
        arbiter: &mut TransmitArbiter<L>,
        clock: &mut dyn EventClock,
        frame_id: FrameId,
    ) -> Result<SlotOutcome, GatewayError> {
        let current_period = self.anchor.map(|a| a.period);
        let Some(device) = self.devices.get_mut(&dev_addr) else {
            return Ok(SlotOutcome::Stale);
        };
        if current_period != Some(period) {
            return Ok(SlotOutcome::Stale);
        }
        device.pending = None;
        let Some(slot) = device.current.take() else {
            return Ok(SlotOutcome::Stale);
        };
        if device.queue.is_empty() {
            return Ok(SlotOutcome::Stale);
        }

        let now = clock.now();
        let wait = arbiter.waiting_time(slot.frequency, now);
        if !wait.is_zero() {
            device.slots = None;
            device.missed_period = Some(period);
            self.missed += 1;
            debug!(%dev_addr, slot = slot.index, wait = %wait, "ping slot missed");
            return Ok(SlotOutcome::Missed { slot: slot.index });
        }

        let Some(payload) = device.queue.pop_front() else {
            return Ok(SlotOutcome::Stale);
        };
        let remaining = device.queue.len();
        let frame = LoraFrame::downlink(frame_id, dev_addr, payload, slot.data_rate, slot.frequency);
        arbiter.send(frame, clock)?;
        self.used += 1;
        debug!(%dev_addr, slot = slot.index, frame = frame_id.0, remaining, "ping slot used");

        if remaining > 0 {
            self.schedule_next(dev_addr, clock);
        } else if let Some(device) = self.devices.get_mut(&dev_addr) {
            device.slots = None;
        }
        Ok(SlotOutcome::Sent {
            frame: frame_id,
            slot: slot.index,
        })
    }
}
