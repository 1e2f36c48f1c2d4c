//! MAC roles.
//!
//! [`GatewayMac`] and [`EndDeviceMac`] are the two implementations of the
//! [`LorawanMac`] capability interface. Both are simulation entities that
//! own a [`TransmitArbiter`] in front of an [`AttachedRadio`].

use std::sync::Arc;

use beacon_frame::{DataRate, DevAddr, FrameId, FrameKind, Frequency, LoraFrame, NetworkTime};
use beaconsim_common::{
    Entity, EntityId, Event, EventClock, EventId, EventPayload, RadioRxEvent, RxFailure,
    SimContext, SimError, SimTime,
};
use beaconsim_metrics::{MetricsCollector, Sample};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::beacon::{BeaconConfig, BeaconScheduler, BEACON_INTERVAL};
use crate::ping_slot::{ClassBDevice, PingSlotConfig, PingSlotDispatcher, SlotOutcome};
use crate::{AttachedRadio, GatewayError, TransmitArbiter};

/// Capability interface shared by all MAC roles.
pub trait LorawanMac {
    fn name(&self) -> &str;

    /// Hand a frame to the arbiter. Callers gate on the arbiter's waiting
    /// time first.
    fn send(&mut self, frame: LoraFrame, clock: &mut dyn EventClock) -> Result<(), GatewayError>;

    /// A frame was received.
    fn receive(&mut self, rx: &RadioRxEvent, clock: &mut dyn EventClock);

    /// A frame could not be received.
    fn failed_reception(&mut self, rx: &RadioRxEvent, reason: RxFailure);

    /// The radio finished transmitting `frame`.
    fn tx_finished(&mut self, frame: &LoraFrame, now: SimTime);

    fn is_transmitting(&self) -> bool;
}

fn frame_id(owner: EntityId, seq: &mut u64) -> FrameId {
    *seq += 1;
    FrameId((owner.0 << 32) | (*seq & 0xFFFF_FFFF))
}

// ============================================================================
// Gateway
// ============================================================================

/// Construction parameters for a [`GatewayMac`].
#[derive(Debug, Clone)]
pub struct GatewayMacConfig {
    pub name: String,
    pub beacon: BeaconConfig,
    pub ping_slots: PingSlotConfig,
    /// Duty cycle applied to every frequency; `None` disables accounting.
    pub duty_cycle: Option<f64>,
    /// Per-frequency limits that replace `duty_cycle` on those frequencies.
    pub frequency_duty_cycles: Vec<(Frequency, f64)>,
    pub devices: Vec<ClassBDevice>,
}

impl Default for GatewayMacConfig {
    fn default() -> Self {
        Self {
            name: "gateway".to_string(),
            beacon: BeaconConfig::default(),
            ping_slots: PingSlotConfig::default(),
            duty_cycle: None,
            frequency_duty_cycles: Vec::new(),
            devices: Vec::new(),
        }
    }
}

/// Counters reported by a gateway at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub beacons_sent: u64,
    pub beacons_skipped: u64,
    pub ping_slots_used: u64,
    pub ping_slots_missed: u64,
    pub downlinks_queued: u64,
    pub downlinks_dropped: u64,
    pub downlinks_pending: usize,
    pub uplinks_received: u64,
    pub rx_failed: u64,
    pub frames_transmitted: u64,
}

/// Class B gateway: beacons, ping-slot downlinks and uplink reception.
pub struct GatewayMac {
    id: EntityId,
    name: String,
    arbiter: TransmitArbiter<AttachedRadio>,
    beacon: BeaconScheduler,
    ping: PingSlotDispatcher,
    metrics: Arc<dyn MetricsCollector>,
    frame_seq: u64,
    stats: GatewayStats,
}

impl GatewayMac {
    pub fn new(
        id: EntityId,
        radio: EntityId,
        config: GatewayMacConfig,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Result<Self, GatewayError> {
        let mut arbiter = TransmitArbiter::new(config.name.clone(), AttachedRadio::new(radio), config.duty_cycle)?;
        for &(frequency, limit) in &config.frequency_duty_cycles {
            arbiter.duty_cycle_mut().set_limit(frequency, limit)?;
        }
        let mut ping = PingSlotDispatcher::new(config.ping_slots, id);
        for device in config.devices {
            ping.register(device)?;
        }
        Ok(Self {
            id,
            name: config.name,
            arbiter,
            beacon: BeaconScheduler::new(config.beacon, id)?,
            ping,
            metrics,
            frame_seq: 0,
            stats: GatewayStats::default(),
        })
    }

    /// Schedule the first beacon.
    pub fn start(&mut self, clock: &mut dyn EventClock) {
        self.beacon.start(clock);
    }

    pub fn stop(&mut self, clock: &mut dyn EventClock) {
        self.beacon.stop(clock);
    }

    pub fn arbiter(&self) -> &TransmitArbiter<AttachedRadio> {
        &self.arbiter
    }

    pub fn beacon_scheduler(&self) -> &BeaconScheduler {
        &self.beacon
    }

    pub fn ping_dispatcher(&self) -> &PingSlotDispatcher {
        &self.ping
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            beacons_sent: self.beacon.beacons_sent(),
            beacons_skipped: self.beacon.beacons_skipped(),
            ping_slots_used: self.ping.slots_used(),
            ping_slots_missed: self.ping.slots_missed(),
            downlinks_pending: self.ping.queued_total(),
            ..self.stats.clone()
        }
    }

    fn on_beacon_tick(&mut self, ctx: &mut SimContext) -> Result<(), GatewayError> {
        let id = frame_id(self.id, &mut self.frame_seq);
        let tick = self.beacon.on_tick(&mut self.arbiter, ctx, id)?;
        match tick.skipped {
            None => self.metrics.record(Sample::BeaconSent),
            Some(reason) => self.metrics.record(Sample::BeaconSkipped {
                reason: reason.as_str(),
            }),
        }
        self.ping
            .on_beacon(tick.period, tick.beacon.network_time(), tick.tick_time, ctx)
    }

    fn on_ping_slot(&mut self, dev_addr: DevAddr, period: u64, ctx: &mut SimContext) -> Result<(), GatewayError> {
        let id = frame_id(self.id, &mut self.frame_seq);
        match self.ping.on_slot_fire(dev_addr, period, &mut self.arbiter, ctx, id)? {
            SlotOutcome::Sent { .. } => {
                self.metrics.record(Sample::PingSlotUsed);
                self.metrics.record(Sample::QueueDepth(self.ping.queued_total()));
            }
            SlotOutcome::Missed { .. } => self.metrics.record(Sample::PingSlotMissed),
            SlotOutcome::Stale => {}
        }
        Ok(())
    }

    fn on_downlink_request(
        &mut self,
        dev_addr: DevAddr,
        payload: Vec<u8>,
        ctx: &mut SimContext,
    ) -> Result<(), GatewayError> {
        match self.ping.enqueue(dev_addr, payload, ctx) {
            Ok(depth) => {
                self.stats.downlinks_queued += 1;
                self.metrics.record(Sample::QueueDepth(self.ping.queued_total()));
                debug!(gateway = %self.name, %dev_addr, depth, "downlink queued");
                Ok(())
            }
            Err(err @ (GatewayError::QueueFull { .. } | GatewayError::UnknownDevice(_))) => {
                self.stats.downlinks_dropped += 1;
                self.metrics.record(Sample::DownlinkDropped);
                warn!(gateway = %self.name, %dev_addr, error = %err, "downlink dropped");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl LorawanMac for GatewayMac {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, frame: LoraFrame, clock: &mut dyn EventClock) -> Result<(), GatewayError> {
        self.arbiter.send(frame, clock).map(|_| ())
    }

    fn receive(&mut self, rx: &RadioRxEvent, _clock: &mut dyn EventClock) {
        self.arbiter.receive(rx);
        self.metrics.record(Sample::RxPacket {
            kind: rx.frame.kind.as_str(),
        });
        if let FrameKind::Uplink { dev_addr } = rx.frame.kind {
            self.stats.uplinks_received += 1;
            debug!(gateway = %self.name, %dev_addr, bytes = rx.frame.len(), "uplink received");
        }
    }

    fn failed_reception(&mut self, rx: &RadioRxEvent, reason: RxFailure) {
        self.arbiter.failed_reception(rx, reason);
        self.stats.rx_failed += 1;
        self.metrics.record(Sample::RxFailed {
            reason: reason.as_str(),
        });
    }

    fn tx_finished(&mut self, frame: &LoraFrame, now: SimTime) {
        if let Some(window) = self.arbiter.tx_finished(frame.id, now) {
            self.stats.frames_transmitted += 1;
            self.metrics.record(Sample::TxPacket {
                kind: frame.kind.as_str(),
                bits: frame.bits(),
                airtime_us: window.airtime().as_micros(),
            });
        }
    }

    fn is_transmitting(&self) -> bool {
        self.arbiter.is_transmitting()
    }
}

impl Entity for GatewayMac {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::BeaconTick => self.on_beacon_tick(ctx)?,
            EventPayload::PingSlotFire { dev_addr, period } => {
                self.on_ping_slot(*dev_addr, *period, ctx)?
            }
            EventPayload::DownlinkRequest { dev_addr, payload } => {
                self.on_downlink_request(*dev_addr, payload.clone(), ctx)?
            }
            EventPayload::RadioTxComplete(done) => self.tx_finished(&done.frame, ctx.time()),
            EventPayload::RadioRxPacket(rx) => self.receive(rx, ctx),
            EventPayload::RadioRxFailed { event, reason } => self.failed_reception(event, *reason),
            _ => {}
        }
        Ok(())
    }
}

// ============================================================================
// End device
// ============================================================================

/// Consecutive missed beacons after which a device considers the beacon lost.
pub const MAX_BEACONS_MISSED: u32 = 3;

/// Extra wait past the expected beacon time before counting it as missed.
pub const BEACON_GUARD: SimTime = SimTime::from_secs(3);

const BEACON_TIMEOUT_TIMER: u64 = 1;

/// Construction parameters for an [`EndDeviceMac`].
#[derive(Debug, Clone)]
pub struct EndDeviceConfig {
    pub name: String,
    pub dev_addr: DevAddr,
    pub data_rate: DataRate,
    pub frequency: Frequency,
    pub duty_cycle: Option<f64>,
    pub beacon_interval: SimTime,
}

impl EndDeviceConfig {
    pub fn new(name: impl Into<String>, dev_addr: DevAddr) -> Self {
        Self {
            name: name.into(),
            dev_addr,
            data_rate: DataRate::Dr0,
            frequency: Frequency::from_hz(902_300_000),
            duty_cycle: None,
            beacon_interval: BEACON_INTERVAL,
        }
    }
}

/// Beacon tracking state of an end device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconStatus {
    /// No beacon received yet.
    Searching,
    Acquired,
    /// Too many consecutive beacons missed.
    Lost,
}

/// Counters reported by an end device at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndDeviceStats {
    pub beacon_status: BeaconStatus,
    pub beacons_received: u64,
    pub beacons_missed: u64,
    /// Network time of the last beacon, in seconds.
    pub last_beacon_time: Option<f64>,
    pub downlinks_received: u64,
    pub uplinks_sent: u64,
    pub uplinks_deferred: u64,
    pub rx_failed: u64,
}

/// Class B end device: tracks beacons, counts its downlinks and sends
/// scripted uplinks.
pub struct EndDeviceMac {
    id: EntityId,
    config: EndDeviceConfig,
    arbiter: TransmitArbiter<AttachedRadio>,
    metrics: Arc<dyn MetricsCollector>,
    frame_seq: u64,
    status: BeaconStatus,
    last_beacon: Option<NetworkTime>,
    consecutive_missed: u32,
    beacon_timeout: Option<EventId>,
    beacons_received: u64,
    beacons_missed: u64,
    downlinks_received: u64,
    uplinks_sent: u64,
    uplinks_deferred: u64,
    rx_failed: u64,
}

impl EndDeviceMac {
    pub fn new(
        id: EntityId,
        radio: EntityId,
        config: EndDeviceConfig,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Result<Self, GatewayError> {
        let arbiter = TransmitArbiter::new(config.name.clone(), AttachedRadio::new(radio), config.duty_cycle)?;
        Ok(Self {
            id,
            config,
            arbiter,
            metrics,
            frame_seq: 0,
            status: BeaconStatus::Searching,
            last_beacon: None,
            consecutive_missed: 0,
            beacon_timeout: None,
            beacons_received: 0,
            beacons_missed: 0,
            downlinks_received: 0,
            uplinks_sent: 0,
            uplinks_deferred: 0,
            rx_failed: 0,
        })
    }

    pub fn dev_addr(&self) -> DevAddr {
        self.config.dev_addr
    }

    pub fn beacon_status(&self) -> BeaconStatus {
        self.status
    }

    pub fn last_beacon(&self) -> Option<NetworkTime> {
        self.last_beacon
    }

    pub fn stats(&self) -> EndDeviceStats {
        EndDeviceStats {
            beacon_status: self.status,
            beacons_received: self.beacons_received,
            beacons_missed: self.beacons_missed,
            last_beacon_time: self.last_beacon.map(|t| t.as_secs_f64()),
            downlinks_received: self.downlinks_received,
            uplinks_sent: self.uplinks_sent,
            uplinks_deferred: self.uplinks_deferred,
            rx_failed: self.rx_failed,
        }
    }

    fn arm_beacon_timeout(&mut self, delay: SimTime, clock: &mut dyn EventClock) {
        if let Some(id) = self.beacon_timeout.take() {
            clock.cancel(id);
        }
        self.beacon_timeout = Some(clock.schedule_after(
            delay,
            vec![self.id],
            EventPayload::Timer {
                timer_id: BEACON_TIMEOUT_TIMER,
            },
        ));
    }

    fn on_beacon(&mut self, time: NetworkTime, clock: &mut dyn EventClock) {
        if self.last_beacon.is_some_and(|last| time <= last) {
            warn!(device = %self.config.name, network_time = %time, "beacon time went backwards");
        }
        if self.status != BeaconStatus::Acquired {
            info!(device = %self.config.name, network_time = %time, "beacon acquired");
        }
        self.status = BeaconStatus::Acquired;
        self.last_beacon = Some(time);
        self.beacons_received += 1;
        self.consecutive_missed = 0;
        self.arm_beacon_timeout(self.config.beacon_interval + BEACON_GUARD, clock);
    }

    fn on_beacon_timeout(&mut self, clock: &mut dyn EventClock) {
        self.beacon_timeout = None;
        self.beacons_missed += 1;
        self.consecutive_missed += 1;
        if self.consecutive_missed >= MAX_BEACONS_MISSED {
            self.status = BeaconStatus::Lost;
            warn!(device = %self.config.name, missed = self.consecutive_missed, "beacon lost");
        } else {
            debug!(device = %self.config.name, missed = self.consecutive_missed, "beacon missed");
            self.arm_beacon_timeout(self.config.beacon_interval, clock);
        }
    }

    fn on_uplink_request(&mut self, payload: &[u8], ctx: &mut SimContext) -> Result<(), GatewayError> {
        let wait = self.arbiter.waiting_time(self.config.frequency, ctx.time());
        if !wait.is_zero() {
            self.uplinks_deferred += 1;
            debug!(device = %self.config.name, wait = %wait, "uplink deferred");
            ctx.post_event(
                wait,
                vec![self.id],
                EventPayload::UplinkRequest {
                    payload: payload.to_vec(),
                },
            );
            return Ok(());
        }
        let frame = LoraFrame::uplink(
            frame_id(self.id, &mut self.frame_seq),
            self.config.dev_addr,
            payload.to_vec(),
            self.config.data_rate,
            self.config.frequency,
        );
        self.send(frame, ctx)?;
        self.uplinks_sent += 1;
        Ok(())
    }
}

impl LorawanMac for EndDeviceMac {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn send(&mut self, frame: LoraFrame, clock: &mut dyn EventClock) -> Result<(), GatewayError> {
        self.arbiter.send(frame, clock).map(|_| ())
    }

    fn receive(&mut self, rx: &RadioRxEvent, clock: &mut dyn EventClock) {
        self.arbiter.receive(rx);
        match rx.frame.kind {
            FrameKind::Beacon => match rx.frame.as_beacon() {
                Some(Ok(beacon)) => {
                    self.metrics.record(Sample::RxPacket { kind: "beacon" });
                    self.on_beacon(beacon.network_time(), clock);
                }
                Some(Err(err)) => {
                    warn!(device = %self.config.name, error = %err, "undecodable beacon");
                }
                None => {}
            },
            FrameKind::Downlink { dev_addr } if dev_addr == self.config.dev_addr => {
                self.downlinks_received += 1;
                self.metrics.record(Sample::RxPacket { kind: "downlink" });
                debug!(device = %self.config.name, bytes = rx.frame.len(), "downlink received");
            }
            _ => {}
        }
    }

    fn failed_reception(&mut self, rx: &RadioRxEvent, reason: RxFailure) {
        self.arbiter.failed_reception(rx, reason);
        let addressed_to_us = match rx.frame.kind {
            FrameKind::Beacon => true,
            FrameKind::Downlink { dev_addr } => dev_addr == self.config.dev_addr,
            FrameKind::Uplink { .. } => false,
        };
        if addressed_to_us {
            self.rx_failed += 1;
            self.metrics.record(Sample::RxFailed {
                reason: reason.as_str(),
            });
        }
    }

    fn tx_finished(&mut self, frame: &LoraFrame, now: SimTime) {
        if let Some(window) = self.arbiter.tx_finished(frame.id, now) {
            self.metrics.record(Sample::TxPacket {
                kind: frame.kind.as_str(),
                bits: frame.bits(),
                airtime_us: window.airtime().as_micros(),
            });
        }
    }

    fn is_transmitting(&self) -> bool {
        self.arbiter.is_transmitting()
    }
}

impl Entity for EndDeviceMac {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::UplinkRequest { payload } => self.on_uplink_request(payload, ctx)?,
            EventPayload::Timer {
                timer_id: BEACON_TIMEOUT_TIMER,
            } => self.on_beacon_timeout(ctx),
            EventPayload::RadioTxComplete(done) => self.tx_finished(&done.frame, ctx.time()),
            EventPayload::RadioRxPacket(rx) => self.receive(rx, ctx),
            EventPayload::RadioRxFailed { event, reason } => self.failed_reception(event, *reason),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_frame::{BeaconFrame, DataRate};
    use beaconsim_common::RadioTxCompleteEvent;
    use beaconsim_lora::{BroadcastMedium, RadioConfig, SimulatedRadio};
    use beaconsim_metrics::{MetricLabels, PeriodCollector};

    use crate::ping_slot::{compute_ping_slots, DEFAULT_PING_KEY};

    const GW: EntityId = EntityId(1);
    const GW_RADIO: EntityId = EntityId(2);
    const DEV: EntityId = EntityId(3);
    const DEV_RADIO: EntityId = EntityId(4);
    const MEDIUM: EntityId = EntityId(5);
    const ADDR: DevAddr = DevAddr::new(0x2601_0001);

    struct World {
        ctx: SimContext,
        gw: GatewayMac,
        gw_radio: SimulatedRadio,
        dev: EndDeviceMac,
        dev_radio: SimulatedRadio,
        medium: BroadcastMedium,
        gw_metrics: Arc<PeriodCollector>,
    }

    impl World {
        fn new(gw_config: GatewayMacConfig) -> Self {
            let gw_metrics = Arc::new(PeriodCollector::new(MetricLabels::new("gw0", "gateway")));
            let dev_metrics = Arc::new(PeriodCollector::new(MetricLabels::new("dev0", "end_device")));
            let mut medium = BroadcastMedium::new(MEDIUM);
            medium.attach(GW_RADIO);
            medium.attach(DEV_RADIO);
            Self {
                ctx: SimContext::new(),
                gw: GatewayMac::new(GW, GW_RADIO, gw_config, gw_metrics.clone()).unwrap(),
                gw_radio: SimulatedRadio::new(GW_RADIO, "gw0", GW, MEDIUM, RadioConfig::default(), 1)
                    .unwrap(),
                dev: EndDeviceMac::new(DEV, DEV_RADIO, EndDeviceConfig::new("dev0", ADDR), dev_metrics)
                    .unwrap(),
                dev_radio: SimulatedRadio::new(DEV_RADIO, "dev0", DEV, MEDIUM, RadioConfig::default(), 2)
                    .unwrap(),
                medium,
                gw_metrics,
            }
        }

        fn run_until(&mut self, until: SimTime) {
            while let Some(time) = self.ctx.peek_time() {
                if time > until {
                    break;
                }
                let event = self.ctx.next_event().unwrap();
                for target in event.targets.clone() {
                    self.ctx.set_source(target);
                    let entity: &mut dyn Entity = match target {
                        GW => &mut self.gw,
                        GW_RADIO => &mut self.gw_radio,
                        DEV => &mut self.dev,
                        DEV_RADIO => &mut self.dev_radio,
                        MEDIUM => &mut self.medium,
                        other => panic!("unknown target {other}"),
                    };
                    entity.handle_event(&event, &mut self.ctx).unwrap();
                }
            }
        }
    }

    fn gateway_config() -> GatewayMacConfig {
        GatewayMacConfig {
            name: "gw0".into(),
            devices: vec![ClassBDevice {
                dev_addr: ADDR,
                ping_nb: 8,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_device_tracks_beacons() {
        let mut w = World::new(gateway_config());
        w.gw.start(&mut w.ctx);
        w.run_until(SimTime::from_secs(300));

        assert_eq!(w.gw.stats().beacons_sent, 3);
        let stats = w.dev.stats();
        assert_eq!(stats.beacon_status, BeaconStatus::Acquired);
        assert_eq!(stats.beacons_received, 3);
        assert_eq!(stats.last_beacon_time, Some(256.0));
        assert!(!w.gw.is_transmitting());
    }

    #[test]
    fn test_device_loses_beacon_after_three_misses() {
        let mut w = World::new(gateway_config());
        w.gw.start(&mut w.ctx);
        w.run_until(SimTime::from_secs(1));
        w.gw.stop(&mut w.ctx);
        w.run_until(SimTime::from_secs(1_000));

        let stats = w.dev.stats();
        assert_eq!(stats.beacons_received, 1);
        assert_eq!(stats.beacons_missed, 3);
        assert_eq!(stats.beacon_status, BeaconStatus::Lost);
    }

    #[test]
    fn test_downlink_delivered_in_ping_slot() {
        let mut w = World::new(gateway_config());
        w.gw.start(&mut w.ctx);
        w.ctx.post_event(
            SimTime::from_secs(10),
            vec![GW],
            EventPayload::DownlinkRequest {
                dev_addr: ADDR,
                payload: vec![1, 2, 3, 4],
            },
        );
        w.run_until(SimTime::from_secs(127));

        assert_eq!(w.gw.stats().ping_slots_used, 1);
        assert_eq!(w.dev.stats().downlinks_received, 1);
        let period = w.gw_metrics.take_period();
        assert_eq!(period.beacons_sent, 1);
        assert_eq!(period.ping_slots_used, 1);
        assert_eq!(period.tx_packets, 2);
    }

    #[test]
    fn test_unknown_device_downlink_is_dropped() {
        let mut w = World::new(gateway_config());
        w.ctx.post_immediate(
            vec![GW],
            EventPayload::DownlinkRequest {
                dev_addr: DevAddr::new(0xDEAD_BEEF),
                payload: vec![0],
            },
        );
        w.run_until(SimTime::from_secs(1));
        assert_eq!(w.gw.stats().downlinks_dropped, 1);
        assert_eq!(w.gw_metrics.take_period().downlinks_dropped, 1);
    }

    #[test]
    fn test_uplink_deferred_while_transmitting() {
        let mut w = World::new(gateway_config());
        for _ in 0..2 {
            w.ctx.post_immediate(vec![DEV], EventPayload::UplinkRequest { payload: vec![0; 12] });
        }
        w.run_until(SimTime::from_secs(5));

        let stats = w.dev.stats();
        assert_eq!(stats.uplinks_sent, 2);
        assert!(stats.uplinks_deferred >= 1);
        assert_eq!(w.gw.stats().uplinks_received, 2);
    }

    #[test]
    fn test_half_duplex_gateway_misses_uplink_during_beacon() {
        let mut w = World::new(gateway_config());
        w.gw.start(&mut w.ctx);
        // The uplink starts while the beacon is on the air.
        w.ctx.post_event(
            SimTime::from_millis(1),
            vec![DEV],
            EventPayload::UplinkRequest { payload: vec![0; 4] },
        );
        w.run_until(SimTime::from_secs(2));
        let stats = w.gw.stats();
        assert_eq!(stats.uplinks_received, 0);
        assert_eq!(stats.rx_failed, 1);
    }

    #[test]
    fn test_stray_completion_is_ignored() {
        let mut w = World::new(gateway_config());
        let beacon = BeaconFrame::new(NetworkTime::ZERO, DataRate::Dr3, Frequency::from_mhz(923.3));
        w.ctx.post_immediate(
            vec![GW],
            EventPayload::RadioTxComplete(RadioTxCompleteEvent {
                frame: LoraFrame::beacon(FrameId(77), &beacon),
            }),
        );
        w.run_until(SimTime::from_secs(1));
        assert_eq!(w.gw.stats().frames_transmitted, 0);
    }

    #[test]
    fn test_contract_violation_surfaces() {
        let mut w = World::new(gateway_config());
        let beacon = BeaconFrame::new(NetworkTime::ZERO, DataRate::Dr3, Frequency::from_mhz(923.3));
        w.gw.send(LoraFrame::beacon(FrameId(1), &beacon), &mut w.ctx).unwrap();
        let err = w
            .gw
            .send(LoraFrame::beacon(FrameId(2), &beacon), &mut w.ctx)
            .unwrap_err();
        let err: SimError = err.into();
        assert!(matches!(err, SimError::ContractViolation(_)));
    }

    #[test]
    fn test_frequency_duty_cycle_overrides() {
        let sub_band = Frequency::from_mhz(869.525);
        let w = World::new(GatewayMacConfig {
            duty_cycle: Some(0.01),
            frequency_duty_cycles: vec![(sub_band, 0.1)],
            ..gateway_config()
        });
        let ledger = w.gw.arbiter().duty_cycle();
        assert_eq!(ledger.limit(sub_band), Some(0.1));
        assert_eq!(ledger.limit(Frequency::from_mhz(923.3)), Some(0.01));

        let metrics = Arc::new(PeriodCollector::new(MetricLabels::new("gw0", "gateway")));
        let config = GatewayMacConfig {
            frequency_duty_cycles: vec![(sub_band, 1.5)],
            ..gateway_config()
        };
        assert!(matches!(
            GatewayMac::new(GW, GW_RADIO, config, metrics),
            Err(GatewayError::InvalidDutyCycle(d)) if d == 1.5
        ));
    }

    #[test]
    fn test_zero_beacon_interval_rejected() {
        let metrics = Arc::new(PeriodCollector::new(MetricLabels::new("gw0", "gateway")));
        let mut config = gateway_config();
        config.beacon.interval = SimTime::ZERO;
        assert!(matches!(
            GatewayMac::new(GW, GW_RADIO, config, metrics),
            Err(GatewayError::InvalidBeaconInterval(SimTime::ZERO))
        ));
    }

    #[test]
    fn test_beacon_tick_and_ping_slot_at_same_instant() {
        // Pick the interval so the first slot of period 0 opens exactly on
        // the next tick. The tick was scheduled first and wins the tie.
        let slot = compute_ping_slots(
            &DEFAULT_PING_KEY,
            NetworkTime::ZERO,
            ADDR,
            8,
            Frequency::from_mhz(923.3),
            DataRate::Dr8,
        )
        .unwrap()
        .next()
        .unwrap();
        let mut config = gateway_config();
        config.beacon.interval = slot.offset;

        let mut w = World::new(config);
        w.ctx.post_immediate(
            vec![GW],
            EventPayload::DownlinkRequest {
                dev_addr: ADDR,
                payload: vec![9],
            },
        );
        w.run_until(SimTime::ZERO);
        w.gw.start(&mut w.ctx);
        w.run_until(slot.offset);

        let stats = w.gw.stats();
        assert_eq!(stats.beacons_sent, 2);
        assert_eq!(stats.beacons_skipped, 0);
        assert_eq!(stats.ping_slots_used, 0);
        assert_eq!(stats.ping_slots_missed, 0);
        assert_eq!(w.gw.ping_dispatcher().queue_len(ADDR), 1);
        assert!(w.gw.is_transmitting());
    }
}
