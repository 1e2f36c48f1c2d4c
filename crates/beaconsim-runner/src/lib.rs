//! Scenario runner for the Class B beacon simulator.
//!
//! Builds the entity graph described by a [`SimulationConfig`], drives the
//! shared event queue until the configured duration, and reports per-period
//! throughput along with the final gateway and end-device counters.

pub mod config;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use beacon_frame::{decode_timestamp, encode_timestamp, BeaconError, DevAddr, NetworkTime};
use beaconsim_common::{Entity, EntityId, Event, EventPayload, SimContext, SimError, SimTime};
use beaconsim_gateway::{EndDeviceMac, EndDeviceStats, GatewayError, GatewayMac, GatewayStats};
use beaconsim_lora::{BroadcastMedium, RadioConfig, RadioError, SimulatedRadio};
use beaconsim_metrics::{metric_defs, MetricLabels, MetricsCollector, PeriodCollector, PeriodStats};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace};

pub use config::{
    ConfigError, EndDeviceConfig, FrequencyDutyCycle, GatewayConfig, ScriptedDownlink, ScriptedUplink,
    SimulationConfig,
};

// ============================================================================
// Errors
// ============================================================================

/// Top-level runner error.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Simulation error: {0}")]
    Simulation(#[from] SimError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("Codec error: {0}")]
    Codec(#[from] BeaconError),

    #[error("Hex error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters for one statistics period, summed over every node.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodReport {
    pub start_secs: f64,
    pub end_secs: f64,
    pub throughput_bps: f64,
    #[serde(flatten)]
    pub stats: PeriodStats,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationStats {
    pub total_events: u64,
    pub simulation_time_us: u64,
    pub wall_time_ms: u64,
    pub totals: PeriodStats,
    pub mean_throughput_bps: f64,
    pub peak_throughput_bps: f64,
    pub periods: Vec<PeriodReport>,
    pub gateway: GatewayStats,
    pub end_devices: BTreeMap<String, EndDeviceStats>,
}

// ============================================================================
// Event Loop
// ============================================================================

/// Entity id of the runner itself; target of stats ticks and the end marker.
pub const RUNNER_ID: EntityId = EntityId(0);
const MEDIUM_ID: EntityId = EntityId(1);
const GATEWAY_ID: EntityId = EntityId(2);
const GATEWAY_RADIO_ID: EntityId = EntityId(3);

fn device_ids(index: usize) -> (EntityId, EntityId) {
    let base = 4 + 2 * index as u64;
    (EntityId(base), EntityId(base + 1))
}

#[derive(Debug, Clone, Copy)]
enum EntitySlot {
    Medium,
    Gateway,
    GatewayRadio,
    Device(usize),
    DeviceRadio(usize),
}

struct DeviceNode {
    name: String,
    mac: EndDeviceMac,
    radio: SimulatedRadio,
}

/// The assembled simulation.
pub struct EventLoop {
    ctx: SimContext,
    medium: BroadcastMedium,
    gateway: GatewayMac,
    gateway_radio: SimulatedRadio,
    devices: Vec<DeviceNode>,
    index: HashMap<EntityId, EntitySlot>,
    collectors: Vec<Arc<PeriodCollector>>,
    end_time: SimTime,
    stats_interval: SimTime,
    period_start: SimTime,
    periods: Vec<PeriodReport>,
    totals: PeriodStats,
    events_processed: u64,
}

impl EventLoop {
    pub fn gateway(&self) -> &GatewayMac {
        &self.gateway
    }

    pub fn end_device(&self, name: &str) -> Option<&EndDeviceMac> {
        self.devices.iter().find(|d| d.name == name).map(|d| &d.mac)
    }

    pub fn now(&self) -> SimTime {
        self.ctx.time()
    }

    /// Run from the current time until the configured end time.
    ///
    /// Events scheduled at or after the end time are not processed.
    pub fn run(&mut self) -> Result<SimulationStats, RunnerError> {
        let wall_start = Instant::now();
        self.ctx.set_source(RUNNER_ID);
        self.ctx
            .post_at(self.end_time, vec![RUNNER_ID], EventPayload::SimulationEnd);

        info!(
            end_time = %self.end_time,
            devices = self.devices.len(),
            "Starting simulation"
        );

        while let Some(event) = self.ctx.next_event() {
            if event.time >= self.end_time || matches!(event.payload, EventPayload::SimulationEnd) {
                break;
            }
            self.events_processed += 1;

            trace!(
                time = %event.time,
                event = event.payload.name(),
                source = %event.source,
                "Dispatching event"
            );

            if matches!(event.payload, EventPayload::StatsTick) {
                self.close_period(event.time);
                self.ctx.set_source(RUNNER_ID);
                self.ctx
                    .post_event(self.stats_interval, vec![RUNNER_ID], EventPayload::StatsTick);
                continue;
            }

            self.dispatch(&event)?;
        }

        if self.end_time > self.period_start {
            self.close_period(self.end_time);
        }

        let stats = self.summary(wall_start);
        info!(
            events = stats.total_events,
            beacons_sent = stats.gateway.beacons_sent,
            beacons_skipped = stats.gateway.beacons_skipped,
            mean_throughput_bps = stats.mean_throughput_bps,
            "Simulation complete"
        );
        Ok(stats)
    }

    fn dispatch(&mut self, event: &Event) -> Result<(), RunnerError> {
        for &target in &event.targets {
            let slot = *self
                .index
                .get(&target)
                .ok_or(SimError::EntityNotFound(target))?;
            self.ctx.set_source(target);
            let entity: &mut dyn Entity = match slot {
                EntitySlot::Medium => &mut self.medium,
                EntitySlot::Gateway => &mut self.gateway,
                EntitySlot::GatewayRadio => &mut self.gateway_radio,
                EntitySlot::Device(i) => &mut self.devices[i].mac,
                EntitySlot::DeviceRadio(i) => &mut self.devices[i].radio,
            };
            entity.handle_event(event, &mut self.ctx)?;
        }
        Ok(())
    }

    fn close_period(&mut self, now: SimTime) {
        let mut period = PeriodStats::default();
        for collector in &self.collectors {
            period.merge(&collector.take_period());
        }

        let elapsed = now.saturating_sub(self.period_start).as_secs_f64();
        let throughput_bps = period.throughput_bps(elapsed);
        metrics::gauge!(metric_defs::STATS_THROUGHPUT.name).set(throughput_bps);

        if period.tx_packets > 0 {
            info!(
                time = %now,
                throughput_bps,
                tx_packets = period.tx_packets,
                beacons_sent = period.beacons_sent,
                ping_slots_used = period.ping_slots_used,
                "Period statistics"
            );
        } else {
            debug!(time = %now, "Idle period");
        }

        self.totals.merge(&period);
        self.periods.push(PeriodReport {
            start_secs: self.period_start.as_secs_f64(),
            end_secs: now.as_secs_f64(),
            throughput_bps,
            stats: period,
        });
        self.period_start = now;
    }

    fn summary(&self, wall_start: Instant) -> SimulationStats {
        let peak_throughput_bps = self
            .periods
            .iter()
            .map(|p| p.throughput_bps)
            .fold(0.0, f64::max);
        SimulationStats {
            total_events: self.events_processed,
            simulation_time_us: self.end_time.as_micros(),
            wall_time_ms: wall_start.elapsed().as_millis() as u64,
            totals: self.totals,
            mean_throughput_bps: self.totals.throughput_bps(self.end_time.as_secs_f64()),
            peak_throughput_bps,
            periods: self.periods.clone(),
            gateway: self.gateway.stats(),
            end_devices: self
                .devices
                .iter()
                .map(|d| (d.name.clone(), d.mac.stats()))
                .collect(),
        }
    }
}

fn lookup(
    devices: &HashMap<&str, (EntityId, DevAddr)>,
    name: &str,
) -> Result<(EntityId, DevAddr), ConfigError> {
    devices
        .get(name)
        .copied()
        .ok_or_else(|| ConfigError::Invalid(format!("unknown device '{name}'")))
}

/// Build the entity graph for a scenario and schedule its scripted traffic.
pub fn build_simulation(config: &SimulationConfig) -> Result<EventLoop, RunnerError> {
    config.validate()?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut ctx = SimContext::new();
    let mut index = HashMap::new();
    let mut collectors = Vec::new();
    let mut medium = BroadcastMedium::new(MEDIUM_ID);
    index.insert(MEDIUM_ID, EntitySlot::Medium);

    let gw = &config.gateway;
    let gw_metrics = Arc::new(PeriodCollector::new(MetricLabels::new(gw.name.clone(), "gateway")));
    collectors.push(gw_metrics.clone());
    let mut gateway = GatewayMac::new(
        GATEWAY_ID,
        GATEWAY_RADIO_ID,
        config.gateway_mac_config()?,
        gw_metrics as Arc<dyn MetricsCollector>,
    )?;
    let gateway_radio = SimulatedRadio::new(
        GATEWAY_RADIO_ID,
        gw.name.clone(),
        GATEWAY_ID,
        MEDIUM_ID,
        RadioConfig {
            rx_loss_probability: gw.rx_loss_probability,
        },
        rng.gen(),
    )?;
    medium.attach(GATEWAY_RADIO_ID);
    index.insert(GATEWAY_ID, EntitySlot::Gateway);
    index.insert(GATEWAY_RADIO_ID, EntitySlot::GatewayRadio);

    let beacon_interval = SimTime::from_secs_f64(gw.beacon_interval_secs);
    let mut devices = Vec::with_capacity(config.end_devices.len());
    let mut device_macs = HashMap::new();
    for (i, dev) in config.end_devices.iter().enumerate() {
        let (mac_id, radio_id) = device_ids(i);
        let metrics = Arc::new(PeriodCollector::new(MetricLabels::new(dev.name.clone(), "end_device")));
        collectors.push(metrics.clone());
        let mac = EndDeviceMac::new(
            mac_id,
            radio_id,
            dev.mac_config(beacon_interval),
            metrics as Arc<dyn MetricsCollector>,
        )?;
        let radio = SimulatedRadio::new(
            radio_id,
            dev.name.clone(),
            mac_id,
            MEDIUM_ID,
            RadioConfig {
                rx_loss_probability: dev.rx_loss_probability,
            },
            rng.gen(),
        )?;
        medium.attach(radio_id);
        index.insert(mac_id, EntitySlot::Device(i));
        index.insert(radio_id, EntitySlot::DeviceRadio(i));
        device_macs.insert(dev.name.as_str(), (mac_id, dev.dev_addr));
        devices.push(DeviceNode {
            name: dev.name.clone(),
            mac,
            radio,
        });
    }

    ctx.set_source(RUNNER_ID);
    for downlink in &config.downlinks {
        let (_, dev_addr) = lookup(&device_macs, &downlink.device)?;
        let payload = downlink.payload()?;
        for time in downlink.times() {
            ctx.post_at(
                time,
                vec![GATEWAY_ID],
                EventPayload::DownlinkRequest {
                    dev_addr,
                    payload: payload.clone(),
                },
            );
        }
    }
    for uplink in &config.uplinks {
        let (mac_id, _) = lookup(&device_macs, &uplink.device)?;
        let payload = uplink.payload()?;
        for time in uplink.times() {
            ctx.post_at(
                time,
                vec![mac_id],
                EventPayload::UplinkRequest {
                    payload: payload.clone(),
                },
            );
        }
    }
    ctx.post_at(config.stats_interval(), vec![RUNNER_ID], EventPayload::StatsTick);

    ctx.set_source(GATEWAY_ID);
    gateway.start(&mut ctx);

    debug!(
        downlinks = config.downlinks.len(),
        uplinks = config.uplinks.len(),
        pending = ctx.pending_events(),
        "Simulation built"
    );

    Ok(EventLoop {
        ctx,
        medium,
        gateway,
        gateway_radio,
        devices,
        index,
        collectors,
        end_time: config.duration(),
        stats_interval: config.stats_interval(),
        period_start: SimTime::ZERO,
        periods: Vec::new(),
        totals: PeriodStats::default(),
        events_processed: 0,
    })
}

/// Build and run a scenario.
pub fn run_simulation(config: &SimulationConfig) -> Result<SimulationStats, RunnerError> {
    build_simulation(config)?.run()
}

/// Hex encoding of the on-wire beacon timestamp for `secs` of network time.
pub fn encode_timestamp_hex(secs: f64) -> Result<String, RunnerError> {
    let time = NetworkTime::from_secs_f64(secs)?;
    Ok(hex::encode(encode_timestamp(time)))
}

/// Decode a hex beacon timestamp field.
pub fn decode_timestamp_hex(text: &str) -> Result<NetworkTime, RunnerError> {
    let bytes = hex::decode(text.trim())?;
    Ok(decode_timestamp(&bytes)?)
}
