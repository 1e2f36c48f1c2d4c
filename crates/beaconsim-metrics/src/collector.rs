//! Per-component statistics collection.
//!
//! A [`MetricsCollector`] is injected into each MAC component. The
//! [`PeriodCollector`] keeps atomic counters for the current statistics
//! period and forwards every sample to the `metrics` facade, so an installed
//! recorder sees the same numbers the period report does.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::{metric_defs, MetricLabels};

/// A single observation reported by a simulator component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    /// A frame left the radio.
    TxPacket {
        kind: &'static str,
        bits: u64,
        airtime_us: u64,
    },
    /// A frame was delivered to the MAC.
    RxPacket { kind: &'static str },
    /// A frame could not be received.
    RxFailed { reason: &'static str },
    BeaconSent,
    BeaconSkipped { reason: &'static str },
    PingSlotUsed,
    PingSlotMissed,
    DownlinkDropped,
    /// Current number of downlinks waiting for a ping slot.
    QueueDepth(usize),
}

/// Counters accumulated over one statistics period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeriodStats {
    pub tx_packets: u64,
    pub tx_bits: u64,
    pub tx_airtime_us: u64,
    pub rx_packets: u64,
    pub rx_failed: u64,
    pub beacons_sent: u64,
    pub beacons_skipped: u64,
    pub ping_slots_used: u64,
    pub ping_slots_missed: u64,
    pub downlinks_dropped: u64,
}

impl PeriodStats {
    /// Adds another period's counters into this one.
    pub fn merge(&mut self, other: &PeriodStats) {
        self.tx_packets += other.tx_packets;
        self.tx_bits += other.tx_bits;
        self.tx_airtime_us += other.tx_airtime_us;
        self.rx_packets += other.rx_packets;
        self.rx_failed += other.rx_failed;
        self.beacons_sent += other.beacons_sent;
        self.beacons_skipped += other.beacons_skipped;
        self.ping_slots_used += other.ping_slots_used;
        self.ping_slots_missed += other.ping_slots_missed;
        self.downlinks_dropped += other.downlinks_dropped;
    }

    /// Transmit throughput in bits per second over a period of `period_secs`.
    pub fn throughput_bps(&self, period_secs: f64) -> f64 {
        if period_secs <= 0.0 {
            return 0.0;
        }
        self.tx_bits as f64 / period_secs
    }
}

/// Sink for statistics samples.
///
/// Implementations must be shareable so one collector can be handed to
/// several components of the same node.
pub trait MetricsCollector: Send + Sync {
    /// Records one sample.
    fn record(&self, sample: Sample);

    /// Returns the current period's counters and resets them to zero.
    fn take_period(&self) -> PeriodStats;
}

#[derive(Debug, Default)]
struct Counters {
    tx_packets: AtomicU64,
    tx_bits: AtomicU64,
    tx_airtime_us: AtomicU64,
    rx_packets: AtomicU64,
    rx_failed: AtomicU64,
    beacons_sent: AtomicU64,
    beacons_skipped: AtomicU64,
    ping_slots_used: AtomicU64,
    ping_slots_missed: AtomicU64,
    downlinks_dropped: AtomicU64,
}

/// Collector with resettable period counters and `metrics` forwarding.
#[derive(Debug)]
pub struct PeriodCollector {
    labels: MetricLabels,
    counters: Counters,
}

impl PeriodCollector {
    pub fn new(labels: MetricLabels) -> Self {
        Self {
            labels,
            counters: Counters::default(),
        }
    }

    pub fn labels(&self) -> &MetricLabels {
        &self.labels
    }

    /// Returns the current period's counters without resetting them.
    pub fn peek_period(&self) -> PeriodStats {
        let c = &self.counters;
        PeriodStats {
            tx_packets: c.tx_packets.load(Ordering::Relaxed),
            tx_bits: c.tx_bits.load(Ordering::Relaxed),
            tx_airtime_us: c.tx_airtime_us.load(Ordering::Relaxed),
            rx_packets: c.rx_packets.load(Ordering::Relaxed),
            rx_failed: c.rx_failed.load(Ordering::Relaxed),
            beacons_sent: c.beacons_sent.load(Ordering::Relaxed),
            beacons_skipped: c.beacons_skipped.load(Ordering::Relaxed),
            ping_slots_used: c.ping_slots_used.load(Ordering::Relaxed),
            ping_slots_missed: c.ping_slots_missed.load(Ordering::Relaxed),
            downlinks_dropped: c.downlinks_dropped.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

impl MetricsCollector for PeriodCollector {
    fn record(&self, sample: Sample) {
        let c = &self.counters;
        match sample {
            Sample::TxPacket {
                kind,
                bits,
                airtime_us,
            } => {
                Self::bump(&c.tx_packets, 1);
                Self::bump(&c.tx_bits, bits);
                Self::bump(&c.tx_airtime_us, airtime_us);
                let labels = self.labels.with("frame_kind", kind);
                metrics::counter!(metric_defs::RADIO_TX_PACKETS.name, &labels).increment(1);
                metrics::counter!(metric_defs::RADIO_TX_BITS.name, &labels).increment(bits);
                metrics::counter!(metric_defs::RADIO_TX_AIRTIME.name, &labels)
                    .increment(airtime_us);
            }
            Sample::RxPacket { kind } => {
                Self::bump(&c.rx_packets, 1);
                let labels = self.labels.with("frame_kind", kind);
                metrics::counter!(metric_defs::RADIO_RX_PACKETS.name, &labels).increment(1);
            }
            Sample::RxFailed { reason } => {
                Self::bump(&c.rx_failed, 1);
                let labels = self.labels.with("reason", reason);
                metrics::counter!(metric_defs::RADIO_RX_FAILED.name, &labels).increment(1);
            }
            Sample::BeaconSent => {
                Self::bump(&c.beacons_sent, 1);
                let labels = self.labels.to_labels();
                metrics::counter!(metric_defs::BEACON_SENT.name, &labels).increment(1);
            }
            Sample::BeaconSkipped { reason } => {
                Self::bump(&c.beacons_skipped, 1);
                let labels = self.labels.with("reason", reason);
                metrics::counter!(metric_defs::BEACON_SKIPPED.name, &labels).increment(1);
            }
            Sample::PingSlotUsed => {
                Self::bump(&c.ping_slots_used, 1);
                let labels = self.labels.to_labels();
                metrics::counter!(metric_defs::PING_SLOT_USED.name, &labels).increment(1);
            }
            Sample::PingSlotMissed => {
                Self::bump(&c.ping_slots_missed, 1);
                let labels = self.labels.to_labels();
                metrics::counter!(metric_defs::PING_SLOT_MISSED.name, &labels).increment(1);
            }
            Sample::DownlinkDropped => {
                Self::bump(&c.downlinks_dropped, 1);
                let labels = self.labels.to_labels();
                metrics::counter!(metric_defs::DOWNLINK_DROPPED.name, &labels).increment(1);
            }
            Sample::QueueDepth(depth) => {
                let labels = self.labels.to_labels();
                metrics::gauge!(metric_defs::DOWNLINK_QUEUE_DEPTH.name, &labels).set(depth as f64);
            }
        }
    }

    fn take_period(&self) -> PeriodStats {
        let c = &self.counters;
        PeriodStats {
            tx_packets: c.tx_packets.swap(0, Ordering::Relaxed),
            tx_bits: c.tx_bits.swap(0, Ordering::Relaxed),
            tx_airtime_us: c.tx_airtime_us.swap(0, Ordering::Relaxed),
            rx_packets: c.rx_packets.swap(0, Ordering::Relaxed),
            rx_failed: c.rx_failed.swap(0, Ordering::Relaxed),
            beacons_sent: c.beacons_sent.swap(0, Ordering::Relaxed),
            beacons_skipped: c.beacons_skipped.swap(0, Ordering::Relaxed),
            ping_slots_used: c.ping_slots_used.swap(0, Ordering::Relaxed),
            ping_slots_missed: c.ping_slots_missed.swap(0, Ordering::Relaxed),
            downlinks_dropped: c.downlinks_dropped.swap(0, Ordering::Relaxed),
        }
    }
}
