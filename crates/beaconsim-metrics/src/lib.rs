//! Metrics infrastructure for the Class B beacon simulator.
//!
//! This crate declares every metric used by the simulator as a structured
//! [`Metric`] constant, and provides the [`MetricsCollector`] interface that
//! MAC components are handed at construction. Nothing in the simulator keeps
//! process-wide counters: each collector owns its period counters and is
//! reset explicitly at period boundaries with
//! [`MetricsCollector::take_period`].
//!
//! # Example
//!
//! ```rust
//! use beaconsim_metrics::{MetricLabels, MetricsCollector, PeriodCollector, Sample};
//!
//! let collector = PeriodCollector::new(MetricLabels::new("gw0", "gateway"));
//! collector.record(Sample::BeaconSent);
//! collector.record(Sample::TxPacket { kind: "beacon", bits: 64, airtime_us: 41_216 });
//!
//! let period = collector.take_period();
//! assert_eq!(period.beacons_sent, 1);
//! assert_eq!(period.tx_bits, 64);
//! assert_eq!(collector.take_period().beacons_sent, 0);
//! ```

mod collector;

pub use collector::{MetricsCollector, PeriodCollector, PeriodStats, Sample};
pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// Use the const constructors to declare metrics at compile time.
///
/// ```rust
/// use beaconsim_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const BEACONS: Metric = Metric::counter("beaconsim.beacon.sent")
///     .with_description("Beacons transmitted")
///     .with_unit(Unit::Count)
///     .with_labels(&["node"]);
///
/// assert_eq!(BEACONS.name, "beaconsim.beacon.sent");
/// assert_eq!(BEACONS.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "beaconsim.radio.tx_packets").
    pub name: &'static str,
    /// The kind of metric (counter, gauge, histogram).
    pub kind: MetricKind,
    /// Human-readable description of the metric.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Expected label keys for this metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the simulator.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Standard labels present on all node-scoped metrics.
    pub const STANDARD_LABELS: &[&str] = &["node", "node_type"];

    // ========================================================================
    // Radio Metrics
    // ========================================================================

    /// Total frames transmitted.
    ///
    /// Labels: node, node_type, frame_kind
    pub const RADIO_TX_PACKETS: Metric = Metric::counter("beaconsim.radio.tx_packets")
        .with_description("Total frames transmitted")
        .with_unit(Unit::Count)
        .with_labels(&["node", "node_type", "frame_kind"]);

    /// Total payload bits transmitted.
    pub const RADIO_TX_BITS: Metric = Metric::counter("beaconsim.radio.tx_bits")
        .with_description("Total payload bits transmitted")
        .with_unit(Unit::Count)
        .with_labels(&["node", "node_type", "frame_kind"]);

    /// Total transmit airtime in microseconds.
    pub const RADIO_TX_AIRTIME: Metric = Metric::counter("beaconsim.radio.tx_airtime_us")
        .with_description("Total transmit airtime in microseconds")
        .with_unit(Unit::Microseconds)
        .with_labels(&["node", "node_type", "frame_kind"]);

    /// Frames successfully received.
    pub const RADIO_RX_PACKETS: Metric = Metric::counter("beaconsim.radio.rx_packets")
        .with_description("Frames successfully received")
        .with_unit(Unit::Count)
        .with_labels(&["node", "node_type", "frame_kind"]);

    /// Frames that could not be received.
    ///
    /// Labels: node, node_type, reason (half_duplex, lost)
    pub const RADIO_RX_FAILED: Metric = Metric::counter("beaconsim.radio.rx_failed")
        .with_description("Frames that could not be received")
        .with_unit(Unit::Count)
        .with_labels(&["node", "node_type", "reason"]);

    // ========================================================================
    // Class B Metrics
    // ========================================================================

    /// Beacons transmitted.
    pub const BEACON_SENT: Metric = Metric::counter("beaconsim.beacon.sent")
        .with_description("Beacons transmitted")
        .with_unit(Unit::Count)
        .with_labels(&["node", "node_type"]);

    /// Beacon ticks where no beacon was transmitted.
    ///
    /// Labels: node, node_type, reason (radio_busy, not_monotonic)
    pub const BEACON_SKIPPED: Metric = Metric::counter("beaconsim.beacon.skipped")
        .with_description("Beacon ticks where no beacon was transmitted")
        .with_unit(Unit::Count)
        .with_labels(&["node", "node_type", "reason"]);

    /// Ping slots used for a downlink.
    pub const PING_SLOT_USED: Metric = Metric::counter("beaconsim.ping_slot.used")
        .with_description("Ping slots used for a downlink")
        .with_unit(Unit::Count)
        .with_labels(&["node", "node_type"]);

    /// Ping slots lost because the radio was busy.
    pub const PING_SLOT_MISSED: Metric = Metric::counter("beaconsim.ping_slot.missed")
        .with_description("Ping slots lost because the radio was busy")
        .with_unit(Unit::Count)
        .with_labels(&["node", "node_type"]);

    /// Downlinks rejected because the device queue was full.
    pub const DOWNLINK_DROPPED: Metric = Metric::counter("beaconsim.downlink.dropped")
        .with_description("Downlinks rejected because the device queue was full")
        .with_unit(Unit::Count)
        .with_labels(&["node", "node_type"]);

    /// Downlinks waiting for a ping slot.
    pub const DOWNLINK_QUEUE_DEPTH: Metric = Metric::gauge("beaconsim.downlink.queue_depth")
        .with_description("Downlinks waiting for a ping slot")
        .with_unit(Unit::Count)
        .with_labels(&["node", "node_type"]);

    // ========================================================================
    // Simulation Metrics
    // ========================================================================

    /// Transmit throughput over the last statistics period.
    pub const STATS_THROUGHPUT: Metric = Metric::gauge("beaconsim.stats.throughput_bps")
        .with_description("Transmit throughput over the last statistics period")
        .with_unit(Unit::BitsPerSecond);

    /// Returns a slice of all defined metrics.
    pub const ALL: &[&Metric] = &[
        &RADIO_TX_PACKETS,
        &RADIO_TX_BITS,
        &RADIO_TX_AIRTIME,
        &RADIO_RX_PACKETS,
        &RADIO_RX_FAILED,
        &BEACON_SENT,
        &BEACON_SKIPPED,
        &PING_SLOT_USED,
        &PING_SLOT_MISSED,
        &DOWNLINK_DROPPED,
        &DOWNLINK_QUEUE_DEPTH,
        &STATS_THROUGHPUT,
    ];
}

/// Metric labels identifying the node a metric belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLabels {
    /// Individual node identifier.
    pub node: String,
    /// Type of node (gateway, end_device).
    pub node_type: String,
}

impl MetricLabels {
    /// Creates a new `MetricLabels` instance with the given node and node type.
    pub fn new(node: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            node_type: node_type.into(),
        }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> [(&'static str, String); 2] {
        [
            ("node", self.node.clone()),
            ("node_type", self.node_type.clone()),
        ]
    }

    /// Returns the standard labels plus one extra key-value pair.
    pub fn with(&self, key: &'static str, value: impl Into<String>) -> [(&'static str, String); 3] {
        [
            ("node", self.node.clone()),
            ("node_type", self.node_type.clone()),
            (key, value.into()),
        ]
    }
}

/// Describes all metrics used in the simulator.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
