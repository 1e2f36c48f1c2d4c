//! YAML scenario configuration.
//!
//! ```yaml
//! seed: 7
//! duration_secs: 600
//! gateway:
//!   name: gw0
//!   duty_cycle: 0.01
//! end_devices:
//!   - name: meter-1
//!     dev_addr: "26011F2A"
//!     ping_nb: 8
//! downlinks:
//!   - at_secs: 10
//!     device: meter-1
//!     payload_hex: "01020304"
//!     repeat_every_secs: 60
//!     count: 5
//! ```
//!
//! Every field has a default, so an empty document is a valid scenario: one
//! gateway beaconing for an hour.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use beacon_frame::{DataRate, DevAddr, Frequency, NetworkTime, MAX_PAYLOAD_LEN};
use beaconsim_common::SimTime;
use beaconsim_gateway::ping_slot::{ping_period, DEFAULT_PING_KEY};
use beaconsim_gateway::{
    BeaconConfig, ClassBDevice, EndDeviceConfig as EndDeviceMacConfig, GatewayMacConfig,
    PingSlotConfig, BEACON_INTERVAL,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or validating a scenario.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scenario YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid scenario: {0}")]
    Invalid(String),
}

/// Shortest beacon or statistics interval accepted, in seconds.
pub const MIN_INTERVAL_SECS: f64 = 0.001;

/// Most repeats a single scripted message may ask for.
pub const MAX_SCRIPT_COUNT: u32 = 100_000;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn default_seed() -> u64 {
    12345
}

fn default_duration() -> f64 {
    3600.0
}

fn default_stats_interval() -> f64 {
    1.0
}

fn default_gateway_name() -> String {
    "gw0".to_string()
}

fn default_beacon_interval() -> f64 {
    BEACON_INTERVAL.as_secs_f64()
}

fn default_beacon_data_rate() -> DataRate {
    DataRate::Dr3
}

fn default_ping_data_rate() -> DataRate {
    DataRate::Dr8
}

fn default_class_b_frequency() -> f64 {
    923.3
}

fn default_uplink_data_rate() -> DataRate {
    DataRate::Dr0
}

fn default_uplink_frequency() -> f64 {
    902.3
}

fn default_max_queue() -> usize {
    16
}

fn default_ping_nb() -> u16 {
    8
}

fn default_count() -> u32 {
    1
}

/// Complete scenario.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_duration")]
    pub duration_secs: f64,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: f64,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub end_devices: Vec<EndDeviceConfig>,
    #[serde(default)]
    pub downlinks: Vec<ScriptedDownlink>,
    #[serde(default)]
    pub uplinks: Vec<ScriptedUplink>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            duration_secs: default_duration(),
            stats_interval_secs: default_stats_interval(),
            gateway: GatewayConfig::default(),
            end_devices: Vec::new(),
            downlinks: Vec::new(),
            uplinks: Vec::new(),
        }
    }
}

/// Gateway section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_name")]
    pub name: String,
    #[serde(default = "default_beacon_interval")]
    pub beacon_interval_secs: f64,
    #[serde(default = "default_beacon_data_rate")]
    pub beacon_data_rate: DataRate,
    #[serde(default = "default_class_b_frequency")]
    pub beacon_frequency_mhz: f64,
    #[serde(default)]
    pub first_beacon_at_secs: f64,
    /// Network time at the start of the run.
    #[serde(default)]
    pub initial_network_time_secs: f64,
    #[serde(default = "default_ping_data_rate")]
    pub ping_slot_data_rate: DataRate,
    #[serde(default = "default_class_b_frequency")]
    pub ping_slot_frequency_mhz: f64,
    #[serde(default = "default_max_queue")]
    pub max_queue_per_device: usize,
    /// Duty cycle in `(0, 1]` applied to every frequency. Absent disables
    /// duty-cycle accounting.
    #[serde(default)]
    pub duty_cycle: Option<f64>,
    /// Limits for individual frequencies, replacing `duty_cycle` there.
    #[serde(default)]
    pub duty_cycle_overrides: Vec<FrequencyDutyCycle>,
    #[serde(default)]
    pub rx_loss_probability: f64,
}

/// Duty-cycle limit for one frequency.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct FrequencyDutyCycle {
    pub frequency_mhz: f64,
    pub duty_cycle: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: default_gateway_name(),
            beacon_interval_secs: default_beacon_interval(),
            beacon_data_rate: default_beacon_data_rate(),
            beacon_frequency_mhz: default_class_b_frequency(),
            first_beacon_at_secs: 0.0,
            initial_network_time_secs: 0.0,
            ping_slot_data_rate: default_ping_data_rate(),
            ping_slot_frequency_mhz: default_class_b_frequency(),
            max_queue_per_device: default_max_queue(),
            duty_cycle: None,
            duty_cycle_overrides: Vec::new(),
            rx_loss_probability: 0.0,
        }
    }
}

/// One Class B end device.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndDeviceConfig {
    pub name: String,
    pub dev_addr: DevAddr,
    #[serde(default = "default_ping_nb")]
    pub ping_nb: u16,
    #[serde(default = "default_uplink_data_rate")]
    pub uplink_data_rate: DataRate,
    #[serde(default = "default_uplink_frequency")]
    pub uplink_frequency_mhz: f64,
    #[serde(default)]
    pub duty_cycle: Option<f64>,
    #[serde(default)]
    pub rx_loss_probability: f64,
}

/// Downlinks the backend hands to the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScriptedDownlink {
    pub at_secs: f64,
    /// Target device name.
    pub device: String,
    #[serde(default)]
    pub payload_hex: String,
    #[serde(default)]
    pub repeat_every_secs: Option<f64>,
    #[serde(default = "default_count")]
    pub count: u32,
}

/// Uplinks a device application asks its MAC to send.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScriptedUplink {
    pub at_secs: f64,
    /// Sending device name.
    pub device: String,
    #[serde(default)]
    pub payload_hex: String,
    #[serde(default)]
    pub repeat_every_secs: Option<f64>,
    #[serde(default = "default_count")]
    pub count: u32,
}

/// Times at which a scripted message repeats.
fn schedule(at_secs: f64, repeat_every_secs: Option<f64>, count: u32) -> Vec<SimTime> {
    let every = repeat_every_secs.unwrap_or(0.0);
    (0..count)
        .map(|k| SimTime::from_secs_f64(at_secs + every * k as f64))
        .collect()
}

fn check_script(
    kind: &str,
    at_secs: f64,
    device: &str,
    payload_hex: &str,
    repeat_every_secs: Option<f64>,
    count: u32,
    names: &HashSet<&str>,
) -> Result<(), ConfigError> {
    if !at_secs.is_finite() || at_secs < 0.0 {
        return Err(invalid(format!("{kind} for {device}: at_secs must be >= 0")));
    }
    if !names.contains(device) {
        return Err(invalid(format!("{kind} references unknown device '{device}'")));
    }
    let Ok(payload) = hex::decode(payload_hex) else {
        return Err(invalid(format!("{kind} for {device}: payload_hex is not valid hex")));
    };
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(invalid(format!(
            "{kind} for {device}: payload is {} bytes, LoRa allows at most {MAX_PAYLOAD_LEN}",
            payload.len()
        )));
    }
    if count == 0 || count > MAX_SCRIPT_COUNT {
        return Err(invalid(format!(
            "{kind} for {device}: count must be between 1 and {MAX_SCRIPT_COUNT}"
        )));
    }
    if let Some(every) = repeat_every_secs {
        if !(every.is_finite() && every > 0.0) {
            return Err(invalid(format!("{kind} for {device}: repeat_every_secs must be > 0")));
        }
    }
    Ok(())
}

fn check_interval(field: &str, secs: f64) -> Result<(), ConfigError> {
    if secs.is_finite() && secs >= MIN_INTERVAL_SECS {
        Ok(())
    } else {
        Err(invalid(format!("{field} must be at least {MIN_INTERVAL_SECS} s, got {secs}")))
    }
}

fn check_duty_cycle(owner: &str, duty_cycle: Option<f64>) -> Result<(), ConfigError> {
    match duty_cycle {
        Some(d) if !(d > 0.0 && d <= 1.0) => Err(invalid(format!("{owner}: duty_cycle must be in (0, 1], got {d}"))),
        _ => Ok(()),
    }
}

fn check_loss(owner: &str, p: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(invalid(format!("{owner}: rx_loss_probability must be in [0, 1], got {p}")))
    }
}

impl SimulationConfig {
    /// Load and validate a scenario file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate a scenario document.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null.
        let config: SimulationConfig = if text.trim().is_empty() {
            SimulationConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.duration_secs.is_finite() && self.duration_secs > 0.0) {
            return Err(invalid("duration_secs must be > 0"));
        }
        check_interval("stats_interval_secs", self.stats_interval_secs)?;

        let gw = &self.gateway;
        check_interval("gateway: beacon_interval_secs", gw.beacon_interval_secs)?;
        if !(gw.first_beacon_at_secs.is_finite() && gw.first_beacon_at_secs >= 0.0) {
            return Err(invalid("gateway: first_beacon_at_secs must be >= 0"));
        }
        NetworkTime::from_secs_f64(gw.initial_network_time_secs)
            .map_err(|e| invalid(format!("gateway: initial_network_time_secs: {e}")))?;
        if gw.max_queue_per_device == 0 {
            return Err(invalid("gateway: max_queue_per_device must be at least 1"));
        }
        check_duty_cycle(&gw.name, gw.duty_cycle)?;
        for o in &gw.duty_cycle_overrides {
            if !(o.frequency_mhz.is_finite() && o.frequency_mhz > 0.0) {
                return Err(invalid(format!("{}: invalid override frequency {}", gw.name, o.frequency_mhz)));
            }
            check_duty_cycle(&format!("{} @ {} MHz", gw.name, o.frequency_mhz), Some(o.duty_cycle))?;
        }
        check_loss(&gw.name, gw.rx_loss_probability)?;

        let mut names = HashSet::new();
        let mut addrs = HashSet::new();
        names.insert(gw.name.as_str());
        for dev in &self.end_devices {
            if !names.insert(dev.name.as_str()) {
                return Err(invalid(format!("duplicate node name '{}'", dev.name)));
            }
            if !addrs.insert(dev.dev_addr) {
                return Err(invalid(format!("duplicate dev_addr {}", dev.dev_addr)));
            }
            ping_period(dev.ping_nb).map_err(|e| invalid(format!("{}: {e}", dev.name)))?;
            check_duty_cycle(&dev.name, dev.duty_cycle)?;
            check_loss(&dev.name, dev.rx_loss_probability)?;
        }

        let devices: HashSet<&str> = self.end_devices.iter().map(|d| d.name.as_str()).collect();
        for d in &self.downlinks {
            check_script("downlink", d.at_secs, &d.device, &d.payload_hex, d.repeat_every_secs, d.count, &devices)?;
        }
        for u in &self.uplinks {
            check_script("uplink", u.at_secs, &u.device, &u.payload_hex, u.repeat_every_secs, u.count, &devices)?;
        }
        Ok(())
    }

    pub fn duration(&self) -> SimTime {
        SimTime::from_secs_f64(self.duration_secs)
    }

    pub fn stats_interval(&self) -> SimTime {
        SimTime::from_secs_f64(self.stats_interval_secs)
    }

    pub fn end_device(&self, name: &str) -> Option<&EndDeviceConfig> {
        self.end_devices.iter().find(|d| d.name == name)
    }

    /// Gateway MAC parameters.
    pub fn gateway_mac_config(&self) -> Result<GatewayMacConfig, ConfigError> {
        let gw = &self.gateway;
        let initial_network_time = NetworkTime::from_secs_f64(gw.initial_network_time_secs)
            .map_err(|e| invalid(e.to_string()))?;
        Ok(GatewayMacConfig {
            name: gw.name.clone(),
            beacon: BeaconConfig {
                interval: SimTime::from_secs_f64(gw.beacon_interval_secs),
                data_rate: gw.beacon_data_rate,
                frequency: Frequency::from_mhz(gw.beacon_frequency_mhz),
                first_beacon_at: SimTime::from_secs_f64(gw.first_beacon_at_secs),
                initial_network_time,
            },
            ping_slots: PingSlotConfig {
                frequency: Frequency::from_mhz(gw.ping_slot_frequency_mhz),
                data_rate: gw.ping_slot_data_rate,
                max_queue_per_device: gw.max_queue_per_device,
                key: DEFAULT_PING_KEY,
            },
            duty_cycle: gw.duty_cycle,
            frequency_duty_cycles: gw
                .duty_cycle_overrides
                .iter()
                .map(|o| (Frequency::from_mhz(o.frequency_mhz), o.duty_cycle))
                .collect(),
            devices: self
                .end_devices
                .iter()
                .map(|d| ClassBDevice {
                    dev_addr: d.dev_addr,
                    ping_nb: d.ping_nb,
                })
                .collect(),
        })
    }
}

impl EndDeviceConfig {
    /// End-device MAC parameters.
    pub fn mac_config(&self, beacon_interval: SimTime) -> EndDeviceMacConfig {
        EndDeviceMacConfig {
            name: self.name.clone(),
            dev_addr: self.dev_addr,
            data_rate: self.uplink_data_rate,
            frequency: Frequency::from_mhz(self.uplink_frequency_mhz),
            duty_cycle: self.duty_cycle,
            beacon_interval,
        }
    }
}

impl ScriptedDownlink {
    pub fn times(&self) -> Vec<SimTime> {
        schedule(self.at_secs, self.repeat_every_secs, self.count)
    }

    pub fn payload(&self) -> Result<Vec<u8>, ConfigError> {
        hex::decode(&self.payload_hex).map_err(|e| invalid(format!("downlink payload: {e}")))
    }
}

impl ScriptedUplink {
    pub fn times(&self) -> Vec<SimTime> {
        schedule(self.at_secs, self.repeat_every_secs, self.count)
    }

    pub fn payload(&self) -> Result<Vec<u8>, ConfigError> {
        hex::decode(&self.payload_hex).map_err(|e| invalid(format!("uplink payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
seed: 7
duration_secs: 600
gateway:
  name: gw0
  duty_cycle: 0.01
end_devices:
  - name: meter-1
    dev_addr: "26011F2A"
    ping_nb: 16
downlinks:
  - at_secs: 10
    device: meter-1
    payload_hex: "01020304"
    repeat_every_secs: 60
    count: 3
"#;

    #[test]
    fn test_parse_scenario() {
        let config = SimulationConfig::from_yaml_str(SCENARIO).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.duration(), SimTime::from_secs(600));
        assert_eq!(config.stats_interval(), SimTime::from_secs(1));
        assert_eq!(config.gateway.duty_cycle, Some(0.01));
        assert_eq!(config.gateway.beacon_data_rate, DataRate::Dr3);
        assert_eq!(config.end_devices[0].dev_addr, DevAddr::new(0x2601_1F2A));
        assert_eq!(config.end_devices[0].uplink_data_rate, DataRate::Dr0);

        let times = config.downlinks[0].times();
        assert_eq!(
            times,
            vec![SimTime::from_secs(10), SimTime::from_secs(70), SimTime::from_secs(130)]
        );
        assert_eq!(config.downlinks[0].payload().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SimulationConfig::from_yaml_str("").unwrap();
        assert_eq!(config.gateway.name, "gw0");
        assert_eq!(config.duration_secs, 3600.0);
        let mac = config.gateway_mac_config().unwrap();
        assert_eq!(mac.beacon.interval, BEACON_INTERVAL);
        assert_eq!(mac.beacon.frequency, Frequency::from_mhz(923.3));
    }

    #[test]
    fn test_gateway_mac_config_registers_devices() {
        let config = SimulationConfig::from_yaml_str(SCENARIO).unwrap();
        let mac = config.gateway_mac_config().unwrap();
        assert_eq!(mac.devices.len(), 1);
        assert_eq!(mac.devices[0].ping_nb, 16);
        assert_eq!(mac.duty_cycle, Some(0.01));
        assert!(mac.frequency_duty_cycles.is_empty());
    }

    #[test]
    fn test_duty_cycle_overrides() {
        let yaml = "gateway:\n  duty_cycle: 0.01\n  duty_cycle_overrides:\n    - { frequency_mhz: 869.525, duty_cycle: 0.1 }\n";
        let config = SimulationConfig::from_yaml_str(yaml).unwrap();
        let mac = config.gateway_mac_config().unwrap();
        assert_eq!(mac.frequency_duty_cycles, vec![(Frequency::from_mhz(869.525), 0.1)]);
    }

    fn rejects(yaml: &str) {
        let result = SimulationConfig::from_yaml_str(yaml);
        assert!(matches!(result, Err(ConfigError::Invalid(_))), "accepted: {yaml}");
    }

    #[test]
    fn test_validation() {
        rejects("duration_secs: 0");
        rejects("stats_interval_secs: -1");
        rejects("gateway: { beacon_interval_secs: 0 }");
        rejects("gateway: { beacon_interval_secs: 0.0000001 }");
        rejects("stats_interval_secs: 0.0000001");
        rejects("gateway: { duty_cycle: 1.5 }");
        rejects("gateway: { duty_cycle_overrides: [{ frequency_mhz: 869.525, duty_cycle: 0 }] }");
        rejects("gateway: { duty_cycle_overrides: [{ frequency_mhz: -1, duty_cycle: 0.1 }] }");
        rejects("gateway: { rx_loss_probability: 2 }");
        rejects("gateway: { initial_network_time_secs: -3 }");
        rejects("end_devices: [{ name: a, dev_addr: '00000001', ping_nb: 3 }]");
        rejects(
            "end_devices: [{ name: a, dev_addr: '00000001' }, { name: b, dev_addr: '00000001' }]",
        );
        rejects("end_devices: [{ name: gw0, dev_addr: '00000001' }]");
        rejects("downlinks: [{ at_secs: 1, device: nobody }]");
        rejects(
            "end_devices: [{ name: a, dev_addr: '00000001' }]\ndownlinks: [{ at_secs: 1, device: a, payload_hex: 'zz' }]",
        );
        rejects(
            "end_devices: [{ name: a, dev_addr: '00000001' }]\nuplinks: [{ at_secs: 1, device: a, count: 0 }]",
        );
    }

    #[test]
    fn test_script_limits() {
        let device = "end_devices: [{ name: a, dev_addr: '00000001' }]\n";
        let at_limit = "ab".repeat(MAX_PAYLOAD_LEN);
        let over_limit = "ab".repeat(MAX_PAYLOAD_LEN + 1);

        let ok = format!("{device}downlinks: [{{ at_secs: 1, device: a, payload_hex: '{at_limit}' }}]");
        assert!(SimulationConfig::from_yaml_str(&ok).is_ok());
        rejects(&format!("{device}downlinks: [{{ at_secs: 1, device: a, payload_hex: '{over_limit}' }}]"));
        rejects(&format!("{device}uplinks: [{{ at_secs: 1, device: a, payload_hex: '{over_limit}' }}]"));

        rejects(&format!("{device}downlinks: [{{ at_secs: 1, device: a, count: 4000000000 }}]"));
        let max = format!("{device}uplinks: [{{ at_secs: 1, device: a, repeat_every_secs: 1, count: {MAX_SCRIPT_COUNT} }}]");
        assert!(SimulationConfig::from_yaml_str(&max).is_ok());
    }

    #[test]
    fn test_shortest_intervals_accepted() {
        let config = SimulationConfig::from_yaml_str(
            "stats_interval_secs: 0.001\ngateway: { beacon_interval_secs: 0.001 }",
        )
        .unwrap();
        assert_eq!(config.stats_interval(), SimTime::from_millis(1));
        assert_eq!(config.gateway_mac_config().unwrap().beacon.interval, SimTime::from_millis(1));
    }

    #[test]
    fn test_bad_yaml() {
        assert!(matches!(
            SimulationConfig::from_yaml_str("end_devices: [{ name: a, dev_addr: 'xyz' }]"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = SimulationConfig::load(Path::new("/nonexistent/scenario.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
