//! Scenario tests for the beacon simulator.
//!
//! Each test builds a complete gateway + end-device world from YAML and
//! checks the counters reported at the end of the run.

use std::path::Path;

use beacon_frame::NetworkTime;
use beaconsim_gateway::BeaconStatus;
use beaconsim_runner::{
    build_simulation, run_simulation, RunnerError, SimulationConfig, SimulationStats,
};

fn run_yaml(yaml: &str) -> SimulationStats {
    let config = SimulationConfig::from_yaml_str(yaml).expect("Failed to parse scenario");
    run_simulation(&config).expect("Simulation failed")
}

// ============================================================================
// Beacons
// ============================================================================

const ONE_DEVICE: &str = r#"
duration_secs: 700
stats_interval_secs: 10
end_devices:
  - name: dev0
    dev_addr: "26010001"
"#;

#[test]
fn test_beacons_every_interval() {
    let stats = run_yaml(ONE_DEVICE);

    // 0, 128, 256, 384, 512, 640
    assert_eq!(stats.gateway.beacons_sent, 6);
    assert_eq!(stats.gateway.beacons_skipped, 0);
    assert_eq!(stats.totals.beacons_sent, 6);

    let dev = &stats.end_devices["dev0"];
    assert_eq!(dev.beacon_status, BeaconStatus::Acquired);
    assert_eq!(dev.beacons_received, 6);
    assert_eq!(dev.beacons_missed, 0);
    assert_eq!(dev.last_beacon_time, Some(640.0));
}

#[test]
fn test_beacon_carries_network_time_offset() {
    let yaml = r#"
duration_secs: 130
gateway:
  initial_network_time_secs: 1000
end_devices:
  - name: dev0
    dev_addr: "26010001"
"#;
    let config = SimulationConfig::from_yaml_str(yaml).unwrap();
    let mut sim = build_simulation(&config).unwrap();
    sim.run().unwrap();

    let dev = sim.end_device("dev0").expect("device exists");
    assert_eq!(dev.last_beacon(), Some(NetworkTime::from_secs(1128).unwrap()));
}

#[test]
fn test_lossy_link_never_acquires() {
    let yaml = r#"
duration_secs: 600
end_devices:
  - name: deaf
    dev_addr: "26010001"
    rx_loss_probability: 1.0
"#;
    let stats = run_yaml(yaml);
    let dev = &stats.end_devices["deaf"];

    assert_eq!(stats.gateway.beacons_sent, 5);
    assert_eq!(dev.beacon_status, BeaconStatus::Searching);
    assert_eq!(dev.beacons_received, 0);
    assert_eq!(dev.rx_failed, 5);
}

// ============================================================================
// Ping slots
// ============================================================================

#[test]
fn test_downlinks_delivered_in_ping_slots() {
    let yaml = r#"
duration_secs: 600
end_devices:
  - name: dev0
    dev_addr: "26010001"
    ping_nb: 8
downlinks:
  - at_secs: 10
    device: dev0
    payload_hex: "01020304"
    repeat_every_secs: 20
    count: 3
"#;
    let stats = run_yaml(yaml);

    assert_eq!(stats.gateway.downlinks_queued, 3);
    assert_eq!(stats.gateway.ping_slots_used, 3);
    assert_eq!(stats.gateway.ping_slots_missed, 0);
    assert_eq!(stats.gateway.downlinks_pending, 0);
    assert_eq!(stats.end_devices["dev0"].downlinks_received, 3);
}

#[test]
fn test_full_queue_drops_downlinks() {
    let yaml = r#"
duration_secs: 60
gateway:
  max_queue_per_device: 1
end_devices:
  - name: dev0
    dev_addr: "26010001"
downlinks:
  - at_secs: 5.01
    device: dev0
    repeat_every_secs: 0.000001
    count: 3
"#;
    let stats = run_yaml(yaml);

    assert_eq!(stats.gateway.downlinks_queued, 1);
    assert_eq!(stats.gateway.downlinks_dropped, 2);
    assert_eq!(stats.totals.downlinks_dropped, 2);
}

#[test]
fn test_duty_cycle_blocks_back_to_back_slots() {
    // A 50 byte DR8 frame takes about 0.53 s on air, so a 1% duty cycle
    // blocks the channel far longer than the 15.36 s slot spacing.
    let payload = "ab".repeat(50);
    let yaml = format!(
        r#"
duration_secs: 120
gateway:
  duty_cycle: 0.01
end_devices:
  - name: dev0
    dev_addr: "26010001"
    ping_nb: 8
downlinks:
  - at_secs: 5
    device: dev0
    payload_hex: "{payload}"
    repeat_every_secs: 0.5
    count: 2
"#
    );
    let stats = run_yaml(&yaml);

    assert!(stats.gateway.ping_slots_used >= 1);
    assert!(stats.gateway.ping_slots_missed >= 1);
    assert_eq!(
        stats.gateway.ping_slots_used as usize + stats.gateway.downlinks_pending,
        2
    );
}

// ============================================================================
// Uplinks
// ============================================================================

#[test]
fn test_uplinks_reach_gateway() {
    let yaml = r#"
duration_secs: 200
end_devices:
  - name: dev0
    dev_addr: "26010001"
uplinks:
  - at_secs: 5
    device: dev0
    payload_hex: "00112233445566778899"
    repeat_every_secs: 60
    count: 3
"#;
    let stats = run_yaml(yaml);

    assert_eq!(stats.end_devices["dev0"].uplinks_sent, 3);
    assert_eq!(stats.gateway.uplinks_received, 3);
}

// ============================================================================
// Runs
// ============================================================================

#[test]
fn test_same_seed_same_result() {
    let yaml = r#"
seed: 99
duration_secs: 1200
end_devices:
  - name: a
    dev_addr: "26010001"
    rx_loss_probability: 0.5
  - name: b
    dev_addr: "26010002"
    rx_loss_probability: 0.5
    ping_nb: 32
downlinks:
  - at_secs: 10
    device: b
    payload_hex: "0102"
    repeat_every_secs: 30
    count: 20
"#;
    let first = run_yaml(yaml);
    let second = run_yaml(yaml);

    assert_eq!(first.total_events, second.total_events);
    assert_eq!(first.totals, second.totals);
    assert_eq!(first.gateway, second.gateway);
    assert_eq!(first.end_devices, second.end_devices);
}

#[test]
fn test_stats_serialize_to_json() {
    let stats = run_yaml(ONE_DEVICE);
    let json = serde_json::to_value(&stats).expect("Failed to serialize stats");

    assert_eq!(json["gateway"]["beacons_sent"], 6);
    assert_eq!(json["end_devices"]["dev0"]["beacon_status"], "acquired");
    assert_eq!(json["periods"].as_array().map(Vec::len), Some(70));
    assert!(json["periods"][0]["tx_bits"].is_u64());
}

#[test]
fn test_sub_microsecond_intervals_refused() {
    // Both round to zero ticks of virtual time.
    let mut config = SimulationConfig::from_yaml_str(ONE_DEVICE).unwrap();
    config.gateway.beacon_interval_secs = 0.0000001;
    assert!(matches!(build_simulation(&config), Err(RunnerError::Config(_))));

    let mut config = SimulationConfig::from_yaml_str(ONE_DEVICE).unwrap();
    config.stats_interval_secs = 0.0000001;
    assert!(matches!(run_simulation(&config), Err(RunnerError::Config(_))));
}

#[test]
fn test_load_scenario_file() {
    let path = std::env::temp_dir().join(format!("beaconsim-scenario-{}.yaml", std::process::id()));
    std::fs::write(&path, ONE_DEVICE).expect("Failed to write scenario");
    let config = SimulationConfig::load(&path);
    std::fs::remove_file(&path).ok();

    let config = config.expect("Failed to load scenario");
    assert_eq!(config.end_devices.len(), 1);
    assert_eq!(config.duration_secs, 700.0);
}

#[test]
fn test_demo_scenario() {
    let path = Path::new("../../demos/class_b.yaml");
    let mut config = SimulationConfig::load(path).expect("Failed to load demo scenario");
    config.duration_secs = 600.0;
    let stats = run_simulation(&config).expect("Simulation failed");

    assert_eq!(stats.end_devices.len(), 3);
    assert!(stats.gateway.beacons_sent >= 1);
    assert_eq!(stats.end_devices["meter-1"].beacon_status, BeaconStatus::Acquired);
}
