//! Integration tests for config persistence feeding the controller.
//!
//! Uses the host (in-memory) NVS backend.

use crate::mock_ports::{RecordingInverter, RecordingTelemetry, ScriptedMeter};

use gridbalance::adapters::nvs::NvsConfigStore;
use gridbalance::adapters::wifi::{WifiStation, provision_credentials};
use gridbalance::app::ports::{ConfigError, ConfigPort};
use gridbalance::app::service::PowerController;
use gridbalance::config::{SensorFailurePolicy, SystemConfig, WifiConfig};
use gridbalance::control::Setpoint;

#[test]
fn persisted_tuning_drives_the_controller() {
    let store = NvsConfigStore::new().unwrap();
    let mut cfg = SystemConfig::default();
    cfg.control.ramp_w_per_cycle = 100;
    cfg.control.max_charge_w = 250;
    cfg.control.sensor_failure_policy = SensorFailurePolicy::RampToZero;
    store.save(&cfg).unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded, cfg);

    let mut ctl = PowerController::new(loaded.control, 0).unwrap();
    let mut meter = ScriptedMeter::steady(-1_000);
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();
    for i in 0..4 {
        ctl.tick(i * 100, &mut meter, &mut inverter, &mut telemetry);
    }

    assert_eq!(
        inverter.sent,
        vec![Setpoint(100), Setpoint(200), Setpoint(250), Setpoint(250)]
    );
}

#[test]
fn rejected_save_leaves_previous_config() {
    let store = NvsConfigStore::new().unwrap();
    let mut good = SystemConfig::default();
    good.control.deadzone_w = 40;
    store.save(&good).unwrap();

    let mut bad = good.clone();
    bad.io_timeout_ms = 10;
    assert!(matches!(store.save(&bad), Err(ConfigError::ValidationFailed(_))));

    assert_eq!(store.load().unwrap().control.deadzone_w, 40);
}

#[test]
fn corrupted_blob_reports_corruption() {
    let store = NvsConfigStore::new().unwrap();
    store.write_raw(&[0x01]);
    assert_eq!(store.load(), Err(ConfigError::Corrupted));
}

#[test]
fn provisioning_keeps_stored_tuning_and_brings_the_link_up() {
    let store = NvsConfigStore::new().unwrap();
    let mut cfg = SystemConfig::default();
    cfg.wifi = WifiConfig::new("", "");
    cfg.control.deadzone_w = 150;
    store.save(&cfg).unwrap();

    provision_credentials(&store, "HomeNetwork", "P@$$w0rd!").unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded.control.deadzone_w, 150);
    assert!(loaded.wifi.is_provisioned());

    let mut sta = WifiStation::new(&loaded.wifi).unwrap();
    sta.connect(0).unwrap();
    sta.poll(100);
    assert!(sta.is_connected());
}
