//! System configuration parameters
//!
//! All tunable parameters for the GridBalance system.  Values are loaded
//! once at boot (NVS or defaults) and never mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

/// What the controller does when the grid meter cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SensorFailurePolicy {
    /// Keep the previous setpoint and do not re-dispatch.
    #[default]
    HoldLast,
    /// Step the setpoint toward zero by one ramp step and dispatch it.
    RampToZero,
}

/// Control-loop tuning consumed by the filter and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Band around zero exchange (W) inside which no correction is made
    pub deadzone_w: i32,
    /// Maximum charge power (W)
    pub max_charge_w: i32,
    /// Maximum discharge power (W), given as a positive magnitude
    pub max_discharge_w: i32,
    /// Maximum setpoint change per control cycle (W)
    pub ramp_w_per_cycle: i32,
    /// Control task period (milliseconds)
    pub control_period_ms: u32,
    /// Telemetry task period (milliseconds)
    pub telemetry_period_ms: u32,
    /// Report telemetry on the first tick instead of after one full period
    pub telemetry_on_start: bool,
    /// Reaction to a failed meter read
    pub sensor_failure_policy: SensorFailurePolicy,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            deadzone_w: 80,
            max_charge_w: 2500,
            max_discharge_w: 2500,
            ramp_w_per_cycle: 300,
            control_period_ms: 100,      // 10 Hz
            telemetry_period_ms: 10_000, // every 10 s
            telemetry_on_start: false,
            sensor_failure_policy: SensorFailurePolicy::HoldLast,
        }
    }
}

impl ControlConfig {
    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deadzone_w < 0 {
            return Err(ConfigError::ValidationFailed("deadzone_w must be >= 0"));
        }
        if self.max_charge_w < 0 {
            return Err(ConfigError::ValidationFailed("max_charge_w must be >= 0"));
        }
        if self.max_discharge_w < 0 {
            return Err(ConfigError::ValidationFailed(
                "max_discharge_w must be >= 0",
            ));
        }
        if self.ramp_w_per_cycle < 1 {
            return Err(ConfigError::ValidationFailed(
                "ramp_w_per_cycle must be >= 1",
            ));
        }
        if !(10..=60_000).contains(&self.control_period_ms) {
            return Err(ConfigError::ValidationFailed(
                "control_period_ms must be 10–60000",
            ));
        }
        if !(100..=3_600_000).contains(&self.telemetry_period_ms) {
            return Err(ConfigError::ValidationFailed(
                "telemetry_period_ms must be 100–3600000",
            ));
        }
        Ok(())
    }

    /// Main-loop sleep between ticks: a tenth of the control period.
    pub fn tick_interval_ms(&self) -> u32 {
        (self.control_period_ms / 10).max(1)
    }
}

/// Modbus-TCP grid meter endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterConfig {
    pub host: heapless::String<64>,
    pub port: u16,
    /// Modbus unit identifier
    pub unit_id: u8,
    /// Holding register carrying net grid power (signed W)
    pub register: u16,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            host: fixed_str("192.168.1.20"),
            port: 502,
            unit_id: 1,
            register: 30001,
        }
    }
}

/// HTTP endpoint of the battery inverter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InverterConfig {
    pub host: heapless::String<64>,
    pub port: u16,
    pub path: heapless::String<32>,
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            host: fixed_str("192.168.1.30"),
            port: 80,
            path: fixed_str("/api/power"),
        }
    }
}

/// Wi-Fi station credentials.  Empty SSID means "not provisioned".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

impl WifiConfig {
    pub fn new(ssid: &str, password: &str) -> Self {
        Self {
            ssid: fixed_str(ssid),
            password: fixed_str(password),
        }
    }

    pub fn is_provisioned(&self) -> bool {
        !self.ssid.is_empty()
    }
}

/// Credentials baked in at build time through `GRIDBAL_WIFI_SSID` and
/// `GRIDBAL_WIFI_PASS`; unprovisioned when those are unset.
impl Default for WifiConfig {
    fn default() -> Self {
        Self::new(
            option_env!("GRIDBAL_WIFI_SSID").unwrap_or(""),
            option_env!("GRIDBAL_WIFI_PASS").unwrap_or(""),
        )
    }
}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub control: ControlConfig,
    pub meter: MeterConfig,
    pub inverter: InverterConfig,
    pub wifi: WifiConfig,

    // --- Timing ---
    /// Connect/read/write timeout for every network call (milliseconds)
    pub io_timeout_ms: u32,
    /// Task watchdog timeout (milliseconds)
    pub watchdog_timeout_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            meter: MeterConfig::default(),
            inverter: InverterConfig::default(),
            wifi: WifiConfig::default(),
            io_timeout_ms: 1000,
            watchdog_timeout_ms: 10_000,
        }
    }
}

impl SystemConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.control.validate()?;

        if self.meter.host.is_empty() || self.meter.port == 0 {
            return Err(ConfigError::ValidationFailed(
                "meter host and port must be set",
            ));
        }
        if self.inverter.host.is_empty() || self.inverter.port == 0 {
            return Err(ConfigError::ValidationFailed(
                "inverter host and port must be set",
            ));
        }
        if !self.inverter.path.starts_with('/') {
            return Err(ConfigError::ValidationFailed(
                "inverter path must start with '/'",
            ));
        }
        if !(50..=5000).contains(&self.io_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "io_timeout_ms must be 50–5000",
            ));
        }
        // One control cycle may hit a connect and a read timeout on both
        // the meter and the inverter.
        if self.watchdog_timeout_ms < self.io_timeout_ms.saturating_mul(4) {
            return Err(ConfigError::ValidationFailed(
                "watchdog_timeout_ms must cover four I/O timeouts",
            ));
        }
        Ok(())
    }
}

/// Build a fixed-capacity string, truncating input that does not fit.
pub(crate) fn fixed_str<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
