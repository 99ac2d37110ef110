//! Grid-balancing control filter
//!
//! Turns the latest net grid power reading into the next battery setpoint
//! in three stages:
//!
//! ```text
//!  reading ──▶ deadzone ──▶ direction + clamp ──▶ ramp limit ──▶ setpoint
//!                 │                │                    ▲
//!                 └── |r| ≤ dz ──▶ 0                    │
//!                                                previous setpoint
//! ```
//!
//! Sign conventions: a reading is negative while exporting and positive
//! while importing; a setpoint is positive while charging and negative while
//! discharging.  An export of N watts therefore asks for N watts of charge.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::config::ControlConfig;

/// Net grid power in watts.  Negative = export (surplus), positive = import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PowerReading(pub i32);

impl PowerReading {
    pub const fn watts(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PowerReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} W", self.0)
    }
}

/// Commanded battery power in watts.  Positive = charge, negative = discharge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Setpoint(pub i32);

impl Setpoint {
    pub const ZERO: Self = Self(0);

    pub const fn watts(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Setpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} W", self.0)
    }
}

/// Desired setpoint before ramp limiting.
///
/// Works in `i64` so that negating `i32::MIN` cannot overflow.
fn target_watts(reading: PowerReading, config: &ControlConfig) -> i64 {
    let r = i64::from(reading.0);
    let deadzone = i64::from(config.deadzone_w);

    if r < -deadzone {
        // Exporting: absorb the surplus.
        (-r).min(i64::from(config.max_charge_w)).max(0)
    } else if r > deadzone {
        // Importing: cover the deficit.
        -(r.min(i64::from(config.max_discharge_w)).max(0))
    } else {
        0
    }
}

/// Move `previous` toward `target` by at most one ramp step, then clamp the
/// result into the configured power window.
fn ramp_toward(previous: Setpoint, target: i64, config: &ControlConfig) -> Setpoint {
    let prev = i64::from(previous.0);
    let step = i64::from(config.ramp_w_per_cycle);

    let next = if target > prev + step {
        prev + step
    } else if target < prev - step {
        prev - step
    } else {
        target
    };

    let bounded = next
        .min(i64::from(config.max_charge_w))
        .max(-i64::from(config.max_discharge_w));
    Setpoint(bounded as i32)
}

/// Compute the next setpoint from a reading and the previous setpoint.
///
/// For a previous setpoint inside `[-max_discharge_w, max_charge_w]` the
/// result never moves by more than `ramp_w_per_cycle`.  A previous setpoint
/// outside that window is pulled back to the nearest bound, since the bound
/// takes precedence over the slew limit.
///
/// `config` is expected to have passed [`ControlConfig::validate`]; this
/// function never panics even when it has not.
pub fn compute(reading: PowerReading, previous: Setpoint, config: &ControlConfig) -> Setpoint {
    ramp_toward(previous, target_watts(reading, config), config)
}

/// One ramp step toward zero, without consulting any reading.
pub fn step_toward_zero(previous: Setpoint, config: &ControlConfig) -> Setpoint {
    ramp_toward(previous, 0, config)
}

/// Validated wrapper around [`compute`].
///
/// Owns an immutable copy of the tuning so that the controller cannot be
/// built around a configuration that would leave the setpoint stuck.
#[derive(Debug, Clone)]
pub struct ControlFilter {
    config: ControlConfig,
}

impl ControlFilter {
    pub fn new(config: ControlConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn compute(&self, reading: PowerReading, previous: Setpoint) -> Setpoint {
        compute(reading, previous, &self.config)
    }

    pub fn step_toward_zero(&self, previous: Setpoint) -> Setpoint {
        step_toward_zero(previous, &self.config)
    }
}
